//! Query keyword extraction
//!
//! Splits a query into high-level keywords (themes, matched against the
//! relationship space) and low-level keywords (named things, matched against
//! the entity space).

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::core::{GenerationParams, GenerationRequest, LanguageModel, RagError, Result};
use crate::extraction::parser::preview;
use crate::extraction::prompts::{fill, KEYWORD_EXTRACTION_PROMPT};
use crate::text::normalize::clean_text;

/// Keyword sets for one query
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryKeywords {
    /// Broad themes and concepts
    #[serde(default, alias = "high_level_keywords")]
    pub high_level: Vec<String>,
    /// Specific entities and details
    #[serde(default, alias = "low_level_keywords")]
    pub low_level: Vec<String>,
}

impl QueryKeywords {
    /// Keyword sets supplied directly by the caller
    pub fn new(high_level: Vec<String>, low_level: Vec<String>) -> Self {
        Self {
            high_level,
            low_level,
        }
        .cleaned()
    }

    /// Whether both sets are empty
    pub fn is_empty(&self) -> bool {
        self.high_level.is_empty() && self.low_level.is_empty()
    }

    fn cleaned(self) -> Self {
        let clean = |keywords: Vec<String>| {
            let mut seen = Vec::with_capacity(keywords.len());
            for keyword in keywords.iter().map(|k| clean_text(k)) {
                if !keyword.is_empty() && !seen.contains(&keyword) {
                    seen.push(keyword);
                }
            }
            seen
        };
        Self {
            high_level: clean(self.high_level),
            low_level: clean(self.low_level),
        }
    }
}

/// Extracts [`QueryKeywords`] from a query through the language model
pub struct KeywordExtractor {
    llm: Arc<dyn LanguageModel>,
    language: String,
    temperature: f32,
}

impl std::fmt::Debug for KeywordExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeywordExtractor")
            .field("model", &self.llm.model_name())
            .field("language", &self.language)
            .finish()
    }
}

impl KeywordExtractor {
    /// Create a keyword extractor
    pub fn new(llm: Arc<dyn LanguageModel>, language: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            language: language.into(),
            temperature,
        }
    }

    /// Extract keywords for `query`
    ///
    /// Transport failures propagate. An unparseable response degrades to
    /// empty keyword sets, which retrieval treats as "search with the raw
    /// query".
    pub async fn extract(&self, query: &str) -> Result<QueryKeywords> {
        let prompt = fill(
            KEYWORD_EXTRACTION_PROMPT,
            &[("query", query), ("language", &self.language)],
        );
        let request = GenerationRequest::new(prompt)
            .with_params(GenerationParams::default().with_temperature(self.temperature));
        let response = self.llm.generate(&request).await?;

        match parse_keywords(&response) {
            Ok(keywords) => {
                tracing::debug!(
                    high_level = keywords.high_level.len(),
                    low_level = keywords.low_level.len(),
                    "Extracted query keywords"
                );
                Ok(keywords)
            },
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    response_preview = %preview(&response),
                    "Keyword extraction response unparseable, using empty keywords"
                );
                Ok(QueryKeywords::default())
            },
        }
    }
}

/// Parse the JSON object embedded in a keyword extraction response
pub fn parse_keywords(response: &str) -> Result<QueryKeywords> {
    let start = response.find('{');
    let end = response.rfind('}');
    let json = match (start, end) {
        (Some(start), Some(end)) if start < end => &response[start..=end],
        _ => {
            return Err(RagError::Parse {
                message: "no JSON object found in keyword response".to_string(),
            })
        },
    };

    let keywords: QueryKeywords = serde_json::from_str(json).map_err(|e| RagError::Parse {
        message: format!("failed to parse keywords JSON: {e}"),
    })?;
    Ok(keywords.cleaned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::MockLanguageModel;

    #[test]
    fn parses_json_wrapped_in_chatter() {
        let response = r#"Sure! {"high_level_keywords": ["trade"], "low_level_keywords": ["Zephyr", " zephyr "]} Done."#;
        let keywords = parse_keywords(response).unwrap();
        assert_eq!(keywords.high_level, vec!["trade"]);
        assert_eq!(keywords.low_level, vec!["Zephyr", "zephyr"]);
    }

    #[test]
    fn accepts_short_field_names() {
        let keywords = parse_keywords(r#"{"high_level": ["a"], "low_level": []}"#).unwrap();
        assert_eq!(keywords.high_level, vec!["a"]);
        assert!(keywords.low_level.is_empty());
    }

    #[test]
    fn rejects_responses_without_json() {
        assert!(matches!(
            parse_keywords("no keywords here"),
            Err(RagError::Parse { .. })
        ));
    }

    #[tokio::test]
    async fn unparseable_response_degrades_to_empty() {
        let llm = MockLanguageModel::new().with_response("Zephyr", "I cannot help with that");
        let extractor = KeywordExtractor::new(Arc::new(llm), "English", 0.0);
        let keywords = extractor.extract("Who is Zephyr?").await.unwrap();
        assert!(keywords.is_empty());
    }

    #[tokio::test]
    async fn transport_failure_propagates() {
        let llm = MockLanguageModel::new().with_error("Zephyr", "connection refused");
        let extractor = KeywordExtractor::new(Arc::new(llm), "English", 0.0);
        assert!(extractor.extract("Who is Zephyr?").await.is_err());
    }
}
