//! Entity and relationship extraction through the language model

use std::sync::Arc;

use crate::async_processing::ExtractionLimiter;
use crate::config::ExtractionConfig;
use crate::core::{
    ErrorContext, ExtractionResult, GenerationParams, GenerationRequest, LanguageModel, Result,
};
use crate::extraction::parser::{parse_extraction, ParseLimits};
use crate::extraction::prompts::{
    fill, COMPLETION_DELIMITER, ENTITY_EXTRACTION_PROMPT, TUPLE_DELIMITER,
};

/// Extracts entities and relationships from chunk text
///
/// Every call holds an [`ExtractionLimiter`] permit, so the number of
/// in-flight extraction requests never exceeds the limiter's capacity no
/// matter how many chunks are processed at once.
pub struct EntityExtractor {
    llm: Arc<dyn LanguageModel>,
    limiter: Arc<ExtractionLimiter>,
    config: ExtractionConfig,
}

impl std::fmt::Debug for EntityExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityExtractor")
            .field("model", &self.llm.model_name())
            .field("config", &self.config)
            .finish()
    }
}

impl EntityExtractor {
    /// Create an extractor sharing `limiter` with other extraction callers
    pub fn new(
        llm: Arc<dyn LanguageModel>,
        limiter: Arc<ExtractionLimiter>,
        config: ExtractionConfig,
    ) -> Self {
        Self {
            llm,
            limiter,
            config,
        }
    }

    /// Build the extraction prompt for `text`
    pub fn build_prompt(&self, text: &str) -> String {
        let entity_types = self.config.entity_types.join(", ");
        fill(
            ENTITY_EXTRACTION_PROMPT,
            &[
                ("tuple_delimiter", TUPLE_DELIMITER),
                ("completion_delimiter", COMPLETION_DELIMITER),
                ("entity_types", &entity_types),
                ("language", &self.config.language),
                ("input_text", text),
            ],
        )
    }

    /// Extract from one chunk's text
    pub async fn extract(&self, text: &str) -> Result<ExtractionResult> {
        let request = GenerationRequest::new(self.build_prompt(text))
            .with_params(GenerationParams::default().with_temperature(self.config.temperature));

        let response = {
            let _permit = self.limiter.acquire().await?;
            self.llm.generate(&request).await?
        };

        let result = parse_extraction(
            &response,
            ParseLimits {
                max_entities: self.config.max_entities,
                max_relationships: self.config.max_relationships,
            },
        )
        .with_context("entity extraction")?;

        tracing::debug!(
            entities = result.entities.len(),
            relationships = result.relationships.len(),
            "Parsed extraction response"
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::mock_providers::MockLanguageModel;
    use crate::core::RagError;

    fn extractor(llm: MockLanguageModel, capacity: usize) -> EntityExtractor {
        EntityExtractor::new(
            Arc::new(llm),
            Arc::new(ExtractionLimiter::new(capacity)),
            ExtractionConfig::default(),
        )
    }

    #[tokio::test]
    async fn extracts_records_from_model_output() {
        let llm = MockLanguageModel::new().with_response(
            "Zephyr sails",
            "entity<#>Zephyr<#>person<#>A sailor\n<|COMPLETE|>",
        );
        let result = extractor(llm, 1).extract("Zephyr sails").await.unwrap();
        assert_eq!(result.entities.len(), 1);
        assert_eq!(result.entities[0].entity_type, "person");
    }

    #[tokio::test]
    async fn prompt_lists_configured_entity_types() {
        let extractor = extractor(MockLanguageModel::new(), 1);
        let prompt = extractor.build_prompt("some text");
        assert!(prompt.contains("organization, person, geo, event, category"));
        assert!(prompt.contains("some text"));
    }

    #[tokio::test]
    async fn truncated_output_is_an_error() {
        let llm = MockLanguageModel::new().with_response("Zephyr", "entity<#>Zephyr<#>person<#>x");
        let err = extractor(llm, 1).extract("Zephyr").await.unwrap_err();
        assert!(matches!(err, RagError::Parse { .. }));
    }
}
