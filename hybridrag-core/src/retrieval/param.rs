//! Query parameters

use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::{ChatMessage, RagError, Result};

/// Retrieval strategy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    /// Entities matched by low-level keywords, expanded one hop
    Local,
    /// Relationships matched by high-level keywords
    Global,
    /// Same as [`QueryMode::Mix`]
    Hybrid,
    /// Local and global together plus direct chunk search
    #[default]
    Mix,
    /// Direct chunk search only
    Naive,
}

impl QueryMode {
    /// Whether entity-side retrieval runs
    pub fn uses_local(self) -> bool {
        matches!(self, QueryMode::Local | QueryMode::Hybrid | QueryMode::Mix)
    }

    /// Whether relationship-side retrieval runs
    pub fn uses_global(self) -> bool {
        matches!(self, QueryMode::Global | QueryMode::Hybrid | QueryMode::Mix)
    }

    /// Whether direct chunk vector search runs
    pub fn uses_chunk_search(self) -> bool {
        matches!(self, QueryMode::Hybrid | QueryMode::Mix | QueryMode::Naive)
    }

    /// Lowercase name
    pub fn as_str(self) -> &'static str {
        match self {
            QueryMode::Local => "local",
            QueryMode::Global => "global",
            QueryMode::Hybrid => "hybrid",
            QueryMode::Mix => "mix",
            QueryMode::Naive => "naive",
        }
    }
}

impl std::fmt::Display for QueryMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = RagError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "local" => Ok(QueryMode::Local),
            "global" => Ok(QueryMode::Global),
            "hybrid" => Ok(QueryMode::Hybrid),
            "mix" => Ok(QueryMode::Mix),
            "naive" => Ok(QueryMode::Naive),
            other => Err(RagError::Validation {
                message: format!("unknown query mode '{other}'"),
            }),
        }
    }
}

/// Parameters of one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryParam {
    /// Retrieval strategy
    pub mode: QueryMode,
    /// Entities or relationships retrieved per vector search
    pub top_k: usize,
    /// Chunks kept in the final context
    pub chunk_top_k: usize,
    /// Chunks sent to the reranker; defaults to twice `chunk_top_k`
    pub pre_rerank_top_k: Option<usize>,
    /// Token budget of the entity section
    pub max_entity_tokens: usize,
    /// Token budget of the relationship section
    pub max_relation_tokens: usize,
    /// Token ceiling of the whole context
    pub max_total_tokens: usize,
    /// Minimum cosine similarity for vector hits
    pub cosine_threshold: f32,
    /// Rerank chunks when a reranker is configured
    pub enable_rerank: bool,
    /// Return the context instead of generating an answer
    pub only_need_context: bool,
    /// Stream the generated answer
    pub stream: bool,
    /// Desired answer shape, e.g. "Multiple Paragraphs"
    pub response_type: String,
    /// Extra instructions appended to the answer prompt
    pub user_prompt: Option<String>,
    /// Earlier turns, oldest first
    pub conversation_history: Vec<ChatMessage>,
    /// Caller-supplied high-level keywords; skips extraction when either list is set
    pub high_level_keywords: Vec<String>,
    /// Caller-supplied low-level keywords
    pub low_level_keywords: Vec<String>,
}

impl Default for QueryParam {
    fn default() -> Self {
        Self {
            mode: QueryMode::default(),
            top_k: 60,
            chunk_top_k: 20,
            pre_rerank_top_k: None,
            max_entity_tokens: 6000,
            max_relation_tokens: 8000,
            max_total_tokens: 30000,
            cosine_threshold: 0.2,
            enable_rerank: true,
            only_need_context: false,
            stream: false,
            response_type: "Multiple Paragraphs".to_string(),
            user_prompt: None,
            conversation_history: Vec::new(),
            high_level_keywords: Vec::new(),
            low_level_keywords: Vec::new(),
        }
    }
}

impl QueryParam {
    /// Parameters for `mode` with every other field at its default
    pub fn with_mode(mode: QueryMode) -> Self {
        Self {
            mode,
            ..Default::default()
        }
    }

    /// Chunks sent to the reranker, never fewer than `chunk_top_k`
    pub fn pre_rerank_limit(&self) -> usize {
        self.pre_rerank_top_k
            .unwrap_or(self.chunk_top_k * 2)
            .max(self.chunk_top_k)
    }

    /// Whether the caller supplied keywords
    pub fn has_keywords(&self) -> bool {
        !self.high_level_keywords.is_empty() || !self.low_level_keywords.is_empty()
    }

    /// Reject parameters that cannot produce a context
    pub fn validate(&self) -> Result<()> {
        if self.top_k == 0 {
            return Err(RagError::Validation {
                message: "top_k must be greater than 0".to_string(),
            });
        }
        if self.chunk_top_k == 0 {
            return Err(RagError::Validation {
                message: "chunk_top_k must be greater than 0".to_string(),
            });
        }
        if self.max_total_tokens == 0 {
            return Err(RagError::Validation {
                message: "max_total_tokens must be greater than 0".to_string(),
            });
        }
        if !(-1.0..=1.0).contains(&self.cosine_threshold) {
            return Err(RagError::Validation {
                message: format!(
                    "cosine_threshold must be within [-1, 1], got {}",
                    self.cosine_threshold
                ),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_parses_case_insensitively() {
        assert_eq!("MIX".parse::<QueryMode>().unwrap(), QueryMode::Mix);
        assert_eq!(" naive ".parse::<QueryMode>().unwrap(), QueryMode::Naive);
        assert!("graph".parse::<QueryMode>().is_err());
    }

    #[test]
    fn hybrid_runs_the_same_stages_as_mix() {
        for check in [
            QueryMode::uses_local,
            QueryMode::uses_global,
            QueryMode::uses_chunk_search,
        ] {
            assert_eq!(check(QueryMode::Hybrid), check(QueryMode::Mix));
        }
    }

    #[test]
    fn pre_rerank_limit_never_below_chunk_top_k() {
        let mut param = QueryParam::default();
        assert_eq!(param.pre_rerank_limit(), 40);
        param.pre_rerank_top_k = Some(5);
        assert_eq!(param.pre_rerank_limit(), 20);
    }

    #[test]
    fn partial_json_uses_defaults() {
        let param: QueryParam = serde_json::from_str(r#"{"mode": "global", "top_k": 5}"#).unwrap();
        assert_eq!(param.mode, QueryMode::Global);
        assert_eq!(param.top_k, 5);
        assert_eq!(param.chunk_top_k, 20);
    }

    #[test]
    fn zero_top_k_is_rejected() {
        let param = QueryParam {
            top_k: 0,
            ..Default::default()
        };
        assert!(param.validate().is_err());
    }
}
