//! Typed configuration for ingestion, merging, concurrency and querying.
//!
//! Every field has a documented default so a partial TOML or JSON file only
//! needs to name what it overrides.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{RagError, Result};
use crate::retrieval::QueryParam;

/// Configuration file loading utilities
pub mod loader;

pub use loader::{load_config, save_config, ConfigFormat};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RagConfig {
    /// Document chunking
    #[serde(default)]
    pub chunking: ChunkingConfig,
    /// Entity and relationship extraction
    #[serde(default)]
    pub extraction: ExtractionConfig,
    /// Knowledge graph merging
    #[serde(default)]
    pub merge: MergeConfig,
    /// Concurrency caps and embedding throttling
    #[serde(default)]
    pub concurrency: ConcurrencyConfig,
    /// Default query parameters
    #[serde(default)]
    pub query: QueryParam,
}

impl RagConfig {
    /// Reject configurations that cannot work
    pub fn validate(&self) -> Result<()> {
        self.chunking.validate()?;
        self.merge.validate()?;
        self.concurrency.validate()?;
        self.query.validate()
    }
}

/// Chunking parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    /// Maximum tokens per chunk
    #[serde(default = "default_chunk_token_size")]
    pub chunk_token_size: usize,
    /// Tokens shared by consecutive chunks
    #[serde(default = "default_chunk_overlap_token_size")]
    pub chunk_overlap_token_size: usize,
    /// Optional separator applied before token windowing
    #[serde(default)]
    pub split_by_character: Option<String>,
    /// Keep separator pieces whole even when oversized
    #[serde(default)]
    pub split_by_character_only: bool,
}

fn default_chunk_token_size() -> usize {
    1200
}

fn default_chunk_overlap_token_size() -> usize {
    100
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_token_size: default_chunk_token_size(),
            chunk_overlap_token_size: default_chunk_overlap_token_size(),
            split_by_character: None,
            split_by_character_only: false,
        }
    }
}

impl ChunkingConfig {
    /// Window must be positive and larger than the overlap
    pub fn validate(&self) -> Result<()> {
        if self.chunk_token_size == 0 {
            return Err(RagError::Config {
                message: "chunk_token_size must be greater than zero".to_string(),
            });
        }
        if self.chunk_overlap_token_size >= self.chunk_token_size {
            return Err(RagError::Config {
                message: format!(
                    "chunk_overlap_token_size ({}) must be smaller than chunk_token_size ({})",
                    self.chunk_overlap_token_size, self.chunk_token_size
                ),
            });
        }
        Ok(())
    }
}

/// Extraction parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractionConfig {
    /// Entity types the model is asked to recognise
    #[serde(default = "default_entity_types")]
    pub entity_types: Vec<String>,
    /// Output language requested from the model
    #[serde(default = "default_language")]
    pub language: String,
    /// Sampling temperature for extraction and summarization
    #[serde(default)]
    pub temperature: f32,
    /// Keep at most this many entities per chunk
    #[serde(default)]
    pub max_entities: Option<usize>,
    /// Keep at most this many relationships per chunk
    #[serde(default)]
    pub max_relationships: Option<usize>,
}

fn default_entity_types() -> Vec<String> {
    ["organization", "person", "geo", "event", "category"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_language() -> String {
    "English".to_string()
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            entity_types: default_entity_types(),
            language: default_language(),
            temperature: 0.0,
            max_entities: None,
            max_relationships: None,
        }
    }
}

/// Merge engine parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeConfig {
    /// Summarize once a description has more fragments than this
    #[serde(default = "default_summary_fragment_threshold")]
    pub summary_fragment_threshold: usize,
    /// Summarize once a description has more tokens than this
    #[serde(default = "default_summary_max_tokens")]
    pub summary_max_tokens: usize,
    /// Length the summarizer is asked to aim for
    #[serde(default = "default_summary_target_tokens")]
    pub summary_target_tokens: usize,
    /// Distinct keys merged concurrently
    #[serde(default = "default_max_parallel_merges")]
    pub max_parallel_merges: usize,
}

fn default_summary_fragment_threshold() -> usize {
    3
}

fn default_summary_max_tokens() -> usize {
    500
}

fn default_summary_target_tokens() -> usize {
    200
}

fn default_max_parallel_merges() -> usize {
    8
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            summary_fragment_threshold: default_summary_fragment_threshold(),
            summary_max_tokens: default_summary_max_tokens(),
            summary_target_tokens: default_summary_target_tokens(),
            max_parallel_merges: default_max_parallel_merges(),
        }
    }
}

impl MergeConfig {
    /// Thresholds and parallelism must be positive
    pub fn validate(&self) -> Result<()> {
        if self.summary_fragment_threshold == 0 || self.max_parallel_merges == 0 {
            return Err(RagError::Config {
                message: "summary_fragment_threshold and max_parallel_merges must be positive"
                    .to_string(),
            });
        }
        Ok(())
    }
}

/// Concurrency caps and embedding throttling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcurrencyConfig {
    /// Simultaneous extraction calls to the language model
    #[serde(default = "default_max_concurrent_extractions")]
    pub max_concurrent_extractions: usize,
    /// Chunks processed concurrently for one document
    #[serde(default = "default_max_parallel_chunks")]
    pub max_parallel_chunks: usize,
    /// Minimum gap between embedding requests, in milliseconds
    #[serde(default = "default_embedding_min_interval_ms")]
    pub embedding_min_interval_ms: u64,
    /// Attempts per embedding request on transient failures
    #[serde(default = "default_embedding_max_attempts")]
    pub embedding_max_attempts: u32,
    /// First backoff delay, doubled per attempt, in milliseconds
    #[serde(default = "default_embedding_backoff_base_ms")]
    pub embedding_backoff_base_ms: u64,
}

fn default_max_concurrent_extractions() -> usize {
    10
}

fn default_max_parallel_chunks() -> usize {
    32
}

fn default_embedding_min_interval_ms() -> u64 {
    100
}

/// Upper bound on `embedding_max_attempts`
pub const MAX_EMBEDDING_ATTEMPTS: u32 = 10;

fn default_embedding_max_attempts() -> u32 {
    3
}

fn default_embedding_backoff_base_ms() -> u64 {
    200
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_extractions: default_max_concurrent_extractions(),
            max_parallel_chunks: default_max_parallel_chunks(),
            embedding_min_interval_ms: default_embedding_min_interval_ms(),
            embedding_max_attempts: default_embedding_max_attempts(),
            embedding_backoff_base_ms: default_embedding_backoff_base_ms(),
        }
    }
}

impl ConcurrencyConfig {
    /// Caps and attempts must be positive
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_extractions == 0
            || self.max_parallel_chunks == 0
            || self.embedding_max_attempts == 0
        {
            return Err(RagError::Config {
                message: "concurrency caps and embedding_max_attempts must be positive"
                    .to_string(),
            });
        }
        if self.embedding_max_attempts > MAX_EMBEDDING_ATTEMPTS {
            return Err(RagError::Config {
                message: format!(
                    "embedding_max_attempts must be at most {MAX_EMBEDDING_ATTEMPTS}, got {}",
                    self.embedding_max_attempts
                ),
            });
        }
        Ok(())
    }

    /// Minimum embedding request interval
    pub fn embedding_min_interval(&self) -> Duration {
        Duration::from_millis(self.embedding_min_interval_ms)
    }

    /// First retry backoff
    pub fn embedding_backoff_base(&self) -> Duration {
        Duration::from_millis(self.embedding_backoff_base_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = RagConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.merge.summary_fragment_threshold, 3);
        assert_eq!(config.concurrency.max_concurrent_extractions, 10);
        assert_eq!(config.concurrency.embedding_min_interval(), Duration::from_millis(100));
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: RagConfig =
            serde_json::from_str(r#"{"chunking": {"chunk_token_size": 64}}"#).unwrap();
        assert_eq!(config.chunking.chunk_token_size, 64);
        assert_eq!(config.chunking.chunk_overlap_token_size, 100);
        // Overlap default is now larger than the window
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_extraction_cap_is_rejected() {
        let mut config = RagConfig::default();
        config.concurrency.max_concurrent_extractions = 0;
        assert!(matches!(config.validate(), Err(RagError::Config { .. })));
    }

    #[test]
    fn excessive_embedding_attempts_are_rejected() {
        let mut config = RagConfig::default();
        config.concurrency.embedding_max_attempts = MAX_EMBEDDING_ATTEMPTS;
        assert!(config.validate().is_ok());
        config.concurrency.embedding_max_attempts = 40;
        assert!(matches!(config.validate(), Err(RagError::Config { .. })));
    }
}
