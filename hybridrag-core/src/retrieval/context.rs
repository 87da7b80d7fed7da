//! Query context types produced by the [`ContextBuilder`](super::ContextBuilder)

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::retrieval::QueryMode;

/// An entity included in the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntity {
    /// Identity key
    pub key: String,
    /// Display name
    pub name: String,
    /// Entity type
    pub entity_type: String,
    /// Description text
    pub description: String,
    /// Graph degree
    pub degree: usize,
    /// Retrieval relevance
    pub score: f32,
    /// Source files
    pub file_paths: Vec<String>,
    /// Last modification of the stored record
    pub timestamp: DateTime<Utc>,
}

/// A relationship included in the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRelationship {
    /// Identity key rendered as text
    pub key: String,
    /// Source display name
    pub source: String,
    /// Target display name
    pub target: String,
    /// Keywords joined for display
    pub keywords: String,
    /// Description text
    pub description: String,
    /// Accumulated weight
    pub weight: f64,
    /// Sum of endpoint degrees
    pub degree: usize,
    /// Retrieval relevance
    pub score: f32,
    /// Source files
    pub file_paths: Vec<String>,
    /// Last modification of the stored record
    pub timestamp: DateTime<Utc>,
}

/// A chunk included in the context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextChunk {
    /// Chunk id
    pub id: String,
    /// Chunk text
    pub content: String,
    /// Owning document
    pub full_doc_id: String,
    /// Source file
    pub file_path: String,
    /// Best retrieval score over all paths
    pub score: f32,
    /// Rerank score, when reranked
    pub rerank_score: Option<f32>,
}

/// Which sections hit their budget
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Truncation {
    /// Entity section truncated
    pub entities: bool,
    /// Relationship section truncated
    pub relationships: bool,
    /// Chunk section truncated
    pub chunks: bool,
}

impl Truncation {
    /// Whether any section was truncated
    pub fn any(&self) -> bool {
        self.entities || self.relationships || self.chunks
    }
}

/// Token counts per section of the rendered context
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Relationship section
    pub relationships: usize,
    /// Entity section
    pub entities: usize,
    /// Chunk section
    pub chunks: usize,
    /// Whole context text
    pub total: usize,
}

/// Citation entry for one source file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    /// Citation number, starting at "1"
    pub reference_id: String,
    /// Source file
    pub file_path: String,
    /// Document the first cited chunk came from
    pub document_id: String,
}

/// Bounded retrieval context for one query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryContext {
    /// Rendered context: relationships, entities, then sources
    pub context_text: String,
    /// Mode the context was built with
    pub mode: QueryMode,
    /// Included entities in rank order
    pub entities: Vec<ContextEntity>,
    /// Included relationships in rank order
    pub relationships: Vec<ContextRelationship>,
    /// Included chunks in final order
    pub chunks: Vec<ContextChunk>,
    /// Truncation flags
    pub truncation: Truncation,
    /// Citations built from the included chunks
    pub references: Vec<Reference>,
    /// Token accounting
    pub token_usage: TokenUsage,
}

impl QueryContext {
    /// Whether any section was truncated
    pub fn is_truncated(&self) -> bool {
        self.truncation.any()
    }
}
