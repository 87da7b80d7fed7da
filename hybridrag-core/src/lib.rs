//! # HybridRAG Core
//!
//! A knowledge base for retrieval-augmented generation that fuses a property
//! graph of extracted entities and relationships with vector search over
//! document chunks.
//!
//! This crate provides:
//! - Token-bounded chunking with content-derived ids
//! - Concurrent per-chunk embedding and entity/relationship extraction
//! - A merge engine that folds extractions into a deduplicated,
//!   weight-accumulated graph with synchronized vector and backlink indices
//! - A context builder for local, global, mix and naive retrieval under
//!   strict token budgets, with optional reranking
//! - An orchestrator with document status tracking, deletion and progress
//!   events
//!
//! Language models, embedders, rerankers and physical stores are
//! collaborators behind the traits in [`core::traits`].
//!
//! ## Feature Flags
//!
//! - `memory-storage` (default): in-process graph, vector and key-value stores
//! - `toml-support` (default): TOML configuration files
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use hybridrag_core::core::mock_providers::{DeterministicEmbedder, MockLanguageModel};
//! use hybridrag_core::{HybridRag, QueryParam};
//!
//! # async fn example() -> hybridrag_core::Result<()> {
//! let rag = HybridRag::builder()
//!     .with_language_model(Arc::new(MockLanguageModel::new()))
//!     .with_embedder(Arc::new(DeterministicEmbedder::new(64)))
//!     .build()?;
//!
//! rag.insert_document("Zephyr captains the Quasar.", None, Some("log.txt")).await?;
//! let response = rag.query("Who captains the Quasar?", &QueryParam::default()).await?;
//! println!("{:?}", response.text());
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Concurrency gates, progress events and chunk fan-out
pub mod async_processing;
/// Configuration management and loading
pub mod config;
/// Core traits, records and errors
pub mod core;
/// Prompted extraction, keyword extraction and summarization
pub mod extraction;
/// Knowledge graph merging
pub mod graph;
/// Ingestion and query orchestration
pub mod pipeline;
/// Rerank application
pub mod reranking;
/// Query context building
pub mod retrieval;
/// Storage wiring and in-memory stores
pub mod storage;
/// Tokenizing, hashing, normalization and chunking
pub mod text;

/// Prelude module containing the most commonly used types
pub mod prelude {
    pub use crate::config::RagConfig;
    pub use crate::core::{
        Embedder, EntityKey, GraphStore, KvStore, LanguageModel, RagError, RelationKey, Reranker,
        Result, VectorStore,
    };
    pub use crate::pipeline::{HybridRag, HybridRagBuilder, QueryOutput, QueryResponse};
    pub use crate::retrieval::{QueryContext, QueryMode, QueryParam};
}

// Re-export core types
pub use crate::config::RagConfig;
pub use crate::core::{
    Chunk, ChunkResult, EntityKey, EntityRecord, ErrorContext, ErrorSeverity, KnowledgeGraph,
    RagError, RelationKey, RelationRecord, Result,
};

// Re-export collaborator traits
pub use crate::core::traits::{
    Embedder, GraphStore, KvStore, LanguageModel, Reranker, VectorStore,
};

// Orchestrator and query surface
pub use crate::async_processing::{PipelineStage, ProgressEvent};
pub use crate::pipeline::{
    DocStatus, DocStatusRecord, HybridRag, HybridRagBuilder, QueryOutput, QueryResponse,
    NO_CONTEXT_RESPONSE,
};
pub use crate::retrieval::{QueryContext, QueryMode, QueryParam};
pub use crate::storage::StorageSet;
