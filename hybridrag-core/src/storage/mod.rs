//! Storage wiring.
//!
//! The merge engine and the retrieval builder share one [`StorageSet`]: a
//! graph store, three vector collections and five key-value namespaces.
//! Physical engines live behind the traits in [`crate::core::traits`]; the
//! in-memory implementations in [`memory`] back tests and single-process use.

use std::sync::Arc;

use crate::core::{GraphStore, KvStore, Result, VectorStore};

/// In-process graph, vector and key-value stores
#[cfg(feature = "memory-storage")]
pub mod memory;

#[cfg(feature = "memory-storage")]
pub use memory::{MemoryGraphStore, MemoryKvStore, MemoryVectorStore};

/// Vector collection of chunk embeddings
pub const CHUNKS_COLLECTION: &str = "chunks";
/// Vector collection of entity name and description embeddings
pub const ENTITIES_COLLECTION: &str = "entities";
/// Vector collection of relationship keyword and description embeddings
pub const RELATIONSHIPS_COLLECTION: &str = "relationships";

/// Original document content
pub const FULL_DOCS_NAMESPACE: &str = "full_docs";
/// Chunk records
pub const TEXT_CHUNKS_NAMESPACE: &str = "text_chunks";
/// Per-document processing status
pub const DOC_STATUS_NAMESPACE: &str = "doc_status";
/// Entity to chunk backlinks
pub const ENTITY_CHUNKS_NAMESPACE: &str = "entity_chunks";
/// Relationship to chunk backlinks
pub const RELATION_CHUNKS_NAMESPACE: &str = "relation_chunks";

/// Every store the pipeline writes to
#[derive(Clone)]
pub struct StorageSet {
    /// Entity and relationship graph
    pub graph: Arc<dyn GraphStore>,
    /// Chunk vectors
    pub chunk_vectors: Arc<dyn VectorStore>,
    /// Entity vectors
    pub entity_vectors: Arc<dyn VectorStore>,
    /// Relationship vectors
    pub relation_vectors: Arc<dyn VectorStore>,
    /// Original documents
    pub full_docs: Arc<dyn KvStore>,
    /// Chunk records
    pub text_chunks: Arc<dyn KvStore>,
    /// Document status records
    pub doc_status: Arc<dyn KvStore>,
    /// Entity backlinks
    pub entity_chunks: Arc<dyn KvStore>,
    /// Relationship backlinks
    pub relation_chunks: Arc<dyn KvStore>,
}

impl std::fmt::Debug for StorageSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageSet")
            .field("chunk_vectors", &self.chunk_vectors.namespace())
            .field("entity_vectors", &self.entity_vectors.namespace())
            .field("relation_vectors", &self.relation_vectors.namespace())
            .finish_non_exhaustive()
    }
}

impl StorageSet {
    /// Fresh in-memory stores
    #[cfg(feature = "memory-storage")]
    pub fn in_memory() -> Self {
        Self {
            graph: Arc::new(MemoryGraphStore::new()),
            chunk_vectors: Arc::new(MemoryVectorStore::new(CHUNKS_COLLECTION)),
            entity_vectors: Arc::new(MemoryVectorStore::new(ENTITIES_COLLECTION)),
            relation_vectors: Arc::new(MemoryVectorStore::new(RELATIONSHIPS_COLLECTION)),
            full_docs: Arc::new(MemoryKvStore::new(FULL_DOCS_NAMESPACE)),
            text_chunks: Arc::new(MemoryKvStore::new(TEXT_CHUNKS_NAMESPACE)),
            doc_status: Arc::new(MemoryKvStore::new(DOC_STATUS_NAMESPACE)),
            entity_chunks: Arc::new(MemoryKvStore::new(ENTITY_CHUNKS_NAMESPACE)),
            relation_chunks: Arc::new(MemoryKvStore::new(RELATION_CHUNKS_NAMESPACE)),
        }
    }

    /// Invoke every store's persistence callback, one after another
    ///
    /// A failure stops the sequence so at most the remaining stores are
    /// left unflushed.
    pub async fn flush_all(&self) -> Result<()> {
        self.full_docs.index_done().await?;
        self.text_chunks.index_done().await?;
        self.chunk_vectors.index_done().await?;
        self.entity_vectors.index_done().await?;
        self.relation_vectors.index_done().await?;
        self.entity_chunks.index_done().await?;
        self.relation_chunks.index_done().await?;
        self.graph.index_done().await?;
        self.doc_status.index_done().await?;
        tracing::debug!("Flushed all stores");
        Ok(())
    }

    /// Drop every store's contents
    pub async fn drop_all(&self) -> Result<()> {
        self.graph.drop_all().await?;
        for vectors in [&self.chunk_vectors, &self.entity_vectors, &self.relation_vectors] {
            vectors.drop_all().await?;
        }
        for kv in [
            &self.full_docs,
            &self.text_chunks,
            &self.doc_status,
            &self.entity_chunks,
            &self.relation_chunks,
        ] {
            kv.drop_all().await?;
        }
        tracing::info!("Dropped all stores");
        Ok(())
    }
}
