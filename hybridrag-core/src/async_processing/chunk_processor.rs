//! Per-document chunk fan-out
//!
//! Every chunk of a document is embedded and extracted concurrently, up to
//! the configured width. The embedding call and the extraction call for one
//! chunk run at the same time. The first failing chunk fails the whole
//! document and is named in the error.

use std::sync::Arc;

use futures::{stream, StreamExt, TryStreamExt};
use tokio_util::sync::CancellationToken;

use crate::async_processing::{ensure_active, EmbeddingGate, PipelineStage, ProgressReporter};
use crate::core::{Chunk, ChunkResult, RagError, Result};
use crate::extraction::EntityExtractor;

/// Turns chunks into [`ChunkResult`]s
#[derive(Debug, Clone)]
pub struct ChunkProcessor {
    embeddings: Arc<EmbeddingGate>,
    extractor: Arc<EntityExtractor>,
    max_parallel_chunks: usize,
}

impl ChunkProcessor {
    /// Create a processor running at most `max_parallel_chunks` chunks at once
    pub fn new(
        embeddings: Arc<EmbeddingGate>,
        extractor: Arc<EntityExtractor>,
        max_parallel_chunks: usize,
    ) -> Self {
        Self {
            embeddings,
            extractor,
            max_parallel_chunks: max_parallel_chunks.max(1),
        }
    }

    /// Process every chunk, returning results in chunk order
    pub async fn process(
        &self,
        document_id: &str,
        chunks: &[Chunk],
        progress: Option<&ProgressReporter>,
        cancel: &CancellationToken,
    ) -> Result<Vec<ChunkResult>> {
        ensure_active(cancel, "extraction")?;
        let total = chunks.len();
        tracing::info!(document_id, chunk_count = total, "Processing chunks");

        let results: Vec<ChunkResult> = stream::iter(chunks.iter().enumerate())
            .map(|(position, chunk)| async move {
                ensure_active(cancel, "extraction")?;
                let result = self.process_chunk(chunk).await.map_err(|e| {
                    tracing::warn!(chunk_id = %chunk.id, error = %e, "Chunk processing failed");
                    RagError::ChunkProcessing {
                        chunk_id: chunk.id.clone(),
                        source: Box::new(e),
                    }
                })?;
                if let Some(progress) = progress {
                    progress.report(
                        PipelineStage::Extracting,
                        position + 1,
                        total,
                        format!(
                            "Chunk {}: {} entities, {} relationships",
                            chunk.id,
                            result.entities.len(),
                            result.relationships.len()
                        ),
                        Some(document_id),
                    );
                }
                Ok::<_, RagError>(result)
            })
            .buffered(self.max_parallel_chunks)
            .try_collect()
            .await?;

        tracing::info!(document_id, chunk_count = results.len(), "Chunks processed");
        Ok(results)
    }

    async fn process_chunk(&self, chunk: &Chunk) -> Result<ChunkResult> {
        let (embedding, extraction) = tokio::try_join!(
            self.embeddings.embed(&chunk.content),
            self.extractor.extract(&chunk.content),
        )?;
        Ok(ChunkResult {
            chunk_id: chunk.id.clone(),
            file_path: chunk.file_path.clone(),
            embedding,
            entities: extraction.entities,
            relationships: extraction.relationships,
        })
    }
}
