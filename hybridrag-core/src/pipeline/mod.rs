//! Document ingestion and query orchestration.
//!
//! [`HybridRag`] sequences the pipeline stages around the merge engine and
//! the context builder:
//!
//! ```text
//! insert: content → chunk → embed + extract → persist chunks → merge → flush
//! query:  text → keywords → build context → generate (or return context)
//! ```
//!
//! Every stage reports to a progress feed and observes a cancellation token.
//! Status records in the `doc_status` namespace make re-inserting a processed
//! document a no-op and let a failed document be retried or deleted.
//!
//! ## Example
//!
//! ```ignore
//! let rag = HybridRag::builder()
//!     .with_language_model(llm)
//!     .with_embedder(embedder)
//!     .build()?;
//!
//! let doc_id = rag.insert_document(text, None, Some("notes/sea.txt")).await?;
//! let answer = rag.query("Who sails the Quasar?", &QueryParam::default()).await?;
//! ```

/// Orchestrator construction
pub mod builder;
/// Document status records
pub mod status;

pub use builder::HybridRagBuilder;
pub use status::{DocStatus, DocStatusRecord};

use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::async_processing::{
    ensure_active, ChunkProcessor, PipelineStage, ProgressDispatcher, ProgressEvent,
    ProgressReporter,
};
use crate::config::RagConfig;
use crate::core::{
    Chunk, ChunkResult, GenerationRequest, KnowledgeGraph, KvRecord, LanguageModel, RagError,
    Result, TextStream, VectorDocument,
};
use crate::extraction::prompts::{fill, RAG_RESPONSE_PROMPT};
use crate::extraction::{KeywordExtractor, QueryKeywords};
use crate::graph::{reduce_chunk_results, MergeEngine, RemovalReport};
use crate::retrieval::{ContextBuilder, QueryContext, QueryMode, QueryParam, Reference};
use crate::storage::StorageSet;
use crate::text::{document_id, Chunker};

/// Answer text when no context matched the query
pub const NO_CONTEXT_RESPONSE: &str =
    "Sorry, I'm not able to provide an answer to that question.[no-context]";

/// Generated answer, complete or streamed
pub enum QueryOutput {
    /// Complete text
    Text(String),
    /// Incremental fragments
    Stream(TextStream),
}

impl std::fmt::Debug for QueryOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QueryOutput::Text(text) => f.debug_tuple("Text").field(text).finish(),
            QueryOutput::Stream(_) => f.write_str("Stream(..)"),
        }
    }
}

/// Result of [`HybridRag::query`]
#[derive(Debug)]
pub struct QueryResponse {
    /// Answer, context text or the no-context sentinel
    pub content: QueryOutput,
    /// Citations of the chunks the answer was grounded on
    pub references: Vec<Reference>,
    /// Context the answer was built from; `None` when nothing matched
    pub context: Option<QueryContext>,
    /// Keywords used for retrieval
    pub keywords: QueryKeywords,
}

impl QueryResponse {
    /// Whether the content is a stream
    pub fn is_streaming(&self) -> bool {
        matches!(self.content, QueryOutput::Stream(_))
    }

    /// The complete text, if not streaming
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            QueryOutput::Text(text) => Some(text),
            QueryOutput::Stream(_) => None,
        }
    }

    /// Whether no context matched the query
    pub fn is_no_context(&self) -> bool {
        self.context.is_none()
    }

    fn no_context(keywords: QueryKeywords) -> Self {
        Self {
            content: QueryOutput::Text(NO_CONTEXT_RESPONSE.to_string()),
            references: Vec::new(),
            context: None,
            keywords,
        }
    }
}

/// Hybrid graph and vector knowledge base
pub struct HybridRag {
    config: RagConfig,
    storage: StorageSet,
    llm: Arc<dyn LanguageModel>,
    chunker: Chunker,
    processor: ChunkProcessor,
    merge: MergeEngine,
    context_builder: ContextBuilder,
    keyword_extractor: KeywordExtractor,
    progress: ProgressReporter,
    dispatcher: ProgressDispatcher,
}

impl std::fmt::Debug for HybridRag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRag")
            .field("model", &self.llm.model_name())
            .field("storage", &self.storage)
            .finish_non_exhaustive()
    }
}

impl HybridRag {
    /// Start building an instance
    pub fn builder() -> HybridRagBuilder {
        HybridRagBuilder::new()
    }

    /// Active configuration
    pub fn config(&self) -> &RagConfig {
        &self.config
    }

    /// Shared stores
    pub fn storage(&self) -> &StorageSet {
        &self.storage
    }

    /// Subscribe to progress events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.dispatcher.subscribe()
    }

    /// Insert a document and return its id
    ///
    /// Without `doc_id` the id is derived from the content, so inserting the
    /// same content twice is a no-op the second time.
    pub async fn insert_document(
        &self,
        content: &str,
        doc_id: Option<&str>,
        file_path: Option<&str>,
    ) -> Result<String> {
        self.insert_document_with_cancel(content, doc_id, file_path, &CancellationToken::new())
            .await
    }

    /// [`insert_document`](Self::insert_document) observing `cancel`
    ///
    /// A cancelled or failed insert leaves the document marked failed;
    /// inserting it again resumes safely.
    pub async fn insert_document_with_cancel(
        &self,
        content: &str,
        doc_id: Option<&str>,
        file_path: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let content = content.trim();
        if content.is_empty() {
            return Err(RagError::Validation {
                message: "document content is empty".to_string(),
            });
        }
        let doc_id = match doc_id.map(str::trim) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => document_id(content),
        };
        let file_path = file_path.unwrap_or_default();

        let previous = self.document_status(&doc_id).await?;
        if let Some(previous) = &previous {
            if previous.status == DocStatus::Processed {
                tracing::info!(document_id = %doc_id, "Document already processed, skipping");
                self.progress.report(
                    PipelineStage::Skipped,
                    1,
                    1,
                    "Document already processed",
                    Some(&doc_id),
                );
                return Ok(doc_id);
            }
        }

        ensure_active(cancel, "insert")?;
        tracing::info!(document_id = %doc_id, file_path, "Inserting document");
        self.progress
            .report(PipelineStage::Queued, 0, 1, "Document accepted", Some(&doc_id));

        let mut status = DocStatusRecord::processing(content, file_path);
        if let Some(previous) = previous {
            status.created_at = previous.created_at;
        }
        let mut doc_record = KvRecord::new();
        doc_record.insert("content".to_string(), content.into());
        doc_record.insert("file_path".to_string(), file_path.into());
        self.storage
            .full_docs
            .upsert(vec![(doc_id.clone(), doc_record)])
            .await?;
        self.write_status(&doc_id, &status).await?;

        match self
            .index_document(&doc_id, content, file_path, &mut status, cancel)
            .await
        {
            Ok(()) => {
                status.transition(DocStatus::Processed);
                status.error = None;
                self.write_status(&doc_id, &status).await?;
                self.storage.doc_status.index_done().await?;
                tracing::info!(
                    document_id = %doc_id,
                    chunks = status.chunk_count,
                    entities = status.entity_keys.len(),
                    relations = status.relation_keys.len(),
                    "Document processed"
                );
                self.progress
                    .report(PipelineStage::Completed, 1, 1, "Document processed", Some(&doc_id));
                Ok(doc_id)
            },
            Err(e) => {
                tracing::error!(document_id = %doc_id, error = %e, "Document insert failed");
                status.fail(&e.to_string());
                if let Err(write_err) = self.write_status(&doc_id, &status).await {
                    tracing::warn!(document_id = %doc_id, error = %write_err, "Failed to record failure status");
                }
                self.progress
                    .report(PipelineStage::Failed, 0, 1, e.to_string(), Some(&doc_id));
                Err(e)
            },
        }
    }

    async fn index_document(
        &self,
        doc_id: &str,
        content: &str,
        file_path: &str,
        status: &mut DocStatusRecord,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.progress
            .report(PipelineStage::Chunking, 0, 1, "Chunking document", Some(doc_id));
        let chunks = self.chunker.chunk_document(doc_id, content, file_path);
        status.chunk_count = chunks.len();
        status.chunk_ids = chunks.iter().map(|c| c.id.clone()).collect();
        self.write_status(doc_id, status).await?;
        self.progress.report(
            PipelineStage::Chunking,
            1,
            1,
            format!("{} chunks", chunks.len()),
            Some(doc_id),
        );

        let results = self
            .processor
            .process(doc_id, &chunks, Some(&self.progress), cancel)
            .await?;

        ensure_active(cancel, "persist")?;
        self.persist_chunks(&chunks, &results).await?;

        // Recorded before merging so a partly merged document can still be deleted
        let batch = reduce_chunk_results(&results);
        status.entity_keys = batch.entities.keys().cloned().collect();
        status.relation_keys = batch.relations.keys().cloned().collect();
        self.write_status(doc_id, status).await?;

        let report = self
            .merge
            .merge(doc_id, &results, Some(&self.progress), cancel)
            .await?;
        tracing::debug!(document_id = doc_id, ?report, "Merge finished");

        ensure_active(cancel, "persist")?;
        self.progress
            .report(PipelineStage::Persisting, 0, 1, "Flushing stores", Some(doc_id));
        self.storage.flush_all().await?;
        Ok(())
    }

    async fn persist_chunks(&self, chunks: &[Chunk], results: &[ChunkResult]) -> Result<()> {
        let mut records = Vec::with_capacity(chunks.len());
        let mut vectors = Vec::with_capacity(chunks.len());
        for (chunk, result) in chunks.iter().zip(results) {
            records.push((chunk.id.clone(), chunk.to_record()?));

            let mut metadata = KvRecord::new();
            metadata.insert("full_doc_id".to_string(), chunk.full_doc_id.clone().into());
            metadata.insert("file_path".to_string(), chunk.file_path.clone().into());
            metadata.insert("order_index".to_string(), chunk.order_index.into());
            vectors.push(VectorDocument {
                id: chunk.id.clone(),
                vector: result.embedding.clone(),
                content: chunk.content.clone(),
                metadata,
            });
        }
        self.storage.text_chunks.upsert(records).await?;
        self.storage.chunk_vectors.upsert(vectors).await?;
        Ok(())
    }

    /// Status record of a document
    pub async fn document_status(&self, doc_id: &str) -> Result<Option<DocStatusRecord>> {
        self.storage
            .doc_status
            .get_by_id(doc_id)
            .await?
            .map(DocStatusRecord::from_record)
            .transpose()
    }

    async fn write_status(&self, doc_id: &str, status: &DocStatusRecord) -> Result<()> {
        self.storage
            .doc_status
            .upsert(vec![(doc_id.to_string(), status.to_record()?)])
            .await
    }

    /// Remove a document, its chunks and its graph provenance
    ///
    /// Entities and relationships mentioned only by this document are
    /// deleted; others keep their descriptions and lose the document's
    /// chunks from their provenance.
    pub async fn delete_document(&self, doc_id: &str) -> Result<RemovalReport> {
        let cancel = CancellationToken::new();
        let status = self
            .document_status(doc_id)
            .await?
            .ok_or_else(|| RagError::NotFound {
                resource: "document".to_string(),
                id: doc_id.to_string(),
            })?;
        tracing::info!(document_id = doc_id, chunks = status.chunk_ids.len(), "Deleting document");
        self.progress
            .report(PipelineStage::Deleting, 0, 1, "Deleting document", Some(doc_id));

        let chunk_ids: BTreeSet<String> = status.chunk_ids.iter().cloned().collect();
        let report = self
            .merge
            .remove_document(
                doc_id,
                &chunk_ids,
                &status.entity_keys,
                &status.relation_keys,
                &cancel,
            )
            .await?;

        self.storage.chunk_vectors.delete(&status.chunk_ids).await?;
        self.storage.text_chunks.delete(&status.chunk_ids).await?;
        let ids = [doc_id.to_string()];
        self.storage.full_docs.delete(&ids).await?;
        self.storage.doc_status.delete(&ids).await?;
        self.storage.flush_all().await?;

        tracing::info!(document_id = doc_id, ?report, "Document deleted");
        self.progress
            .report(PipelineStage::Deleting, 1, 1, "Document deleted", Some(doc_id));
        Ok(report)
    }

    /// Drop every document, chunk, entity and relationship
    pub async fn reset(&self) -> Result<()> {
        tracing::warn!("Resetting knowledge base");
        self.storage.drop_all().await
    }

    /// Bounded subgraph around `label`, or the whole graph for `*`
    pub async fn knowledge_graph(
        &self,
        label: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<KnowledgeGraph> {
        self.storage
            .graph
            .get_knowledge_graph(label, max_depth, max_nodes)
            .await
    }

    /// Display names of the highest-degree entities
    pub async fn popular_labels(&self, limit: usize) -> Result<Vec<String>> {
        self.storage.graph.popular_labels(limit).await
    }

    /// Answer `query`
    pub async fn query(&self, query: &str, param: &QueryParam) -> Result<QueryResponse> {
        self.query_with_cancel(query, param, &CancellationToken::new())
            .await
    }

    /// [`query`](Self::query) observing `cancel`
    pub async fn query_with_cancel(
        &self,
        query: &str,
        param: &QueryParam,
        cancel: &CancellationToken,
    ) -> Result<QueryResponse> {
        let query = query.trim();
        if query.is_empty() {
            return Err(RagError::Validation {
                message: "query is empty".to_string(),
            });
        }
        param.validate()?;
        ensure_active(cancel, "query")?;
        self.progress.report(
            PipelineStage::Querying,
            0,
            1,
            format!("{} query", param.mode),
            None,
        );

        let keywords = if param.has_keywords() {
            QueryKeywords::new(
                param.high_level_keywords.clone(),
                param.low_level_keywords.clone(),
            )
        } else if param.mode == QueryMode::Naive {
            QueryKeywords::default()
        } else {
            self.keyword_extractor.extract(query).await?
        };

        let Some(context) = self
            .context_builder
            .build(query, &keywords, param, cancel)
            .await?
        else {
            self.progress
                .report(PipelineStage::Querying, 1, 1, "No context matched", None);
            return Ok(QueryResponse::no_context(keywords));
        };
        let references = context.references.clone();

        if param.only_need_context {
            self.progress
                .report(PipelineStage::Querying, 1, 1, "Context built", None);
            return Ok(QueryResponse {
                content: QueryOutput::Text(context.context_text.clone()),
                references,
                context: Some(context),
                keywords,
            });
        }

        ensure_active(cancel, "generation")?;
        let system_prompt = fill(
            RAG_RESPONSE_PROMPT,
            &[
                ("response_type", &param.response_type),
                ("user_prompt", param.user_prompt.as_deref().unwrap_or_default()),
                ("context_data", &context.context_text),
            ],
        );
        let request = GenerationRequest::new(query)
            .with_system_prompt(system_prompt)
            .with_history(param.conversation_history.clone());

        let content = if param.stream {
            QueryOutput::Stream(self.llm.generate_stream(&request).await?)
        } else {
            QueryOutput::Text(self.llm.generate(&request).await?)
        };
        self.progress
            .report(PipelineStage::Querying, 1, 1, "Answer generated", None);
        Ok(QueryResponse {
            content,
            references,
            context: Some(context),
            keywords,
        })
    }
}
