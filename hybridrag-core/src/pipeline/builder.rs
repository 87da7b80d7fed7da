//! Builder for [`HybridRag`] instances
//!
//! Collaborators are supplied as trait objects. The language model and the
//! embedder are required; the tokenizer defaults to [`WordTokenizer`] and the
//! stores to fresh in-memory ones.

use std::sync::Arc;

use crate::async_processing::{ChunkProcessor, EmbeddingGate, ExtractionLimiter, ProgressDispatcher};
use crate::config::RagConfig;
use crate::core::{Embedder, LanguageModel, RagError, Reranker, Result};
use crate::extraction::{DescriptionSummarizer, EntityExtractor, KeywordExtractor};
use crate::graph::MergeEngine;
use crate::pipeline::HybridRag;
use crate::retrieval::ContextBuilder;
use crate::storage::StorageSet;
use crate::text::{Chunker, Tokenizer, WordTokenizer};

const DEFAULT_PROGRESS_CAPACITY: usize = 1024;

/// Builder for [`HybridRag`]
pub struct HybridRagBuilder {
    config: RagConfig,
    llm: Option<Arc<dyn LanguageModel>>,
    embedder: Option<Arc<dyn Embedder>>,
    reranker: Option<Arc<dyn Reranker>>,
    tokenizer: Option<Arc<dyn Tokenizer>>,
    storage: Option<StorageSet>,
    progress_capacity: usize,
}

impl Default for HybridRagBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for HybridRagBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRagBuilder")
            .field("config", &self.config)
            .field("llm", &self.llm.is_some())
            .field("embedder", &self.embedder.is_some())
            .field("reranker", &self.reranker.is_some())
            .finish_non_exhaustive()
    }
}

impl HybridRagBuilder {
    /// Builder with the default configuration
    pub fn new() -> Self {
        Self {
            config: RagConfig::default(),
            llm: None,
            embedder: None,
            reranker: None,
            tokenizer: None,
            storage: None,
            progress_capacity: DEFAULT_PROGRESS_CAPACITY,
        }
    }

    /// Use `config`
    pub fn with_config(mut self, config: RagConfig) -> Self {
        self.config = config;
        self
    }

    /// Language model for extraction, keywords, summaries and answers
    pub fn with_language_model(mut self, llm: Arc<dyn LanguageModel>) -> Self {
        self.llm = Some(llm);
        self
    }

    /// Embedding service
    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Rerank service for query-time chunk ordering
    pub fn with_reranker(mut self, reranker: Arc<dyn Reranker>) -> Self {
        self.reranker = Some(reranker);
        self
    }

    /// Token counter for chunking and budgets
    pub fn with_tokenizer(mut self, tokenizer: Arc<dyn Tokenizer>) -> Self {
        self.tokenizer = Some(tokenizer);
        self
    }

    /// Stores to read and write
    pub fn with_storage(mut self, storage: StorageSet) -> Self {
        self.storage = Some(storage);
        self
    }

    /// How far a progress subscriber may lag before losing events
    pub fn with_progress_capacity(mut self, capacity: usize) -> Self {
        self.progress_capacity = capacity;
        self
    }

    /// Validate the configuration and wire every component
    ///
    /// Must be called inside a tokio runtime; the progress dispatcher task is
    /// spawned here.
    pub fn build(self) -> Result<HybridRag> {
        self.config.validate()?;
        let llm = self.llm.ok_or_else(|| RagError::Config {
            message: "a language model is required".to_string(),
        })?;
        let embedder = self.embedder.ok_or_else(|| RagError::Config {
            message: "an embedder is required".to_string(),
        })?;
        let tokenizer: Arc<dyn Tokenizer> = match self.tokenizer {
            Some(tokenizer) => tokenizer,
            None => Arc::new(WordTokenizer::new()?),
        };
        let storage = match self.storage {
            Some(storage) => storage,
            None => default_storage()?,
        };
        let config = self.config;

        let embeddings = Arc::new(EmbeddingGate::new(embedder, &config.concurrency));
        let limiter = Arc::new(ExtractionLimiter::new(
            config.concurrency.max_concurrent_extractions,
        ));
        let extractor = Arc::new(EntityExtractor::new(
            Arc::clone(&llm),
            limiter,
            config.extraction.clone(),
        ));
        let summarizer = Arc::new(DescriptionSummarizer::new(
            Arc::clone(&llm),
            config.extraction.language.clone(),
            config.merge.summary_target_tokens,
            config.extraction.temperature,
        ));

        let chunker = Chunker::new(Arc::clone(&tokenizer), config.chunking.clone())?;
        let processor = ChunkProcessor::new(
            Arc::clone(&embeddings),
            extractor,
            config.concurrency.max_parallel_chunks,
        );
        let merge = MergeEngine::new(
            storage.clone(),
            Arc::clone(&embeddings),
            summarizer,
            Arc::clone(&tokenizer),
            config.merge.clone(),
        );
        let context_builder =
            ContextBuilder::new(storage.clone(), embeddings, self.reranker, tokenizer);
        let keyword_extractor = KeywordExtractor::new(
            Arc::clone(&llm),
            config.extraction.language.clone(),
            config.extraction.temperature,
        );
        let (progress, dispatcher) = ProgressDispatcher::spawn(self.progress_capacity);

        tracing::info!(model = llm.model_name(), "Knowledge base ready");
        Ok(HybridRag {
            config,
            storage,
            llm,
            chunker,
            processor,
            merge,
            context_builder,
            keyword_extractor,
            progress,
            dispatcher,
        })
    }
}

#[cfg(feature = "memory-storage")]
fn default_storage() -> Result<StorageSet> {
    Ok(StorageSet::in_memory())
}

#[cfg(not(feature = "memory-storage"))]
fn default_storage() -> Result<StorageSet> {
    Err(RagError::Config {
        message: "no storage supplied and the memory-storage feature is disabled".to_string(),
    })
}
