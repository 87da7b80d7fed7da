//! Collaborator traits consumed by the merge engine and the retrieval builder
//!
//! Every external service (language model, embedding, rerank) and every
//! storage engine (graph, vector, key-value) is reached through one of the
//! async traits below. Implementations must be `Send + Sync` so they can be
//! shared as `Arc<dyn Trait>` across spawned tasks.

use std::collections::HashMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::core::{
    EntityKey, EntityRecord, KnowledgeGraph, KvRecord, RelationKey, RelationRecord, Result,
    VectorDocument, VectorMatch,
};

/// Incremental text fragments produced by a streaming generation
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// Role of a conversation turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// System instruction
    System,
    /// End-user turn
    User,
    /// Model turn
    Assistant,
}

/// One conversation turn
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker
    pub role: ChatRole,
    /// Text of the turn
    pub content: String,
}

impl ChatMessage {
    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Create an assistant turn
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Generation knobs passed by value with every language model call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Sampling temperature
    pub temperature: f32,
    /// Maximum tokens to generate
    pub max_tokens: Option<usize>,
    /// Nucleus sampling cutoff
    pub top_p: Option<f32>,
    /// Stop sequences
    pub stop_sequences: Vec<String>,
}

impl Default for GenerationParams {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            max_tokens: None,
            top_p: None,
            stop_sequences: Vec::new(),
        }
    }
}

impl GenerationParams {
    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the generation cap
    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// A complete language model request
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// User prompt
    pub prompt: String,
    /// Optional system prompt
    pub system_prompt: Option<String>,
    /// Prior conversation turns, oldest first
    pub history: Vec<ChatMessage>,
    /// Sampling parameters
    pub params: GenerationParams,
}

impl GenerationRequest {
    /// Request with only a prompt and default parameters
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            ..Default::default()
        }
    }

    /// Attach a system prompt
    pub fn with_system_prompt(mut self, system_prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(system_prompt.into());
        self
    }

    /// Attach conversation history
    pub fn with_history(mut self, history: Vec<ChatMessage>) -> Self {
        self.history = history;
        self
    }

    /// Replace the sampling parameters
    pub fn with_params(mut self, params: GenerationParams) -> Self {
        self.params = params;
        self
    }
}

/// Text generation service
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Generate a complete response
    async fn generate(&self, request: &GenerationRequest) -> Result<String>;

    /// Generate a response as a stream of fragments
    ///
    /// The default implementation yields the full response as one fragment.
    async fn generate_stream(&self, request: &GenerationRequest) -> Result<TextStream> {
        let text = self.generate(request).await?;
        Ok(Box::pin(futures::stream::once(async move { Ok(text) })))
    }

    /// Model name for logs
    fn model_name(&self) -> &str {
        "unknown"
    }
}

/// Embedding service
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input in order
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| crate::RagError::Embedding {
            message: "embedding service returned no vector".to_string(),
        })
    }

    /// Vector dimension
    fn dimension(&self) -> usize;

    /// Maximum input length in tokens
    fn max_token_size(&self) -> usize;

    /// Maximum number of texts per provider call
    fn max_batch_size(&self) -> usize {
        32
    }
}

/// Relevance score for one reranked document
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RerankScore {
    /// Index into the submitted document list
    pub index: usize,
    /// Relevance to the query, higher is better
    pub relevance_score: f32,
}

/// Rerank service
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score `documents` against `query`, returning at most `top_n` entries
    /// ordered by descending relevance
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankScore>>;
}

/// Property graph storage keyed by entity and relation identity keys
#[async_trait]
pub trait GraphStore: Send + Sync {
    /// Whether a node exists
    async fn has_node(&self, key: &EntityKey) -> Result<bool>;

    /// Whether an edge exists
    async fn has_edge(&self, key: &RelationKey) -> Result<bool>;

    /// Fetch one node
    async fn get_node(&self, key: &EntityKey) -> Result<Option<EntityRecord>>;

    /// Fetch many nodes; missing keys are absent from the map
    async fn get_nodes_batch(
        &self,
        keys: &[EntityKey],
    ) -> Result<HashMap<EntityKey, EntityRecord>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get_node(key).await? {
                found.insert(key.clone(), record);
            }
        }
        Ok(found)
    }

    /// Insert or replace a node
    async fn upsert_node(&self, key: &EntityKey, record: EntityRecord) -> Result<()>;

    /// Delete a node and its incident edges
    async fn delete_node(&self, key: &EntityKey) -> Result<()>;

    /// Fetch one edge
    async fn get_edge(&self, key: &RelationKey) -> Result<Option<RelationRecord>>;

    /// Fetch many edges; missing keys are absent from the map
    async fn get_edges_batch(
        &self,
        keys: &[RelationKey],
    ) -> Result<HashMap<RelationKey, RelationRecord>> {
        let mut found = HashMap::with_capacity(keys.len());
        for key in keys {
            if let Some(record) = self.get_edge(key).await? {
                found.insert(key.clone(), record);
            }
        }
        Ok(found)
    }

    /// Insert or replace an edge; both endpoints must already exist
    async fn upsert_edge(&self, key: &RelationKey, record: RelationRecord) -> Result<()>;

    /// Delete an edge
    async fn delete_edge(&self, key: &RelationKey) -> Result<()>;

    /// Number of edges incident to a node
    async fn node_degree(&self, key: &EntityKey) -> Result<usize>;

    /// Degrees of many nodes; missing nodes report zero
    async fn node_degrees_batch(&self, keys: &[EntityKey]) -> Result<HashMap<EntityKey, usize>> {
        let mut degrees = HashMap::with_capacity(keys.len());
        for key in keys {
            degrees.insert(key.clone(), self.node_degree(key).await?);
        }
        Ok(degrees)
    }

    /// Sum of both endpoint degrees
    async fn edge_degree(&self, key: &RelationKey) -> Result<usize> {
        let (a, b) = key.endpoints();
        Ok(self.node_degree(a).await? + self.node_degree(b).await?)
    }

    /// Edge degrees of many edges
    async fn edge_degrees_batch(
        &self,
        keys: &[RelationKey],
    ) -> Result<HashMap<RelationKey, usize>> {
        let mut degrees = HashMap::with_capacity(keys.len());
        for key in keys {
            degrees.insert(key.clone(), self.edge_degree(key).await?);
        }
        Ok(degrees)
    }

    /// Keys of all edges incident to a node
    async fn get_node_edges(&self, key: &EntityKey) -> Result<Vec<RelationKey>>;

    /// Bounded subgraph around `label` (`*` for the whole graph)
    async fn get_knowledge_graph(
        &self,
        label: &str,
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<KnowledgeGraph>;

    /// Display names of every node, sorted
    async fn all_labels(&self) -> Result<Vec<String>>;

    /// Display names of the highest-degree nodes
    async fn popular_labels(&self, limit: usize) -> Result<Vec<String>>;

    /// Flush after a document's writes are complete
    async fn index_done(&self) -> Result<()>;

    /// Remove every node and edge
    async fn drop_all(&self) -> Result<()>;
}

/// One named vector collection
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Collection name
    fn namespace(&self) -> &str;

    /// Insert or replace records by id
    async fn upsert(&self, documents: Vec<VectorDocument>) -> Result<()>;

    /// Top-k records by cosine similarity at or above `threshold`
    async fn query(&self, vector: &[f32], top_k: usize, threshold: f32)
        -> Result<Vec<VectorMatch>>;

    /// Fetch records by id, skipping unknown ids
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<VectorDocument>>;

    /// Delete records by id
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Flush after a document's writes are complete
    async fn index_done(&self) -> Result<()>;

    /// Remove every record
    async fn drop_all(&self) -> Result<()>;
}

/// One key-value namespace over attribute maps
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Namespace name
    fn namespace(&self) -> &str;

    /// Fetch one record
    async fn get_by_id(&self, id: &str) -> Result<Option<KvRecord>>;

    /// Fetch many records, one slot per requested id
    async fn get_by_ids(&self, ids: &[String]) -> Result<Vec<Option<KvRecord>>> {
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            records.push(self.get_by_id(id).await?);
        }
        Ok(records)
    }

    /// The subset of `keys` not present in the store
    async fn filter_keys(&self, keys: &[String]) -> Result<Vec<String>>;

    /// Insert or replace records
    async fn upsert(&self, records: Vec<(String, KvRecord)>) -> Result<()>;

    /// Delete records by id
    async fn delete(&self, ids: &[String]) -> Result<()>;

    /// Whether the namespace holds no records
    async fn is_empty(&self) -> Result<bool>;

    /// Flush after a document's writes are complete
    async fn index_done(&self) -> Result<()>;

    /// Remove every record
    async fn drop_all(&self) -> Result<()>;
}
