//! Core data structures and abstractions
//!
//! This module contains the records the merge engine writes, the views the
//! retrieval builder reads, the collaborator traits and error handling.

pub mod error;
pub mod mock_providers;
pub mod traits;

pub use error::{ErrorContext, ErrorSeverity, RagError, Result};
pub use traits::*;

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::text::normalize::{normalize_entity_name, normalize_entity_type};

/// Attribute map stored in key-value namespaces and graph views
pub type KvRecord = serde_json::Map<String, serde_json::Value>;

/// Type assigned to entities that are only known as relationship endpoints
pub const UNKNOWN_ENTITY_TYPE: &str = "unknown";

/// Identity key of an entity: its normalized name
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityKey(pub String);

impl EntityKey {
    /// Build the key for a raw extracted name
    pub fn from_name(name: &str) -> Self {
        Self(normalize_entity_name(name))
    }

    /// Borrow the key text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for EntityKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity key of a relationship: the unordered pair of endpoint keys
///
/// The endpoints are stored sorted, so `A -> B` and `B -> A` produce equal
/// keys.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationKey {
    low: EntityKey,
    high: EntityKey,
}

impl RelationKey {
    /// Build the key from two endpoint keys in any order
    pub fn new(a: EntityKey, b: EntityKey) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    /// Build the key from two raw endpoint names
    pub fn from_names(source: &str, target: &str) -> Self {
        Self::new(EntityKey::from_name(source), EntityKey::from_name(target))
    }

    /// Both endpoint keys, smaller first
    pub fn endpoints(&self) -> (&EntityKey, &EntityKey) {
        (&self.low, &self.high)
    }

    /// Whether the relationship touches `key`
    pub fn touches(&self, key: &EntityKey) -> bool {
        &self.low == key || &self.high == key
    }

    /// The endpoint opposite `key`, if `key` is an endpoint
    pub fn other(&self, key: &EntityKey) -> Option<&EntityKey> {
        if &self.low == key {
            Some(&self.high)
        } else if &self.high == key {
            Some(&self.low)
        } else {
            None
        }
    }
}

impl std::fmt::Display for RelationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}<->{}", self.low, self.high)
    }
}

/// A bounded slice of a source document, the unit of embedding and extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic id derived from content and document scope
    pub id: String,
    /// Chunk text
    pub content: String,
    /// Token count under the configured tokenizer
    pub token_count: usize,
    /// Position of the chunk within its document
    pub order_index: usize,
    /// Owning document id
    pub full_doc_id: String,
    /// Source file path of the owning document
    pub file_path: String,
}

impl Chunk {
    /// Serialize into a key-value record
    pub fn to_record(&self) -> Result<KvRecord> {
        to_kv_record(self)
    }

    /// Deserialize from a key-value record
    pub fn from_record(record: KvRecord) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(record))?)
    }
}

/// A stored graph node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    /// Display name (first extracted spelling)
    pub name: String,
    /// Entity type, decided by the first writer
    pub entity_type: String,
    /// Other types extractions proposed for this entity
    #[serde(default)]
    pub alternate_types: BTreeSet<String>,
    /// Deduplicated description fragments, or a single summary
    pub descriptions: Vec<String>,
    /// Chunks that mention this entity
    pub source_chunk_ids: BTreeSet<String>,
    /// Source files of those chunks
    pub file_paths: BTreeSet<String>,
    /// Last modification time
    pub timestamp: DateTime<Utc>,
}

impl EntityRecord {
    /// Identity key of this entity
    pub fn key(&self) -> EntityKey {
        EntityKey::from_name(&self.name)
    }

    /// Description fragments joined into one text
    pub fn description(&self) -> String {
        self.descriptions.join("; ")
    }

    /// Whether the entity was created only as a relationship endpoint
    pub fn is_placeholder(&self) -> bool {
        self.entity_type == UNKNOWN_ENTITY_TYPE
    }

    /// Text embedded into the entity vector collection
    pub fn embedding_text(&self) -> String {
        format!("{}\n{}", self.name, self.description())
    }
}

/// A stored graph edge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelationRecord {
    /// Display name of the source endpoint as first extracted
    pub source: String,
    /// Display name of the target endpoint as first extracted
    pub target: String,
    /// Deduplicated relationship keywords
    pub keywords: Vec<String>,
    /// Deduplicated description fragments, or a single summary
    pub descriptions: Vec<String>,
    /// Sum of all contributing extraction weights
    pub weight: f64,
    /// Chunks that mention this relationship
    pub source_chunk_ids: BTreeSet<String>,
    /// Source files of those chunks
    pub file_paths: BTreeSet<String>,
    /// Last modification time
    pub timestamp: DateTime<Utc>,
}

impl RelationRecord {
    /// Identity key of this relationship
    pub fn key(&self) -> RelationKey {
        RelationKey::from_names(&self.source, &self.target)
    }

    /// Description fragments joined into one text
    pub fn description(&self) -> String {
        self.descriptions.join("; ")
    }

    /// Keywords joined for display
    pub fn keyword_text(&self) -> String {
        self.keywords.join(", ")
    }

    /// Text embedded into the relationship vector collection
    pub fn embedding_text(&self) -> String {
        format!(
            "{}\t{}\n{}\n{}",
            self.keyword_text(),
            self.source,
            self.target,
            self.description()
        )
    }
}

/// An entity as parsed from one chunk's extraction output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedEntity {
    /// Raw name
    pub name: String,
    /// Raw type
    pub entity_type: String,
    /// Description fragment
    pub description: String,
}

impl ExtractedEntity {
    /// Identity key of the extracted entity
    pub fn key(&self) -> EntityKey {
        EntityKey::from_name(&self.name)
    }

    /// Normalized type
    pub fn normalized_type(&self) -> String {
        normalize_entity_type(&self.entity_type)
    }
}

/// A relationship as parsed from one chunk's extraction output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractedRelationship {
    /// Raw source name
    pub source: String,
    /// Raw target name
    pub target: String,
    /// Keywords describing the relationship
    pub keywords: Vec<String>,
    /// Description fragment
    pub description: String,
    /// Extraction weight, 1.0 unless the model gave one
    pub weight: f64,
}

impl ExtractedRelationship {
    /// Identity key of the extracted relationship
    pub fn key(&self) -> RelationKey {
        RelationKey::from_names(&self.source, &self.target)
    }
}

/// Parsed extraction output for one chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExtractionResult {
    /// Extracted entities
    pub entities: Vec<ExtractedEntity>,
    /// Extracted relationships
    pub relationships: Vec<ExtractedRelationship>,
}

/// Per-chunk output of the chunk processor, input to the merge engine
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkResult {
    /// Chunk the extraction came from
    pub chunk_id: String,
    /// Source file of the chunk
    pub file_path: String,
    /// Chunk embedding
    pub embedding: Vec<f32>,
    /// Extracted entities
    pub entities: Vec<ExtractedEntity>,
    /// Extracted relationships
    pub relationships: Vec<ExtractedRelationship>,
}

/// A record in a vector collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorDocument {
    /// Record id
    pub id: String,
    /// Embedding vector
    pub vector: Vec<f32>,
    /// Text the vector was computed from
    pub content: String,
    /// Arbitrary metadata
    pub metadata: KvRecord,
}

/// A similarity query hit
#[derive(Debug, Clone, PartialEq)]
pub struct VectorMatch {
    /// Record id
    pub id: String,
    /// Cosine similarity to the query vector
    pub score: f32,
    /// Stored content
    pub content: String,
    /// Stored metadata
    pub metadata: KvRecord,
}

/// Node of a query-time graph view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphNode {
    /// Entity key
    pub id: String,
    /// Labels (display name and type)
    pub labels: Vec<String>,
    /// Entity attributes
    pub properties: KvRecord,
}

/// Edge of a query-time graph view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphEdge {
    /// Relation key rendered as text
    pub id: String,
    /// Edge type label
    pub edge_type: String,
    /// Source entity key
    pub source: String,
    /// Target entity key
    pub target: String,
    /// Relationship attributes
    pub properties: KvRecord,
}

/// Bounded subgraph returned by graph stores, derived and never persisted
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeGraph {
    /// Nodes in the view
    pub nodes: Vec<GraphNode>,
    /// Edges between nodes in the view
    pub edges: Vec<GraphEdge>,
    /// Whether the node cap cut the traversal short
    pub is_truncated: bool,
}

/// Serialize any record into a key-value attribute map
pub fn to_kv_record<T: Serialize>(value: &T) -> Result<KvRecord> {
    match serde_json::to_value(value)? {
        serde_json::Value::Object(map) => Ok(map),
        other => {
            let mut map = KvRecord::new();
            map.insert("value".to_string(), other);
            Ok(map)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relation_key_is_unordered() {
        assert_eq!(
            RelationKey::from_names("Alice", "Bob"),
            RelationKey::from_names("bob", "  ALICE ")
        );
    }

    #[test]
    fn relation_key_other_endpoint() {
        let key = RelationKey::from_names("Alice", "Bob");
        let alice = EntityKey::from_name("alice");
        assert_eq!(key.other(&alice), Some(&EntityKey::from_name("bob")));
        assert!(key.other(&EntityKey::from_name("carol")).is_none());
    }

    #[test]
    fn chunk_record_round_trip_keeps_fields() {
        let chunk = Chunk {
            id: "chunk-1".to_string(),
            content: "hello".to_string(),
            token_count: 1,
            order_index: 0,
            full_doc_id: "doc-1".to_string(),
            file_path: "notes.txt".to_string(),
        };
        let record = chunk.to_record().unwrap();
        assert_eq!(record["full_doc_id"], "doc-1");
        assert_eq!(Chunk::from_record(record).unwrap(), chunk);
    }
}
