//! Deterministic identifiers derived from content.

use sha2::{Digest, Sha256};

use crate::core::{EntityKey, RelationKey};

/// Hex SHA-256 digest of `content`
pub fn content_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// `prefix` followed by the content hash
pub fn compute_id(prefix: &str, content: &str) -> String {
    format!("{prefix}{}", content_hash(content))
}

/// Document id for raw document content
pub fn document_id(content: &str) -> String {
    compute_id("doc-", content.trim())
}

/// Chunk id scoped to its owning document
pub fn chunk_id(doc_id: &str, content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(doc_id.as_bytes());
    hasher.update([0x1f]);
    hasher.update(content.as_bytes());
    format!("chunk-{:x}", hasher.finalize())
}

/// Vector record id of an entity
pub fn entity_vector_id(key: &EntityKey) -> String {
    compute_id("ent-", key.as_str())
}

/// Vector record id of a relationship
pub fn relation_vector_id(key: &RelationKey) -> String {
    let (a, b) = key.endpoints();
    compute_id("rel-", &format!("{a}\u{1f}{b}"))
}
