//! Per-document processing status

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::core::{to_kv_record, EntityKey, KvRecord, RelationKey, Result};

/// Characters of content kept in a status record
const SUMMARY_CHARS: usize = 100;

/// Processing state of a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocStatus {
    /// Accepted, not started
    Pending,
    /// Chunking, extraction or merge in progress
    Processing,
    /// Fully indexed
    Processed,
    /// Stopped on an error; a re-insert retries it
    Failed,
}

/// Status record stored in the `doc_status` namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocStatusRecord {
    /// Current state
    pub status: DocStatus,
    /// Number of chunks
    pub chunk_count: usize,
    /// Chunk ids of the document
    #[serde(default)]
    pub chunk_ids: Vec<String>,
    /// Entities the document contributed to
    #[serde(default)]
    pub entity_keys: Vec<EntityKey>,
    /// Relationships the document contributed to
    #[serde(default)]
    pub relation_keys: Vec<RelationKey>,
    /// Error text of a failed run
    #[serde(default)]
    pub error: Option<String>,
    /// Source file path
    pub file_path: String,
    /// Leading characters of the content
    pub content_summary: String,
    /// First time the document was seen
    pub created_at: DateTime<Utc>,
    /// Last status change
    pub updated_at: DateTime<Utc>,
}

impl DocStatusRecord {
    /// A fresh record in the `Processing` state
    pub fn processing(content: &str, file_path: &str) -> Self {
        let now = Utc::now();
        Self {
            status: DocStatus::Processing,
            chunk_count: 0,
            chunk_ids: Vec::new(),
            entity_keys: Vec::new(),
            relation_keys: Vec::new(),
            error: None,
            file_path: file_path.to_string(),
            content_summary: summarize_content(content),
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `status`, stamping the update time
    pub fn transition(&mut self, status: DocStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }

    /// Mark failed with `error`
    pub fn fail(&mut self, error: &str) {
        self.error = Some(error.to_string());
        self.transition(DocStatus::Failed);
    }

    /// Serialize into a key-value record
    pub fn to_record(&self) -> Result<KvRecord> {
        to_kv_record(self)
    }

    /// Deserialize from a key-value record
    pub fn from_record(record: KvRecord) -> Result<Self> {
        Ok(serde_json::from_value(serde_json::Value::Object(record))?)
    }
}

fn summarize_content(content: &str) -> String {
    let trimmed = content.trim();
    match trimmed.char_indices().nth(SUMMARY_CHARS) {
        Some((end, _)) => format!("{}...", &trimmed[..end]),
        None => trimmed.to_string(),
    }
}
