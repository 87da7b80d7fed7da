/// Chunking of documents into token-bounded overlapping windows
pub mod chunking;
/// Deterministic content-derived identifiers
pub mod hashing;
/// Name and type normalization applied at every read and write boundary
pub mod normalize;
/// Token counting
pub mod tokenizer;

pub use chunking::Chunker;
pub use hashing::{chunk_id, compute_id, content_hash, document_id, entity_vector_id, relation_vector_id};
pub use normalize::{clean_text, normalize_entity_name, normalize_entity_type};
pub use tokenizer::{Tokenizer, WordTokenizer};
