//! Token-bounded overlapping chunking.
//!
//! Documents are cut into windows of at most `chunk_token_size` tokens that
//! overlap by `chunk_overlap_token_size` tokens. An optional separator splits
//! the document first; pieces that still exceed the window are cut further
//! unless `split_by_character_only` is set.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::config::ChunkingConfig;
use crate::core::{Chunk, Result};
use crate::text::hashing::chunk_id;
use crate::text::tokenizer::Tokenizer;

/// Splits documents into [`Chunk`]s
#[derive(Debug, Clone)]
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    config: ChunkingConfig,
}

impl Chunker {
    /// Create a chunker; the config must already be validated
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: ChunkingConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { tokenizer, config })
    }

    /// Chunk one document
    ///
    /// Chunk ids are derived from `doc_id` and the chunk text, so the same
    /// content always yields the same ids. Identical pieces inside one
    /// document collapse into the first occurrence.
    pub fn chunk_document(&self, doc_id: &str, content: &str, file_path: &str) -> Vec<Chunk> {
        let pieces = match self.config.split_by_character.as_deref() {
            Some(separator) if !separator.is_empty() => self.split_on_separator(content, separator),
            _ => self.token_windows(content),
        };

        let mut chunks: IndexMap<String, Chunk> = IndexMap::new();
        for piece in pieces {
            let text = piece.trim();
            if text.is_empty() {
                continue;
            }
            let id = chunk_id(doc_id, text);
            if chunks.contains_key(&id) {
                continue;
            }
            let order_index = chunks.len();
            chunks.insert(
                id.clone(),
                Chunk {
                    id,
                    content: text.to_string(),
                    token_count: self.tokenizer.count_tokens(text),
                    order_index,
                    full_doc_id: doc_id.to_string(),
                    file_path: file_path.to_string(),
                },
            );
        }

        tracing::debug!(
            document_id = %doc_id,
            chunk_count = chunks.len(),
            "Chunked document"
        );
        chunks.into_values().collect()
    }

    fn split_on_separator<'a>(&self, content: &'a str, separator: &str) -> Vec<&'a str> {
        let mut pieces = Vec::new();
        for piece in content.split(separator) {
            if self.config.split_by_character_only {
                let tokens = self.tokenizer.count_tokens(piece);
                if tokens > self.config.chunk_token_size {
                    tracing::warn!(
                        tokens,
                        limit = self.config.chunk_token_size,
                        "Separator piece exceeds chunk token size"
                    );
                }
                pieces.push(piece);
            } else {
                pieces.extend(self.token_windows(piece));
            }
        }
        pieces
    }

    /// Slice `text` into overlapping token windows, keeping original spacing
    fn token_windows<'a>(&self, text: &'a str) -> Vec<&'a str> {
        let spans = self.tokenizer.token_spans(text);
        if spans.is_empty() {
            return Vec::new();
        }

        let size = self.config.chunk_token_size;
        let step = size - self.config.chunk_overlap_token_size;
        let mut windows = Vec::new();
        let mut start = 0;
        loop {
            let end = (start + size).min(spans.len());
            windows.push(&text[spans[start].start..spans[end - 1].end]);
            if end == spans.len() {
                break;
            }
            start += step;
        }
        windows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::text::tokenizer::WordTokenizer;

    fn chunker(size: usize, overlap: usize) -> Chunker {
        let config = ChunkingConfig {
            chunk_token_size: size,
            chunk_overlap_token_size: overlap,
            ..Default::default()
        };
        Chunker::new(Arc::new(WordTokenizer::new().unwrap()), config).unwrap()
    }

    #[test]
    fn windows_overlap_by_configured_tokens() {
        let chunks = chunker(4, 1).chunk_document("doc-1", "a b c d e f g", "f.txt");
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["a b c d", "d e f g"]);
        assert!(chunks.iter().all(|c| c.token_count <= 4));
        assert_eq!(chunks[1].order_index, 1);
    }

    #[test]
    fn rechunking_yields_identical_ids() {
        let chunker = chunker(3, 0);
        let first = chunker.chunk_document("doc-1", "one two three four", "f.txt");
        let second = chunker.chunk_document("doc-1", "one two three four", "f.txt");
        assert_eq!(first, second);
    }

    #[test]
    fn separator_pieces_are_split_further_when_oversized() {
        let config = ChunkingConfig {
            chunk_token_size: 2,
            chunk_overlap_token_size: 0,
            split_by_character: Some("\n\n".to_string()),
            split_by_character_only: false,
        };
        let chunker = Chunker::new(Arc::new(WordTokenizer::new().unwrap()), config).unwrap();
        let chunks = chunker.chunk_document("doc-1", "x y z\n\nw", "f.txt");
        let contents: Vec<&str> = chunks.iter().map(|c| c.content.as_str()).collect();
        assert_eq!(contents, vec!["x y", "z", "w"]);
    }

    #[test]
    fn blank_document_has_no_chunks() {
        assert!(chunker(4, 1).chunk_document("doc-1", "  \n ", "f.txt").is_empty());
    }

    #[test]
    fn overlap_must_be_smaller_than_window() {
        let config = ChunkingConfig {
            chunk_token_size: 4,
            chunk_overlap_token_size: 4,
            ..Default::default()
        };
        assert!(Chunker::new(Arc::new(WordTokenizer::new().unwrap()), config).is_err());
    }
}
