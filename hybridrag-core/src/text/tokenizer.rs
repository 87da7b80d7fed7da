//! Token counting.
//!
//! Budgets throughout the crate are measured with a [`Tokenizer`]. The
//! default [`WordTokenizer`] treats every word and every punctuation mark as
//! one token, which keeps counts additive across newline-joined sections.

use std::fmt::Debug;
use std::ops::Range;

use regex::Regex;

use crate::core::Result;

/// Splits text into tokens
pub trait Tokenizer: Send + Sync + Debug {
    /// Byte ranges of each token in `text`, in order
    fn token_spans(&self, text: &str) -> Vec<Range<usize>>;

    /// Number of tokens in `text`
    fn count_tokens(&self, text: &str) -> usize {
        self.token_spans(text).len()
    }
}

/// Word and punctuation tokenizer
#[derive(Debug, Clone)]
pub struct WordTokenizer {
    pattern: Regex,
}

impl WordTokenizer {
    /// Create the tokenizer
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(r"\w+|[^\w\s]")?,
        })
    }
}

impl Tokenizer for WordTokenizer {
    fn token_spans(&self, text: &str) -> Vec<Range<usize>> {
        self.pattern.find_iter(text).map(|m| m.range()).collect()
    }

    fn count_tokens(&self, text: &str) -> usize {
        self.pattern.find_iter(text).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_words_and_punctuation() {
        let tokenizer = WordTokenizer::new().unwrap();
        assert_eq!(tokenizer.count_tokens("Alice met Bob."), 4);
        assert_eq!(tokenizer.count_tokens("   "), 0);
    }

    #[test]
    fn counts_are_additive_across_lines() {
        let tokenizer = WordTokenizer::new().unwrap();
        let a = "Alice (person): a mathematician";
        let b = "Bob -> Alice: knows";
        assert_eq!(
            tokenizer.count_tokens(&format!("{a}\n{b}")),
            tokenizer.count_tokens(a) + tokenizer.count_tokens(b)
        );
    }

    #[test]
    fn spans_slice_original_text() {
        let tokenizer = WordTokenizer::new().unwrap();
        let text = "héllo, wörld";
        let words: Vec<&str> = tokenizer
            .token_spans(text)
            .into_iter()
            .map(|r| &text[r])
            .collect();
        assert_eq!(words, vec!["héllo", ",", "wörld"]);
    }
}
