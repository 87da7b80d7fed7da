//! Property tests for identity keys, budget walks and chunking

use std::sync::Arc;

use hybridrag_core::config::ChunkingConfig;
use hybridrag_core::retrieval::take_within_budget;
use hybridrag_core::text::{relation_vector_id, Chunker, Tokenizer, WordTokenizer};
use hybridrag_core::RelationKey;
use proptest::prelude::*;

fn name() -> impl Strategy<Value = String> {
    "[A-Za-z][A-Za-z ]{0,12}"
}

proptest! {
    #[test]
    fn relation_keys_ignore_direction_and_case(a in name(), b in name()) {
        let forward = RelationKey::from_names(&a, &b);
        let backward = RelationKey::from_names(&b.to_uppercase(), &a.to_lowercase());
        prop_assert_eq!(&forward, &backward);
        prop_assert_eq!(relation_vector_id(&forward), relation_vector_id(&backward));
    }

    #[test]
    fn budget_walk_keeps_a_prefix_within_budget(
        lines in prop::collection::vec("[a-z]{1,6}( [a-z]{1,6}){0,8}", 0..20),
        budget in 0usize..60,
    ) {
        let tokenizer = WordTokenizer::new().unwrap();
        let kept = take_within_budget(lines.clone(), budget, &tokenizer, |l| l.clone());

        prop_assert!(kept.tokens <= budget);
        prop_assert_eq!(&kept.items[..], &lines[..kept.items.len()]);
        prop_assert_eq!(kept.truncated, kept.items.len() < lines.len());
        let counted: usize = kept.lines.iter().map(|l| tokenizer.count_tokens(l)).sum();
        prop_assert_eq!(counted, kept.tokens);
    }

    #[test]
    fn chunks_respect_the_token_window(
        words in prop::collection::vec("[a-z]{1,8}", 1..200),
        window in 8usize..40,
    ) {
        let tokenizer: Arc<dyn Tokenizer> = Arc::new(WordTokenizer::new().unwrap());
        let config = ChunkingConfig {
            chunk_token_size: window,
            chunk_overlap_token_size: window / 4,
            ..Default::default()
        };
        let chunker = Chunker::new(tokenizer.clone(), config).unwrap();
        let text = words.join(" ");

        let chunks = chunker.chunk_document("doc-prop", &text, "");
        prop_assert!(!chunks.is_empty());
        for (i, chunk) in chunks.iter().enumerate() {
            prop_assert!(chunk.token_count <= window);
            prop_assert_eq!(chunk.token_count, tokenizer.count_tokens(&chunk.content));
            prop_assert_eq!(chunk.order_index, i);
        }
        let again = chunker.chunk_document("doc-prop", &text, "");
        prop_assert_eq!(chunks, again);
    }
}
