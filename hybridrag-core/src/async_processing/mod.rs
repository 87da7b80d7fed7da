//! Async processing utilities for ingestion and querying
//!
//! This module provides the concurrency plumbing around the core:
//! - Bounded per-document chunk fan-out
//! - Concurrency cap for extraction calls and throttling for embeddings
//! - Progress events relayed by a background dispatcher
//! - Cancellation checks shared by every stage

use tokio_util::sync::CancellationToken;

use crate::core::{RagError, Result};

pub mod chunk_processor;
pub mod progress;
pub mod rate_limiting;

pub use chunk_processor::ChunkProcessor;
pub use progress::{PipelineStage, ProgressDispatcher, ProgressEvent, ProgressReporter};
pub use rate_limiting::{EmbeddingGate, ExtractionLimiter};

/// Fail with [`RagError::Cancelled`] if `token` has been cancelled
pub fn ensure_active(token: &CancellationToken, stage: &str) -> Result<()> {
    if token.is_cancelled() {
        tracing::info!(stage, "Cancellation observed");
        return Err(RagError::Cancelled {
            stage: stage.to_string(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_token_fails_with_stage() {
        let token = CancellationToken::new();
        assert!(ensure_active(&token, "merge").is_ok());

        token.cancel();
        match ensure_active(&token, "merge") {
            Err(RagError::Cancelled { stage }) => assert_eq!(stage, "merge"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn child_tokens_observe_parent_cancellation() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        parent.cancel();
        assert!(ensure_active(&child, "chunking").is_err());
    }
}
