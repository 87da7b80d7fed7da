//! Rate limiting for external model calls.
//!
//! # Main Types
//!
//! - [`ExtractionLimiter`]: semaphore capping simultaneous extraction calls
//!   to the language model. Callers over the cap wait for a permit.
//! - [`EmbeddingGate`]: wraps an [`Embedder`] with a single-slot gate that
//!   spaces requests by a minimum interval, splits batches to the provider
//!   limit, validates input and retries transient failures with exponential
//!   backoff.
//!
//! # Basic Usage
//!
//! ```rust,ignore
//! use hybridrag_core::async_processing::{EmbeddingGate, ExtractionLimiter};
//!
//! let limiter = ExtractionLimiter::new(10);
//! let permit = limiter.acquire().await?;
//! // ... make the extraction call ...
//! drop(permit);
//!
//! let gate = EmbeddingGate::new(embedder, &config.concurrency);
//! let vectors = gate.embed_batch(&texts).await?;
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{self, Instant};

use crate::config::ConcurrencyConfig;
use crate::core::{Embedder, RagError, Result};

/// Caps concurrent extraction calls
#[derive(Debug)]
pub struct ExtractionLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ExtractionLimiter {
    /// Create a limiter allowing `capacity` simultaneous calls
    pub fn new(capacity: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
        }
    }

    /// Wait for a free slot; the slot is released when the permit drops
    pub async fn acquire(&self) -> Result<SemaphorePermit<'_>> {
        self.semaphore
            .acquire()
            .await
            .map_err(|e| RagError::RateLimit {
                message: format!("Failed to acquire extraction permit: {e}"),
            })
    }

    /// Slots currently free
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Configured cap
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Throttled, retrying front for an embedding service
pub struct EmbeddingGate {
    embedder: Arc<dyn Embedder>,
    /// Time the last request was released; holding the lock is the slot
    last_release: Mutex<Option<Instant>>,
    min_interval: Duration,
    max_attempts: u32,
    backoff_base: Duration,
}

impl std::fmt::Debug for EmbeddingGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmbeddingGate")
            .field("min_interval", &self.min_interval)
            .field("max_attempts", &self.max_attempts)
            .field("backoff_base", &self.backoff_base)
            .finish()
    }
}

impl EmbeddingGate {
    /// Wrap `embedder` with the throttling settings from `config`
    pub fn new(embedder: Arc<dyn Embedder>, config: &ConcurrencyConfig) -> Self {
        Self {
            embedder,
            last_release: Mutex::new(None),
            min_interval: config.embedding_min_interval(),
            max_attempts: config.embedding_max_attempts.max(1),
            backoff_base: config.embedding_backoff_base(),
        }
    }

    /// Vector dimension of the wrapped embedder
    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    /// Embed one text
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut vectors = self.embed_batch(&[text.to_string()]).await?;
        vectors.pop().ok_or_else(|| RagError::Embedding {
            message: "embedding service returned no vector".to_string(),
        })
    }

    /// Embed many texts, splitting into provider-sized calls
    ///
    /// Empty or whitespace-only input is rejected before any call is made.
    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if let Some(position) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(RagError::Validation {
                message: format!("embedding input {position} is empty"),
            });
        }

        let batch_size = self.embedder.max_batch_size().max(1);
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(batch_size) {
            let embedded = self.call_with_retry(batch).await?;
            if embedded.len() != batch.len() {
                return Err(RagError::Embedding {
                    message: format!(
                        "embedding service returned {} vectors for {} inputs",
                        embedded.len(),
                        batch.len()
                    ),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }

    async fn call_with_retry(&self, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt = 1;
        loop {
            self.wait_for_slot().await;
            match self.embedder.embed_batch(batch).await {
                Ok(vectors) => return Ok(vectors),
                Err(e) if e.is_transient() && attempt < self.max_attempts => {
                    let delay = backoff_delay(self.backoff_base, attempt);
                    tracing::warn!(
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Embedding request failed, retrying"
                    );
                    time::sleep(delay).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// Block until `min_interval` has passed since the previous request
    async fn wait_for_slot(&self) {
        let mut last = self.last_release.lock().await;
        if let Some(previous) = *last {
            let ready_at = previous + self.min_interval;
            if Instant::now() < ready_at {
                time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
    }
}

/// Delay before retry number `attempt`, doubling from `base` and saturating
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Fails the first `failures` calls with the given error kind
    struct FlakyEmbedder {
        failures: usize,
        transient: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Embedder for FlakyEmbedder {
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.failures {
                return Err(if self.transient {
                    RagError::RateLimit {
                        message: "429 Too Many Requests".to_string(),
                    }
                } else {
                    RagError::Embedding {
                        message: "model not found".to_string(),
                    }
                });
            }
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }

        fn dimension(&self) -> usize {
            2
        }

        fn max_token_size(&self) -> usize {
            512
        }

        fn max_batch_size(&self) -> usize {
            2
        }
    }

    fn gate(failures: usize, transient: bool) -> (Arc<FlakyEmbedder>, EmbeddingGate) {
        let embedder = Arc::new(FlakyEmbedder {
            failures,
            transient,
            calls: AtomicUsize::new(0),
        });
        let gate = EmbeddingGate::new(embedder.clone(), &ConcurrencyConfig::default());
        (embedder, gate)
    }

    #[tokio::test(start_paused = true)]
    async fn transient_failures_are_retried() {
        let (embedder, gate) = gate(2, true);
        let vector = gate.embed("hello").await.unwrap();
        assert_eq!(vector.len(), 2);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn retries_stop_at_attempt_cap() {
        let (embedder, gate) = gate(5, true);
        let err = gate.embed("hello").await.unwrap_err();
        assert!(matches!(err, RagError::RateLimit { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failures_are_not_retried() {
        let (embedder, gate) = gate(1, false);
        assert!(gate.embed("hello").await.is_err());
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn requests_are_spaced_by_min_interval() {
        let (embedder, gate) = gate(0, true);
        let texts: Vec<String> = (0..5).map(|i| format!("text {i}")).collect();

        let started = Instant::now();
        let vectors = gate.embed_batch(&texts).await.unwrap();

        assert_eq!(vectors.len(), 5);
        // Batch size 2 means three calls and two enforced gaps
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 3);
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        let base = Duration::from_millis(200);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(800));
        assert_eq!(backoff_delay(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(Duration::MAX, 2), Duration::MAX);
    }

    #[tokio::test]
    async fn empty_input_is_rejected_without_calling() {
        let (embedder, gate) = gate(0, true);
        let err = gate
            .embed_batch(&["ok".to_string(), "  ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, RagError::Validation { .. }));
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn limiter_blocks_past_capacity() {
        let limiter = ExtractionLimiter::new(2);
        let first = limiter.acquire().await.unwrap();
        let _second = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available(), 0);

        let waiting = tokio::time::timeout(Duration::from_millis(20), limiter.acquire()).await;
        assert!(waiting.is_err(), "third caller should wait");

        drop(first);
        assert!(limiter.acquire().await.is_ok());
    }
}
