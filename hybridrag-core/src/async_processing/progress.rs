//! Pipeline progress events.
//!
//! Producers hold a cheap [`ProgressReporter`] and push events onto an
//! unbounded channel; they never wait on consumers. A single dispatcher task
//! stamps each event with a sequence number in arrival order and relays it to
//! every subscriber over a broadcast channel. Slow subscribers lag and lose
//! events instead of slowing the pipeline.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

/// Pipeline stage an event belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Document accepted
    Queued,
    /// Document already processed, nothing to do
    Skipped,
    /// Splitting into chunks
    Chunking,
    /// Embedding and extracting chunks
    Extracting,
    /// Folding extractions into the graph
    Merging,
    /// Running store persistence callbacks
    Persisting,
    /// Document fully indexed
    Completed,
    /// Document failed
    Failed,
    /// Removing a document
    Deleting,
    /// Answering a query
    Querying,
}

/// One progress notification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    /// Position in the dispatcher's output order
    pub sequence: u64,
    /// Emission time
    pub timestamp: DateTime<Utc>,
    /// Stage
    pub stage: PipelineStage,
    /// Items finished within the stage
    pub current: usize,
    /// Items in the stage
    pub total: usize,
    /// Human-readable description
    pub description: String,
    /// Document the event concerns
    pub document_id: Option<String>,
}

/// Sending half handed to pipeline stages
#[derive(Debug, Clone)]
pub struct ProgressReporter {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ProgressReporter {
    /// Emit an event without waiting
    pub fn report(
        &self,
        stage: PipelineStage,
        current: usize,
        total: usize,
        description: impl Into<String>,
        document_id: Option<&str>,
    ) {
        let event = ProgressEvent {
            sequence: 0,
            timestamp: Utc::now(),
            stage,
            current,
            total,
            description: description.into(),
            document_id: document_id.map(str::to_string),
        };
        if self.sender.send(event).is_err() {
            tracing::debug!(?stage, "Progress dispatcher stopped, event discarded");
        }
    }
}

/// Background task relaying events to subscribers
#[derive(Debug)]
pub struct ProgressDispatcher {
    subscribers: broadcast::Sender<ProgressEvent>,
    dispatched: Arc<AtomicU64>,
    undelivered: Arc<AtomicU64>,
    handle: JoinHandle<()>,
}

impl ProgressDispatcher {
    /// Spawn the dispatcher on the current tokio runtime
    ///
    /// `capacity` bounds how far a subscriber may fall behind before it
    /// starts losing events.
    pub fn spawn(capacity: usize) -> (ProgressReporter, Self) {
        let (sender, mut receiver) = mpsc::unbounded_channel::<ProgressEvent>();
        let (subscribers, _) = broadcast::channel(capacity.max(1));
        let dispatched = Arc::new(AtomicU64::new(0));

        let undelivered = Arc::new(AtomicU64::new(0));

        let relay = subscribers.clone();
        let counter = Arc::clone(&dispatched);
        let dropped = Arc::clone(&undelivered);
        let handle = tokio::spawn(async move {
            // Warn once per stretch without subscribers
            let mut warned = false;
            while let Some(mut event) = receiver.recv().await {
                event.sequence = counter.fetch_add(1, Ordering::SeqCst);
                match relay.send(event) {
                    Ok(_) => warned = false,
                    Err(e) => {
                        dropped.fetch_add(1, Ordering::SeqCst);
                        if !warned {
                            tracing::warn!(stage = ?e.0.stage, "No progress subscribers, dropping events");
                            warned = true;
                        } else {
                            tracing::trace!(stage = ?e.0.stage, "No progress subscribers");
                        }
                    },
                }
            }
            tracing::debug!("Progress dispatcher finished");
        });

        (
            ProgressReporter { sender },
            Self {
                subscribers,
                dispatched,
                undelivered,
                handle,
            },
        )
    }

    /// New subscription receiving events dispatched from now on
    pub fn subscribe(&self) -> broadcast::Receiver<ProgressEvent> {
        self.subscribers.subscribe()
    }

    /// Events relayed so far
    pub fn dispatched(&self) -> u64 {
        self.dispatched.load(Ordering::SeqCst)
    }

    /// Events relayed while nobody was subscribed
    pub fn undelivered(&self) -> u64 {
        self.undelivered.load(Ordering::SeqCst)
    }
}

impl Drop for ProgressDispatcher {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_arrive_in_order_with_sequence_numbers() {
        let (reporter, dispatcher) = ProgressDispatcher::spawn(16);
        let mut events = dispatcher.subscribe();

        reporter.report(PipelineStage::Chunking, 0, 1, "chunking", Some("doc-1"));
        reporter.report(PipelineStage::Merging, 1, 2, "merging", Some("doc-1"));

        let first = events.recv().await.unwrap();
        let second = events.recv().await.unwrap();
        assert_eq!(first.stage, PipelineStage::Chunking);
        assert_eq!(second.stage, PipelineStage::Merging);
        assert!(first.sequence < second.sequence);
        assert_eq!(second.document_id.as_deref(), Some("doc-1"));
    }

    #[tokio::test]
    async fn reporting_without_subscribers_does_not_block() {
        let (reporter, dispatcher) = ProgressDispatcher::spawn(1);
        for i in 0..100 {
            reporter.report(PipelineStage::Extracting, i, 100, "chunk", None);
        }
        while dispatcher.undelivered() < 100 {
            tokio::task::yield_now().await;
        }
        assert_eq!(dispatcher.dispatched(), 100);

        let mut events = dispatcher.subscribe();
        reporter.report(PipelineStage::Completed, 1, 1, "done", None);
        assert_eq!(events.recv().await.unwrap().stage, PipelineStage::Completed);
        assert_eq!(dispatcher.undelivered(), 100);
    }

    #[tokio::test]
    async fn lagging_subscriber_loses_events_but_producer_continues() {
        let (reporter, dispatcher) = ProgressDispatcher::spawn(2);
        let mut slow = dispatcher.subscribe();
        for i in 0..10 {
            reporter.report(PipelineStage::Extracting, i, 10, "chunk", None);
        }
        while dispatcher.dispatched() < 10 {
            tokio::task::yield_now().await;
        }
        assert!(matches!(
            slow.recv().await,
            Err(broadcast::error::RecvError::Lagged(_))
        ));
    }
}
