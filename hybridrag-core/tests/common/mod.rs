//! Shared fixtures for pipeline tests

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use hybridrag_core::core::mock_providers::{DeterministicEmbedder, MockLanguageModel};
use hybridrag_core::extraction::prompts::{COMPLETION_DELIMITER, TUPLE_DELIMITER};
use hybridrag_core::{HybridRag, ProgressEvent, RagConfig, Reranker};
use tokio::sync::broadcast;

/// Text only the keyword extraction prompt contains
pub const KEYWORD_MARKER: &str = "high_level_keywords";
/// Text only the summarization prompt contains
pub const SUMMARY_MARKER: &str = "comprehensive summary";
/// Answer returned for prompts no rule matches
pub const ANSWER: &str = "Zephyr captains the Quasar.";

/// Install a test subscriber honoring `RUST_LOG`
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `entity<#>name<#>type<#>description`
pub fn entity_line(name: &str, entity_type: &str, description: &str) -> String {
    ["entity", name, entity_type, description].join(TUPLE_DELIMITER)
}

/// `relation<#>source<#>target<#>keywords<#>description<#>weight`
pub fn relation_line(
    source: &str,
    target: &str,
    keywords: &str,
    description: &str,
    weight: f64,
) -> String {
    let weight = weight.to_string();
    ["relation", source, target, keywords, description, &weight].join(TUPLE_DELIMITER)
}

/// Extraction response holding `lines`, terminated by the sentinel
pub fn extraction_response(lines: &[String]) -> String {
    let mut text = lines.join("\n");
    text.push('\n');
    text.push_str(COMPLETION_DELIMITER);
    text
}

/// Keyword extraction response
pub fn keywords_response(high: &[&str], low: &[&str]) -> String {
    serde_json::json!({
        "high_level_keywords": high,
        "low_level_keywords": low,
    })
    .to_string()
}

/// Configuration with throttling disabled and paragraph chunking
pub fn test_config() -> RagConfig {
    let mut config = RagConfig::default();
    config.chunking.split_by_character = Some("\n\n".to_string());
    config.concurrency.embedding_min_interval_ms = 0;
    config.concurrency.embedding_backoff_base_ms = 1;
    config
}

/// A language model answering keyword prompts and falling back to [`ANSWER`]
///
/// Keyword and summary rules are registered before any extraction rule so a
/// query or description mentioning a chunk marker still hits the right rule.
pub fn language_model() -> MockLanguageModel {
    MockLanguageModel::new()
        .with_response(KEYWORD_MARKER, keywords_response(&["command"], &["Zephyr"]))
        .with_response(SUMMARY_MARKER, "A merged description.")
        .with_default_response(ANSWER)
}

/// Handles to a test instance and its collaborators
pub struct TestRag {
    pub rag: HybridRag,
    pub llm: Arc<MockLanguageModel>,
    pub embedder: Arc<DeterministicEmbedder>,
}

/// Build an instance over fresh in-memory stores
pub fn build_rag(
    llm: MockLanguageModel,
    embedder: DeterministicEmbedder,
    reranker: Option<Arc<dyn Reranker>>,
    config: RagConfig,
) -> TestRag {
    init_tracing();
    let llm = Arc::new(llm);
    let embedder = Arc::new(embedder);
    let mut builder = HybridRag::builder()
        .with_config(config)
        .with_language_model(llm.clone())
        .with_embedder(embedder.clone());
    if let Some(reranker) = reranker {
        builder = builder.with_reranker(reranker);
    }
    TestRag {
        rag: builder.build().expect("test instance builds"),
        llm,
        embedder,
    }
}

/// Default test instance with a 256-dimension embedder
pub fn default_rag(llm: MockLanguageModel) -> TestRag {
    build_rag(llm, DeterministicEmbedder::new(256), None, test_config())
}

/// Receive events until `done` matches one, failing after a second
pub async fn collect_events_until(
    events: &mut broadcast::Receiver<ProgressEvent>,
    done: impl Fn(&ProgressEvent) -> bool,
) -> Vec<ProgressEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(1), events.recv())
            .await
            .expect("progress event within a second")
            .expect("progress feed open");
        let finished = done(&event);
        seen.push(event);
        if finished {
            return seen;
        }
    }
}
