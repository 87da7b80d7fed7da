//! Deterministic mock providers for offline testing
//!
//! These implement the collaborator traits without network access so the
//! full ingest and query pipeline can run in CI.
//!
//! # Providers
//!
//! - [`DeterministicEmbedder`]: hashed bag-of-words vectors. Texts sharing
//!   words are similar; identical texts are identical. Exact vectors can be
//!   pinned for individual texts.
//! - [`MockLanguageModel`]: canned responses selected by a marker substring
//!   of the prompt, with call recording.
//! - [`ScriptedReranker`]: fixed or content-keyed relevance scores.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::core::{
    Embedder, GenerationRequest, LanguageModel, RagError, RerankScore, Reranker, Result,
};

/// Embedder mapping each lowercase word to a SHA-256 chosen signed bucket
#[derive(Debug)]
pub struct DeterministicEmbedder {
    dimension: usize,
    max_batch_size: usize,
    pinned: HashMap<String, Vec<f32>>,
    fail_once: Mutex<Vec<String>>,
    calls: AtomicUsize,
}

impl DeterministicEmbedder {
    /// Create an embedder producing `dimension`-sized vectors
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
            max_batch_size: 32,
            pinned: HashMap::new(),
            fail_once: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Return `vector` (normalized) whenever exactly `text` is embedded
    pub fn with_pinned(mut self, text: impl Into<String>, vector: Vec<f32>) -> Self {
        self.pinned.insert(text.into(), normalize(vector));
        self
    }

    /// Fail the first batch containing `marker` with a non-transient error
    pub fn with_failure_once(self, marker: impl Into<String>) -> Self {
        self.fail_once.lock().push(marker.into());
        self
    }

    /// Limit the number of texts per call
    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size;
        self
    }

    /// Provider calls made so far
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Vector for one text
    pub fn vector_for(&self, text: &str) -> Vec<f32> {
        if let Some(vector) = self.pinned.get(text) {
            return vector.clone();
        }

        let mut vector = vec![0.0f32; self.dimension];
        let mut words = 0;
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let (bucket, sign) = self.bucket(&word.to_lowercase());
            vector[bucket] += sign;
            words += 1;
        }
        if words == 0 {
            let (bucket, sign) = self.bucket(text);
            vector[bucket] += sign;
        }
        normalize(vector)
    }

    fn bucket(&self, token: &str) -> (usize, f32) {
        let hash = Sha256::digest(token.as_bytes());
        let mut index = [0u8; 8];
        index.copy_from_slice(&hash[..8]);
        let bucket = (u64::from_le_bytes(index) % self.dimension as u64) as usize;
        let sign = if hash[8] & 1 == 0 { 1.0 } else { -1.0 };
        (bucket, sign)
    }
}

fn normalize(mut vector: Vec<f32>) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter_mut().for_each(|x| *x /= norm);
    }
    vector
}

#[async_trait]
impl Embedder for DeterministicEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut pending = self.fail_once.lock();
            if let Some(pos) = pending
                .iter()
                .position(|marker| texts.iter().any(|t| t.contains(marker.as_str())))
            {
                let marker = pending.remove(pos);
                return Err(RagError::Embedding {
                    message: format!("scripted failure on {marker:?}"),
                });
            }
        }
        Ok(texts.iter().map(|t| self.vector_for(t)).collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn max_token_size(&self) -> usize {
        8192
    }

    fn max_batch_size(&self) -> usize {
        self.max_batch_size
    }
}

#[derive(Debug, Clone)]
enum Outcome {
    Respond(String),
    Fail(String),
}

/// Language model returning canned responses
///
/// The first registered marker contained in the prompt selects the outcome;
/// prompts matching no marker get the default response.
#[derive(Debug, Default)]
pub struct MockLanguageModel {
    rules: Vec<(String, Outcome)>,
    default_response: String,
    prompts: Mutex<Vec<String>>,
}

impl MockLanguageModel {
    /// Model answering every prompt with an empty string
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer prompts containing `marker` with `response`
    pub fn with_response(mut self, marker: impl Into<String>, response: impl Into<String>) -> Self {
        self.rules
            .push((marker.into(), Outcome::Respond(response.into())));
        self
    }

    /// Fail prompts containing `marker`
    pub fn with_error(mut self, marker: impl Into<String>, message: impl Into<String>) -> Self {
        self.rules.push((marker.into(), Outcome::Fail(message.into())));
        self
    }

    /// Answer unmatched prompts with `response`
    pub fn with_default_response(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Every prompt received, in order
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    /// Total calls
    pub fn call_count(&self) -> usize {
        self.prompts.lock().len()
    }

    /// Calls whose prompt contained `marker`
    pub fn calls_matching(&self, marker: &str) -> usize {
        self.prompts
            .lock()
            .iter()
            .filter(|p| p.contains(marker))
            .count()
    }
}

#[async_trait]
impl LanguageModel for MockLanguageModel {
    async fn generate(&self, request: &GenerationRequest) -> Result<String> {
        self.prompts.lock().push(request.prompt.clone());
        let outcome = self
            .rules
            .iter()
            .find(|(marker, _)| request.prompt.contains(marker.as_str()))
            .map(|(_, outcome)| outcome.clone());
        match outcome {
            Some(Outcome::Respond(text)) => Ok(text),
            Some(Outcome::Fail(message)) => Err(RagError::LanguageModel { message }),
            None => Ok(self.default_response.clone()),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[derive(Debug)]
enum Script {
    Fixed(Vec<RerankScore>),
    ByContent(Vec<(String, f32)>),
    Fail(String),
}

/// Reranker with scripted scores
#[derive(Debug)]
pub struct ScriptedReranker {
    script: Script,
    calls: Mutex<Vec<Vec<String>>>,
}

impl ScriptedReranker {
    /// Always return `scores`, cut to `top_n`
    pub fn fixed(scores: Vec<RerankScore>) -> Self {
        Self::with_script(Script::Fixed(scores))
    }

    /// Score each document by the first marker it contains; others are dropped
    pub fn by_content(markers: Vec<(String, f32)>) -> Self {
        Self::with_script(Script::ByContent(markers))
    }

    /// Fail every call
    pub fn failing(message: impl Into<String>) -> Self {
        Self::with_script(Script::Fail(message.into()))
    }

    fn with_script(script: Script) -> Self {
        Self {
            script,
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Document lists submitted so far
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl Reranker for ScriptedReranker {
    async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        top_n: usize,
    ) -> Result<Vec<RerankScore>> {
        crate::reranking::validate_rerank_input(query, documents)?;
        self.calls.lock().push(documents.to_vec());

        let mut scores = match &self.script {
            Script::Fixed(scores) => scores.clone(),
            Script::ByContent(markers) => documents
                .iter()
                .enumerate()
                .filter_map(|(index, doc)| {
                    markers
                        .iter()
                        .find(|(marker, _)| doc.contains(marker.as_str()))
                        .map(|(_, score)| RerankScore {
                            index,
                            relevance_score: *score,
                        })
                })
                .collect(),
            Script::Fail(message) => {
                return Err(RagError::Rerank {
                    message: message.clone(),
                })
            },
        };
        scores.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        scores.truncate(top_n);
        Ok(scores)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::cosine_similarity;

    #[tokio::test]
    async fn embedder_is_deterministic_and_word_sensitive() {
        let embedder = DeterministicEmbedder::new(256);
        let a = embedder.embed("Zephyr the sailor").await.unwrap();
        let b = embedder.embed("Zephyr the sailor").await.unwrap();
        assert_eq!(a, b);

        let shared = cosine_similarity(&embedder.vector_for("zephyr"), &a);
        let unrelated = cosine_similarity(&embedder.vector_for("quasar"), &a);
        assert!(shared > 0.4);
        assert!(shared > unrelated);
    }

    #[tokio::test]
    async fn pinned_vectors_win() {
        let embedder = DeterministicEmbedder::new(2).with_pinned("q", vec![3.0, 4.0]);
        assert_eq!(embedder.embed("q").await.unwrap(), vec![0.6, 0.8]);
    }

    #[tokio::test]
    async fn first_matching_marker_wins() {
        let llm = MockLanguageModel::new()
            .with_response("alpha", "first")
            .with_response("alpha beta", "second")
            .with_default_response("fallback");
        let answer = |p: &str| GenerationRequest::new(p);
        assert_eq!(llm.generate(&answer("alpha beta")).await.unwrap(), "first");
        assert_eq!(llm.generate(&answer("gamma")).await.unwrap(), "fallback");
        assert_eq!(llm.calls_matching("alpha"), 1);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn reranker_rejects_empty_documents() {
        let reranker = ScriptedReranker::fixed(vec![]);
        let result = reranker
            .rerank("q", &["ok".to_string(), String::new()], 1)
            .await;
        assert!(matches!(result, Err(RagError::Validation { .. })));
    }
}
