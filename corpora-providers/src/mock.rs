//! Deterministic mock providers.
//!
//! Tests across the workspace run against these instead of network
//! back-ends. The embedding mock produces hash-bag vectors: texts that
//! share words land close together under cosine similarity, so retrieval
//! ordering is meaningful without a real model. The completion mock
//! replays scripted responses and records every prompt it sees.

use crate::completion::{Completion, CompletionProvider};
use crate::embedding::{EmbeddingModelInfo, EmbeddingProvider};
use async_trait::async_trait;
use corpora_core::error::{Error, Result};
use corpora_core::types::profile::LlmParameters;
use parking_lot::Mutex;
use std::collections::hash_map::DefaultHasher;
use std::collections::VecDeque;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Deterministic lexical-overlap embedding provider
#[derive(Debug)]
pub struct MockEmbeddingProvider {
    info: EmbeddingModelInfo,
}

impl MockEmbeddingProvider {
    /// Create a mock embedder with the given dimensionality
    #[must_use]
    pub fn new(dimensions: usize) -> Self {
        Self {
            info: EmbeddingModelInfo {
                model: format!("mock-embed-{dimensions}"),
                dimensions,
                max_input_tokens: 512,
            },
        }
    }

    /// Override the declared input limit
    #[must_use]
    pub const fn with_max_input_tokens(mut self, max_input_tokens: usize) -> Self {
        self.info.max_input_tokens = max_input_tokens;
        self
    }

    fn hash(s: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        s.hash(&mut hasher);
        hasher.finish()
    }

    #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation)]
    fn embed_one(&self, text: &str) -> Vec<f32> {
        let dims = self.info.dimensions;
        let mut embedding = vec![0.0f32; dims];

        let normalized: String = text
            .chars()
            .map(|c| {
                if c.is_alphanumeric() {
                    c.to_ascii_lowercase()
                } else {
                    ' '
                }
            })
            .collect();

        for word in normalized.split_whitespace() {
            let hash = Self::hash(word);
            let idx = (hash as usize) % dims;
            let sign = if (hash >> 32) & 1 == 0 { 1.0 } else { -1.0 };
            let magnitude = 1.0 + ((hash >> 16) & 0xFF) as f32 / 255.0;
            embedding[idx] += sign * magnitude;
        }

        let norm: f32 = embedding.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut embedding {
                *v /= norm;
            }
        }
        embedding
    }
}

#[async_trait]
impl EmbeddingProvider for MockEmbeddingProvider {
    fn info(&self) -> &EmbeddingModelInfo {
        &self.info
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        for text in texts {
            // Real providers truncate silently at the limit; the mock
            // turns that into a hard failure so the invariant is testable.
            let estimated_tokens = text.split_whitespace().count();
            if estimated_tokens >= self.info.max_input_tokens {
                return Err(Error::validation(format!(
                    "input of ~{estimated_tokens} tokens reaches the model limit {}",
                    self.info.max_input_tokens
                )));
            }
        }
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

/// An embedding provider that fails transiently N times before working
#[derive(Debug)]
pub struct FlakyEmbeddingProvider {
    inner: MockEmbeddingProvider,
    failures_remaining: AtomicU32,
}

impl FlakyEmbeddingProvider {
    /// Wrap a mock embedder so the first `failures` calls return
    /// `Error::Unavailable`
    #[must_use]
    pub fn new(dimensions: usize, failures: u32) -> Self {
        Self {
            inner: MockEmbeddingProvider::new(dimensions),
            failures_remaining: AtomicU32::new(failures),
        }
    }
}

#[async_trait]
impl EmbeddingProvider for FlakyEmbeddingProvider {
    fn info(&self) -> &EmbeddingModelInfo {
        self.inner.info()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let remaining = self.failures_remaining.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures_remaining.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::unavailable("mock embedder temporarily down"));
        }
        self.inner.embed(texts).await
    }
}

/// Scripted completion provider.
///
/// Responses are popped from a queue; when the queue is empty the
/// provider answers with a deterministic echo of the prompt's tail so
/// unscripted calls still succeed. Every prompt is recorded for
/// assertions.
#[derive(Debug, Default)]
pub struct MockCompletionProvider {
    scripted: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockCompletionProvider {
    /// Create a provider with an empty script
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a response
    pub fn push_response(&self, response: impl Into<String>) {
        self.scripted.lock().push_back(response.into());
    }

    /// All prompts seen so far, in call order
    #[must_use]
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().clone()
    }

    #[allow(clippy::cast_possible_truncation)]
    fn token_estimate(text: &str) -> u32 {
        (text.len() / 4).max(1) as u32
    }
}

#[async_trait]
impl CompletionProvider for MockCompletionProvider {
    fn name(&self) -> &str {
        "mock-llm"
    }

    async fn generate(&self, prompt: &str, _params: &LlmParameters) -> Result<Completion> {
        self.prompts.lock().push(prompt.to_string());
        let text = self.scripted.lock().pop_front().unwrap_or_else(|| {
            let tail: String = prompt.chars().rev().take(120).collect::<String>();
            let tail: String = tail.chars().rev().collect();
            format!("mock answer based on: {}", tail.trim())
        });
        Ok(Completion {
            prompt_tokens: Self::token_estimate(prompt),
            completion_tokens: Self::token_estimate(&text),
            text,
        })
    }
}

/// A completion provider that sleeps before answering; used by the
/// deadline tests
#[derive(Debug)]
pub struct SlowCompletionProvider {
    inner: MockCompletionProvider,
    delay: Duration,
}

impl SlowCompletionProvider {
    /// Wrap a mock provider with a fixed per-call delay
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockCompletionProvider::new(),
            delay,
        }
    }
}

#[async_trait]
impl CompletionProvider for SlowCompletionProvider {
    fn name(&self) -> &str {
        "mock-llm-slow"
    }

    async fn generate(&self, prompt: &str, params: &LlmParameters) -> Result<Completion> {
        tokio::time::sleep(self.delay).await;
        self.inner.generate(prompt, params).await
    }
}

/// A completion provider that always fails transiently; used by the
/// retry-budget tests
#[derive(Debug, Default)]
pub struct FailingCompletionProvider {
    calls: AtomicU32,
}

impl FailingCompletionProvider {
    /// Create a provider that never succeeds
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of generate calls observed
    #[must_use]
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CompletionProvider for FailingCompletionProvider {
    fn name(&self) -> &str {
        "mock-llm-failing"
    }

    async fn generate(&self, _prompt: &str, _params: &LlmParameters) -> Result<Completion> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(Error::unavailable("mock completion provider down"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        dot
    }

    #[tokio::test]
    async fn embeddings_are_deterministic_and_normalized() {
        let provider = MockEmbeddingProvider::new(128);
        let a = provider.embed(&["hello world".to_string()]).await.unwrap();
        let b = provider.embed(&["hello world".to_string()]).await.unwrap();
        assert_eq!(a, b);
        let norm: f32 = a[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[tokio::test]
    async fn word_overlap_drives_similarity() {
        let provider = MockEmbeddingProvider::new(256);
        let vectors = provider
            .embed(&[
                "the quick brown fox".to_string(),
                "the quick brown dog".to_string(),
                "unrelated financial statements".to_string(),
            ])
            .await
            .unwrap();
        let close = cosine(&vectors[0], &vectors[1]);
        let far = cosine(&vectors[0], &vectors[2]);
        assert!(close > far, "expected {close} > {far}");
    }

    #[tokio::test]
    async fn oversized_input_is_rejected_not_truncated() {
        let provider = MockEmbeddingProvider::new(32).with_max_input_tokens(8);
        let long = "one two three four five six seven eight nine".to_string();
        assert!(provider.embed(&[long]).await.is_err());
    }

    #[tokio::test]
    async fn scripted_responses_pop_in_order() {
        let provider = MockCompletionProvider::new();
        provider.push_response("first");
        provider.push_response("second");
        let params = LlmParameters::default();
        assert_eq!(provider.generate("p1", &params).await.unwrap().text, "first");
        assert_eq!(provider.generate("p2", &params).await.unwrap().text, "second");
        assert!(provider
            .generate("p3", &params)
            .await
            .unwrap()
            .text
            .starts_with("mock answer"));
        assert_eq!(provider.prompts(), vec!["p1", "p2", "p3"]);
    }

    #[tokio::test]
    async fn flaky_embedder_recovers() {
        let provider = FlakyEmbeddingProvider::new(16, 2);
        assert!(provider.embed(&["a".to_string()]).await.is_err());
        assert!(provider.embed(&["a".to_string()]).await.is_err());
        assert!(provider.embed(&["a".to_string()]).await.is_ok());
    }
}
