//! Completion (text generation) capability

use async_trait::async_trait;
use corpora_core::error::Result;
use corpora_core::types::profile::LlmParameters;
use serde::{Deserialize, Serialize};

/// Output of one generation call
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Completion {
    /// Generated text
    pub text: String,
    /// Tokens consumed by the prompt
    pub prompt_tokens: u32,
    /// Tokens generated
    pub completion_tokens: u32,
}

impl Completion {
    /// Total token usage of the call
    #[must_use]
    pub const fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// Capability interface for language-model back-ends.
///
/// The core consumes exactly one opaque operation; sampling behavior is
/// governed entirely by the caller's frozen parameter snapshot.
#[async_trait]
pub trait CompletionProvider: Send + Sync {
    /// Provider name for logs and rate-limit buckets
    fn name(&self) -> &str;

    /// Generate text for a prompt.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unavailable` for transient failures the caller
    /// may retry, and `Error::Generation` for terminal ones.
    async fn generate(&self, prompt: &str, params: &LlmParameters) -> Result<Completion>;
}
