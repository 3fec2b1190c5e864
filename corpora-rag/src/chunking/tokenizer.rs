//! Token counting in the embedding model's units

use anyhow::Result;
use tiktoken_rs::{cl100k_base, CoreBPE};

/// Counts tokens the way the target embedding model's tokenizer would
pub trait TokenCounter: Send + Sync {
    /// Token count of `text`
    fn count_tokens(&self, text: &str) -> usize;

    /// Tokenizer name for logs
    fn name(&self) -> &str;
}

/// BPE-based counter; `cl100k_base` covers the embedding models the
/// reference deployment registers
pub struct TiktokenCounter {
    tokenizer: CoreBPE,
}

impl std::fmt::Debug for TiktokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TiktokenCounter").finish_non_exhaustive()
    }
}

impl TiktokenCounter {
    /// Create the counter.
    ///
    /// # Errors
    ///
    /// Returns an error if the BPE tables fail to load.
    pub fn new() -> Result<Self> {
        Ok(Self {
            tokenizer: cl100k_base()?,
        })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        self.tokenizer.encode_ordinary(text).len()
    }

    fn name(&self) -> &str {
        "cl100k_base"
    }
}

/// Character-estimate fallback (~4 chars per token)
#[derive(Debug, Clone, Copy)]
pub struct CharacterTokenCounter {
    chars_per_token: usize,
}

impl Default for CharacterTokenCounter {
    fn default() -> Self {
        Self { chars_per_token: 4 }
    }
}

impl CharacterTokenCounter {
    /// Create with a custom ratio
    #[must_use]
    pub const fn new(chars_per_token: usize) -> Self {
        Self { chars_per_token }
    }
}

impl TokenCounter for CharacterTokenCounter {
    fn count_tokens(&self, text: &str) -> usize {
        text.len().div_ceil(self.chars_per_token.max(1))
    }

    fn name(&self) -> &str {
        "character_estimate"
    }
}

/// Picks the best available counter for a model handle
#[derive(Debug)]
pub struct TokenCounterFactory;

impl TokenCounterFactory {
    /// Counter for a model handle. Mock models use the character
    /// estimate so tests stay dependency-free; everything else gets BPE
    /// with a graceful fallback.
    #[must_use]
    pub fn for_model(model: &str) -> Box<dyn TokenCounter> {
        if model.starts_with("mock-") {
            return Box::new(CharacterTokenCounter::default());
        }
        match TiktokenCounter::new() {
            Ok(counter) => Box::new(counter),
            Err(_) => Box::new(CharacterTokenCounter::default()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn character_counter_rounds_up() {
        let counter = CharacterTokenCounter::new(4);
        assert_eq!(counter.count_tokens(""), 0);
        assert_eq!(counter.count_tokens("abc"), 1);
        assert_eq!(counter.count_tokens("abcd"), 1);
        assert_eq!(counter.count_tokens("abcde"), 2);
    }

    #[test]
    fn factory_honors_mock_prefix() {
        let counter = TokenCounterFactory::for_model("mock-embed-256");
        assert_eq!(counter.name(), "character_estimate");
    }

    #[test]
    fn bpe_counts_fewer_tokens_than_chars() {
        let counter = TokenCounterFactory::for_model("text-embedding-3-small");
        let text = "The quick brown fox jumps over the lazy dog.";
        let count = counter.count_tokens(text);
        assert!(count > 0);
        assert!(count < text.len());
    }
}
