//! # corpora-providers
//!
//! Capability interfaces for the opaque model back-ends the core
//! consumes: `embed(text[]) -> vector[]` and
//! `generate(prompt, params) -> text`, plus the machinery every caller
//! shares regardless of the concrete provider:
//!
//! - a registry mapping model handles to provider instances and their
//!   declared limits
//! - a token-bucket rate limiter; callers queue rather than fail, up to
//!   their deadline
//! - bounded retry with exponential backoff and jitter for transient
//!   failures
//! - an embedding cache keyed by content hash
//! - deterministic mock providers used by every test in the workspace

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Embedding cache
pub mod cache;

/// Completion (text generation) capability
pub mod completion;

/// Embedding capability and model registry
pub mod embedding;

/// Deterministic mock providers
pub mod mock;

/// Token-bucket rate limiting
pub mod rate_limit;

/// Reranking capability
pub mod rerank;

/// Bounded retry with backoff
pub mod retry;

pub use cache::{CacheConfig, EmbeddingCache};
pub use completion::{Completion, CompletionProvider};
pub use embedding::{EmbeddingModelInfo, EmbeddingProvider, ProviderRegistry};
pub use rate_limit::{RateLimit, TokenBucket};
pub use rerank::{LexicalReranker, Reranker};
pub use retry::{retry_with_backoff, BackoffPolicy};
