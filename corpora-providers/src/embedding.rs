//! Embedding capability and the model registry

use async_trait::async_trait;
use corpora_core::error::{Error, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Declared limits of an embedding model
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingModelInfo {
    /// Model handle (e.g. "mock-embed-256")
    pub model: String,
    /// Output dimensionality
    pub dimensions: usize,
    /// Maximum input size in tokens; inputs at or above this are
    /// silently truncated by real providers, which is why the chunker
    /// keeps a safety margin below it
    pub max_input_tokens: usize,
}

/// Capability interface for embedding back-ends
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// The model this instance serves
    fn info(&self) -> &EmbeddingModelInfo;

    /// Embed a batch of texts, one vector per input, in input order.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unavailable` for transient provider failures and
    /// `Error::Validation` for inputs over the declared limit.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Registry of embedding providers keyed by model handle.
///
/// Collection creation validates its embedding model handle here;
/// an unknown handle is rejected before any state is written.
#[derive(Default)]
pub struct ProviderRegistry {
    embedders: RwLock<HashMap<String, Arc<dyn EmbeddingProvider>>>,
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("models", &self.known_models())
            .finish()
    }
}

impl ProviderRegistry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a provider under its model handle
    pub fn register(&self, provider: Arc<dyn EmbeddingProvider>) {
        self.embedders
            .write()
            .insert(provider.info().model.clone(), provider);
    }

    /// Resolve a provider by model handle.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownEmbeddingModel` for an unregistered handle.
    pub fn embedder(&self, model: &str) -> Result<Arc<dyn EmbeddingProvider>> {
        self.embedders
            .read()
            .get(model)
            .cloned()
            .ok_or_else(|| Error::UnknownEmbeddingModel {
                model: model.to_string(),
            })
    }

    /// Declared limits for a model handle.
    ///
    /// # Errors
    ///
    /// Returns `Error::UnknownEmbeddingModel` for an unregistered handle.
    pub fn model_info(&self, model: &str) -> Result<EmbeddingModelInfo> {
        self.embedder(model).map(|p| p.info().clone())
    }

    /// Handles currently registered
    #[must_use]
    pub fn known_models(&self) -> Vec<String> {
        let mut models: Vec<String> = self.embedders.read().keys().cloned().collect();
        models.sort();
        models
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockEmbeddingProvider;

    #[test]
    fn unknown_model_is_rejected() {
        let registry = ProviderRegistry::new();
        let err = registry.model_info("nope").unwrap_err();
        assert!(matches!(err, Error::UnknownEmbeddingModel { .. }));
    }

    #[test]
    fn registered_model_resolves() {
        let registry = ProviderRegistry::new();
        registry.register(Arc::new(MockEmbeddingProvider::new(64)));
        let info = registry.model_info("mock-embed-64").unwrap();
        assert_eq!(info.dimensions, 64);
        assert_eq!(registry.known_models(), vec!["mock-embed-64".to_string()]);
    }
}
