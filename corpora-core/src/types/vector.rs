//! Vector entry, query, and result types shared by store backends

use crate::types::document::ChunkKey;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A chunk embedding written into a collection namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorEntry {
    /// Canonical chunk key; upserts are idempotent on it
    pub key: ChunkKey,
    /// Embedding vector
    pub embedding: Vec<f32>,
    /// Chunk text, stored alongside the vector for retrieval
    pub text: String,
    /// Source metadata (page, filename, title, ...)
    pub metadata: HashMap<String, serde_json::Value>,
}

impl VectorEntry {
    /// Create an entry without metadata
    #[must_use]
    pub fn new(key: ChunkKey, embedding: Vec<f32>, text: impl Into<String>) -> Self {
        Self {
            key,
            embedding,
            text: text.into(),
            metadata: HashMap::new(),
        }
    }

    /// Attach metadata
    #[must_use]
    pub fn with_metadata(mut self, metadata: HashMap<String, serde_json::Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// k-nearest-neighbor query against one namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorQuery {
    /// Query embedding
    pub embedding: Vec<f32>,
    /// Result cardinality
    pub k: usize,
    /// Minimum similarity score, 0..=1
    pub threshold: Option<f32>,
    /// Exact-match metadata filters
    pub filter: HashMap<String, serde_json::Value>,
}

impl VectorQuery {
    /// Create a query
    #[must_use]
    pub fn new(embedding: Vec<f32>, k: usize) -> Self {
        Self {
            embedding,
            k,
            threshold: None,
            filter: HashMap::new(),
        }
    }

    /// Set a similarity threshold
    #[must_use]
    pub const fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = Some(threshold);
        self
    }

    /// Add metadata filters
    #[must_use]
    pub fn with_filter(mut self, filter: HashMap<String, serde_json::Value>) -> Self {
        self.filter = filter;
        self
    }
}

/// One search hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VectorMatch {
    /// Chunk key of the hit
    pub key: ChunkKey,
    /// Similarity score (higher is better, 0..=1 for cosine)
    pub score: f32,
    /// Chunk text
    pub text: String,
    /// Stored metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Statistics for one namespace
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NamespaceStats {
    /// Number of vectors
    pub vector_count: usize,
    /// Embedding dimensionality
    pub dimensions: usize,
    /// Approximate bytes held
    pub storage_bytes: usize,
}
