//! Vector store seam

use crate::error::Result;
use crate::identity::DocumentId;
use crate::types::document::ChunkKey;
use crate::types::vector::{NamespaceStats, VectorEntry, VectorMatch, VectorQuery};
use async_trait::async_trait;

/// Per-collection namespaced vector storage with k-NN search.
///
/// All operations address one namespace; a namespace maps 1:1 to a
/// collection for the collection's lifetime. Upserts and deletions are
/// idempotent on the chunk key.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Create an empty namespace with a fixed dimensionality.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` if the namespace already exists.
    async fn create_namespace(&self, namespace: &str, dimensions: usize) -> Result<()>;

    /// Drop a namespace and everything in it, returning the vector count
    /// removed. Dropping a missing namespace is a no-op returning 0.
    async fn delete_namespace(&self, namespace: &str) -> Result<usize>;

    /// Whether the namespace exists
    async fn namespace_exists(&self, namespace: &str) -> Result<bool>;

    /// Insert or overwrite entries keyed by `(document_id, ordinal)`,
    /// returning how many were written.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for a missing namespace and
    /// `Error::Validation` for a dimensionality mismatch.
    async fn upsert(&self, namespace: &str, entries: Vec<VectorEntry>) -> Result<usize>;

    /// k-nearest-neighbor search within the namespace
    async fn search(&self, namespace: &str, query: &VectorQuery) -> Result<Vec<VectorMatch>>;

    /// Delete every vector belonging to a document, returning the count
    async fn delete_document(&self, namespace: &str, document_id: &DocumentId) -> Result<usize>;

    /// List the chunk keys currently stored for a document
    async fn document_keys(&self, namespace: &str, document_id: &DocumentId)
        -> Result<Vec<ChunkKey>>;

    /// List the distinct document IDs present in the namespace.
    ///
    /// The orphan-vector janitor is the intended caller.
    async fn document_ids(&self, namespace: &str) -> Result<Vec<DocumentId>>;

    /// Namespace statistics
    async fn stats(&self, namespace: &str) -> Result<NamespaceStats>;
}
