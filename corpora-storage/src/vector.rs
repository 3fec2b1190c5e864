//! In-memory namespaced vector store with cosine k-NN search

use async_trait::async_trait;
use corpora_core::error::{Error, Result};
use corpora_core::identity::DocumentId;
use corpora_core::traits::vector_store::VectorStore;
use corpora_core::types::document::ChunkKey;
use corpora_core::types::vector::{NamespaceStats, VectorEntry, VectorMatch, VectorQuery};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug)]
struct StoredVector {
    embedding: Vec<f32>,
    text: String,
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug)]
struct Namespace {
    dimensions: usize,
    entries: HashMap<ChunkKey, StoredVector>,
}

/// Reference vector store: exact cosine search over in-memory namespaces.
///
/// Exact search keeps the backend deterministic, which the seed tests
/// rely on; an ANN index would slot in behind the same trait.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryVectorStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn cosine(a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        let na: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let nb: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
        if na == 0.0 || nb == 0.0 {
            return 0.0;
        }
        dot / (na * nb)
    }

    fn matches_filter(
        metadata: &HashMap<String, serde_json::Value>,
        filter: &HashMap<String, serde_json::Value>,
    ) -> bool {
        filter
            .iter()
            .all(|(key, expected)| metadata.get(key) == Some(expected))
    }
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn create_namespace(&self, namespace: &str, dimensions: usize) -> Result<()> {
        if dimensions == 0 {
            return Err(Error::validation("dimensions must be positive"));
        }
        let mut namespaces = self.namespaces.write();
        if namespaces.contains_key(namespace) {
            return Err(Error::conflict(format!(
                "namespace already exists: {namespace}"
            )));
        }
        namespaces.insert(
            namespace.to_string(),
            Namespace {
                dimensions,
                entries: HashMap::new(),
            },
        );
        debug!(namespace, dimensions, "created vector namespace");
        Ok(())
    }

    async fn delete_namespace(&self, namespace: &str) -> Result<usize> {
        let removed = self
            .namespaces
            .write()
            .remove(namespace)
            .map_or(0, |ns| ns.entries.len());
        debug!(namespace, removed, "deleted vector namespace");
        Ok(removed)
    }

    async fn namespace_exists(&self, namespace: &str) -> Result<bool> {
        Ok(self.namespaces.read().contains_key(namespace))
    }

    async fn upsert(&self, namespace: &str, entries: Vec<VectorEntry>) -> Result<usize> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::not_found("namespace", namespace))?;
        let count = entries.len();
        for entry in entries {
            if entry.embedding.len() != ns.dimensions {
                return Err(Error::validation(format!(
                    "embedding dimensionality {} does not match namespace {}",
                    entry.embedding.len(),
                    ns.dimensions
                )));
            }
            ns.entries.insert(
                entry.key,
                StoredVector {
                    embedding: entry.embedding,
                    text: entry.text,
                    metadata: entry.metadata,
                },
            );
        }
        Ok(count)
    }

    async fn search(&self, namespace: &str, query: &VectorQuery) -> Result<Vec<VectorMatch>> {
        let namespaces = self.namespaces.read();
        let ns = namespaces
            .get(namespace)
            .ok_or_else(|| Error::not_found("namespace", namespace))?;
        if query.embedding.len() != ns.dimensions {
            return Err(Error::validation(format!(
                "query dimensionality {} does not match namespace {}",
                query.embedding.len(),
                ns.dimensions
            )));
        }

        let mut hits: Vec<VectorMatch> = ns
            .entries
            .iter()
            .filter(|(_, stored)| Self::matches_filter(&stored.metadata, &query.filter))
            .map(|(key, stored)| VectorMatch {
                key: *key,
                score: Self::cosine(&query.embedding, &stored.embedding),
                text: stored.text.clone(),
                metadata: stored.metadata.clone(),
            })
            .filter(|m| query.threshold.map_or(true, |t| m.score >= t))
            .collect();

        // Stable ordering: score desc, then key for deterministic ties
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.key.cmp(&b.key))
        });
        hits.truncate(query.k);
        Ok(hits)
    }

    async fn delete_document(&self, namespace: &str, document_id: &DocumentId) -> Result<usize> {
        let mut namespaces = self.namespaces.write();
        let ns = namespaces
            .get_mut(namespace)
            .ok_or_else(|| Error::not_found("namespace", namespace))?;
        let before = ns.entries.len();
        ns.entries.retain(|key, _| key.document_id != *document_id);
        Ok(before - ns.entries.len())
    }

    async fn document_keys(
        &self,
        namespace: &str,
        document_id: &DocumentId,
    ) -> Result<Vec<ChunkKey>> {
        let namespaces = self.namespaces.read();
        let ns = namespaces
            .get(namespace)
            .ok_or_else(|| Error::not_found("namespace", namespace))?;
        let mut keys: Vec<ChunkKey> = ns
            .entries
            .keys()
            .filter(|key| key.document_id == *document_id)
            .copied()
            .collect();
        keys.sort();
        Ok(keys)
    }

    async fn document_ids(&self, namespace: &str) -> Result<Vec<DocumentId>> {
        let namespaces = self.namespaces.read();
        let ns = namespaces
            .get(namespace)
            .ok_or_else(|| Error::not_found("namespace", namespace))?;
        let mut ids: Vec<DocumentId> = ns.entries.keys().map(|key| key.document_id).collect();
        ids.sort();
        ids.dedup();
        Ok(ids)
    }

    async fn stats(&self, namespace: &str) -> Result<NamespaceStats> {
        let namespaces = self.namespaces.read();
        let ns = namespaces
            .get(namespace)
            .ok_or_else(|| Error::not_found("namespace", namespace))?;
        let storage_bytes = ns
            .entries
            .values()
            .map(|v| v.embedding.len() * std::mem::size_of::<f32>() + v.text.len())
            .sum();
        Ok(NamespaceStats {
            vector_count: ns.entries.len(),
            dimensions: ns.dimensions,
            storage_bytes,
        })
    }
}
