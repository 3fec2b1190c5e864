//! In-memory content-addressed blob store

use async_trait::async_trait;
use corpora_core::error::Result;
use corpora_core::traits::blob_store::{content_address, BlobRef, BlobStore};
use dashmap::DashMap;

/// Reference blob store keyed by content address
#[derive(Debug, Default)]
pub struct MemoryBlobStore {
    blobs: DashMap<String, Vec<u8>>,
}

impl MemoryBlobStore {
    /// Create an empty store
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of distinct blobs held
    #[must_use]
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether the store is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef> {
        let address = content_address(bytes);
        let size = bytes.len() as u64;
        self.blobs
            .entry(address.clone())
            .or_insert_with(|| bytes.to_vec());
        Ok(BlobRef { address, size })
    }

    async fn get(&self, address: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.get(address).map(|entry| entry.value().clone()))
    }

    async fn delete(&self, address: &str) -> Result<bool> {
        Ok(self.blobs.remove(address).is_some())
    }

    async fn contains(&self, address: &str) -> Result<bool> {
        Ok(self.blobs.contains_key(address))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn put_is_deduplicating() {
        let store = MemoryBlobStore::new();
        let a = store.put(b"same bytes").await.unwrap();
        let b = store.put(b"same bytes").await.unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn round_trip() {
        let store = MemoryBlobStore::new();
        let blob = store.put(b"payload").await.unwrap();
        assert_eq!(blob.size, 7);
        assert_eq!(store.get(&blob.address).await.unwrap().unwrap(), b"payload");
        assert!(store.delete(&blob.address).await.unwrap());
        assert!(store.get(&blob.address).await.unwrap().is_none());
        assert!(!store.delete(&blob.address).await.unwrap());
    }
}
