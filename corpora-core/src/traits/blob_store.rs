//! Blob store seam and content addressing

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Handle to a stored blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlobRef {
    /// Hex SHA-256 of the content
    pub address: String,
    /// Content length in bytes
    pub size: u64,
}

/// Compute the content address of a byte slice (hex SHA-256).
///
/// Identical bytes always yield the identical address, which is what
/// makes duplicate-upload detection possible.
#[must_use]
pub fn content_address(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    let mut out = String::with_capacity(64);
    for b in digest {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Content-addressed storage of raw uploads
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Store bytes, returning their address. Storing bytes that already
    /// exist is a no-op returning the same address.
    async fn put(&self, bytes: &[u8]) -> Result<BlobRef>;

    /// Fetch a blob by address
    async fn get(&self, address: &str) -> Result<Option<Vec<u8>>>;

    /// Delete a blob, returning whether it existed
    async fn delete(&self, address: &str) -> Result<bool>;

    /// Whether a blob exists
    async fn contains(&self, address: &str) -> Result<bool>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn addresses_are_deterministic() {
        assert_eq!(content_address(b"hello"), content_address(b"hello"));
        assert_ne!(content_address(b"hello"), content_address(b"world"));
        assert_eq!(content_address(b"hello").len(), 64);
    }
}
