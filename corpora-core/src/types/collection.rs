//! Collections: user-owned namespaces grouping documents and their vectors

use crate::error::{Error, Result};
use crate::identity::{CollectionId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Visibility of a collection to users other than its owner
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privacy {
    /// Readable by any requester
    Public,
    /// Readable only by the owner
    Private,
}

/// Lifecycle status of a collection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectionStatus {
    /// Accepting work, fully indexed
    Active,
    /// One or more documents are being ingested
    Processing,
    /// Chunking policy changed; documents remain indexed under the old policy
    NeedsReprocess,
    /// Partial vector-store failure; reads allowed, results may be incomplete
    Degraded,
    /// Tombstoned; hidden from listings, accepts no new work
    Deleted,
}

impl CollectionStatus {
    /// Whether the collection accepts new documents and searches
    #[must_use]
    pub const fn accepts_work(self) -> bool {
        !matches!(self, Self::Deleted)
    }
}

impl std::fmt::Display for CollectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Processing => "processing",
            Self::NeedsReprocess => "needs_reprocess",
            Self::Degraded => "degraded",
            Self::Deleted => "deleted",
        };
        f.write_str(s)
    }
}

/// Chunking policy applied to every document in a collection.
///
/// All sizes are in tokens of the embedding model's tokenizer. The
/// safety margin keeps every chunk strictly below the model limit;
/// embedding a chunk at the limit risks silent truncation and a
/// semantically wrong vector.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkPolicy {
    /// Target chunk size in tokens
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in tokens
    pub overlap: usize,
    /// Handle of the embedding model used for this collection
    pub embedding_model: String,
    /// Tokens held back below the model's input limit; must be >= 1
    pub safety_margin: usize,
}

impl ChunkPolicy {
    /// Default safety margin in tokens
    pub const DEFAULT_SAFETY_MARGIN: usize = 64;

    /// Create a policy with the default safety margin
    #[must_use]
    pub fn new(chunk_size: usize, overlap: usize, embedding_model: impl Into<String>) -> Self {
        Self {
            chunk_size,
            overlap,
            embedding_model: embedding_model.into(),
            safety_margin: Self::DEFAULT_SAFETY_MARGIN,
        }
    }

    /// The hard per-chunk token cap for a model with the given input limit
    #[must_use]
    pub const fn hard_cap(&self, max_model_tokens: usize) -> usize {
        max_model_tokens.saturating_sub(self.safety_margin)
    }

    /// Validate the policy against the embedding model's input limit.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` when the policy leaves zero safety
    /// room, when the overlap is not smaller than the chunk size, or when
    /// the chunk size cannot fit under the hard cap.
    pub fn validate(&self, max_model_tokens: usize) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::validation("chunk_size must be positive"));
        }
        if self.overlap >= self.chunk_size {
            return Err(Error::validation(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        if self.safety_margin == 0 {
            return Err(Error::validation(
                "safety_margin must leave room below the model limit",
            ));
        }
        if self.chunk_size > self.hard_cap(max_model_tokens) {
            return Err(Error::validation(format!(
                "chunk_size ({}) exceeds model limit ({}) minus safety margin ({})",
                self.chunk_size, max_model_tokens, self.safety_margin
            )));
        }
        Ok(())
    }

    /// Stable fingerprint of the policy, used for reprocess idempotence
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.chunk_size.to_le_bytes());
        hasher.update(self.overlap.to_le_bytes());
        hasher.update(self.safety_margin.to_le_bytes());
        hasher.update(self.embedding_model.as_bytes());
        hex_string(&hasher.finalize()[..16])
    }
}

fn hex_string(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for b in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{b:02x}");
    }
    out
}

/// Derive the vector namespace name for a collection.
///
/// The derivation is pure: re-deriving for an existing collection always
/// yields the same name, and namespace names are never reused because
/// collection IDs are never reused.
#[must_use]
pub fn vector_namespace(id: &CollectionId) -> String {
    format!("col-{}", id.as_uuid().simple())
}

/// A user-owned grouping of documents and their vector index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Collection {
    /// Unique identifier
    pub id: CollectionId,
    /// Owning user
    pub owner: UserId,
    /// Display name, unique per owner (case-insensitive, trimmed)
    pub name: String,
    /// Visibility
    pub privacy: Privacy,
    /// Vector namespace, derived from the ID at creation and stable for life
    pub namespace: String,
    /// Chunking policy applied at ingestion time
    pub policy: ChunkPolicy,
    /// Lifecycle status
    pub status: CollectionStatus,
    /// Number of documents (any status)
    pub document_count: usize,
    /// Sum of raw upload sizes in bytes
    pub total_size_bytes: u64,
    /// When the most recent document reached `indexed`
    pub last_indexed_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl Collection {
    /// Create a new collection with a freshly derived namespace
    #[must_use]
    pub fn new(owner: UserId, name: impl Into<String>, policy: ChunkPolicy, privacy: Privacy) -> Self {
        let id = CollectionId::new();
        let now = Utc::now();
        Self {
            namespace: vector_namespace(&id),
            id,
            owner,
            name: name.into(),
            privacy,
            policy,
            status: CollectionStatus::Active,
            document_count: 0,
            total_size_bytes: 0,
            last_indexed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the requester may read this collection
    #[must_use]
    pub fn visible_to(&self, requester: &UserId) -> bool {
        if self.status == CollectionStatus::Deleted {
            return false;
        }
        self.privacy == Privacy::Public || self.owner == *requester
    }

    /// Normalized form of a collection name for uniqueness checks
    #[must_use]
    pub fn normalized_name(name: &str) -> String {
        name.trim().to_lowercase()
    }
}
