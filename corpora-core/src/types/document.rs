//! Documents and their chunks

use crate::error::{Error, Result};
use crate::identity::{CollectionId, DocumentId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

/// Processing status of a document.
///
/// Transitions are monotone in declaration order, with two exceptions:
/// `Failed` is reachable from any non-terminal state, and reprocessing
/// re-enters at `Chunking` from `Indexed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentStatus {
    /// Uploaded, not yet picked up by a worker
    Pending,
    /// Format-aware parser is extracting text
    Parsing,
    /// Text is being split into chunks
    Chunking,
    /// Chunks are being embedded and upserted
    Embedding,
    /// All vectors and chunk rows committed
    Indexed,
    /// Terminal failure; `processing_error` explains why
    Failed,
}

impl DocumentStatus {
    const ORDER: [Self; 5] = [
        Self::Pending,
        Self::Parsing,
        Self::Chunking,
        Self::Embedding,
        Self::Indexed,
    ];

    /// Whether moving to `next` is a legal transition
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        if next == Self::Failed {
            return self != Self::Failed;
        }
        // Reprocess edge
        if self == Self::Indexed && next == Self::Chunking {
            return true;
        }
        let pos = |s| Self::ORDER.iter().position(|x| *x == s);
        match (pos(self), pos(next)) {
            (Some(a), Some(b)) => b == a + 1,
            _ => false,
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Parsing => "parsing",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// A document uploaded into a collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// Unique identifier
    pub id: DocumentId,
    /// Parent collection
    pub collection_id: CollectionId,
    /// Source filename as uploaded
    pub filename: String,
    /// Content address of the raw bytes in the blob store
    pub content_address: String,
    /// Detected MIME type
    pub mime_type: String,
    /// Raw upload size in bytes
    pub size_bytes: u64,
    /// Processing status
    pub status: DocumentStatus,
    /// Terminal processing failure, if any
    pub processing_error: Option<String>,
    /// Number of chunks committed for this document
    pub chunk_count: usize,
    /// Number of pages the parser reported
    pub page_count: usize,
    /// Fingerprint of the policy the chunks were produced under
    pub policy_fingerprint: Option<String>,
    /// Upload timestamp
    pub uploaded_at: DateTime<Utc>,
    /// When the document last reached `indexed`
    pub processed_at: Option<DateTime<Utc>>,
}

impl Document {
    /// Create a freshly uploaded document in `Pending` state
    #[must_use]
    pub fn new(
        collection_id: CollectionId,
        filename: impl Into<String>,
        content_address: impl Into<String>,
        mime_type: impl Into<String>,
        size_bytes: u64,
    ) -> Self {
        Self {
            id: DocumentId::new(),
            collection_id,
            filename: filename.into(),
            content_address: content_address.into(),
            mime_type: mime_type.into(),
            size_bytes,
            status: DocumentStatus::Pending,
            processing_error: None,
            chunk_count: 0,
            page_count: 0,
            policy_fingerprint: None,
            uploaded_at: Utc::now(),
            processed_at: None,
        }
    }

    /// Apply a status transition, enforcing the state machine.
    ///
    /// # Errors
    ///
    /// Returns `Error::Conflict` on an illegal transition.
    pub fn transition(&mut self, next: DocumentStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(Error::conflict(format!(
                "illegal document transition {} -> {}",
                self.status, next
            )));
        }
        self.status = next;
        if next == DocumentStatus::Indexed {
            self.processed_at = Some(Utc::now());
        }
        Ok(())
    }
}

/// Canonical key of a chunk: `(document_id, ordinal)`.
///
/// The string form `"{document_id}:{ordinal}"` is the vector ID used in
/// the collection namespace and stays stable across reprocessing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkKey {
    /// Owning document
    pub document_id: DocumentId,
    /// Zero-based position within the document
    pub ordinal: u32,
}

impl ChunkKey {
    /// Build a key
    #[must_use]
    pub const fn new(document_id: DocumentId, ordinal: u32) -> Self {
        Self {
            document_id,
            ordinal,
        }
    }
}

impl fmt::Display for ChunkKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document_id, self.ordinal)
    }
}

impl FromStr for ChunkKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (doc, ord) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::validation(format!("malformed chunk key: {s}")))?;
        let document_id = DocumentId::from_str(doc)
            .map_err(|e| Error::validation(format!("malformed chunk key: {e}")))?;
        let ordinal = ord
            .parse()
            .map_err(|e| Error::validation(format!("malformed chunk ordinal: {e}")))?;
        Ok(Self {
            document_id,
            ordinal,
        })
    }
}

/// A committed chunk row. The embedding itself lives in the vector store;
/// this row records existence, text, and placement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    /// Canonical key
    pub key: ChunkKey,
    /// Chunk text
    pub text: String,
    /// Page the chunk starts on, when the source has pages
    pub page: Option<u32>,
    /// Token count under the collection's embedding tokenizer
    pub token_count: usize,
    /// Extracted metadata (title, authors, offsets, ...)
    pub metadata: HashMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn chunk_key_round_trip() {
        let key = ChunkKey::new(DocumentId::new(), 42);
        let parsed: ChunkKey = key.to_string().parse().unwrap();
        assert_eq!(key, parsed);
    }

    #[test]
    fn chunk_key_rejects_garbage() {
        assert!(ChunkKey::from_str("not-a-key").is_err());
        assert!(ChunkKey::from_str("abc:def").is_err());
    }

    #[test]
    fn forward_transitions_are_legal() {
        use DocumentStatus::{Chunking, Embedding, Indexed, Parsing, Pending};
        let mut doc = Document::new(
            CollectionId::new(),
            "report.pdf",
            "deadbeef",
            "application/pdf",
            1024,
        );
        for next in [Parsing, Chunking, Embedding, Indexed] {
            doc.transition(next).unwrap();
        }
        assert_eq!(doc.status, Indexed);
        assert!(doc.processed_at.is_some());
        // reprocess edge
        doc.transition(Chunking).unwrap();
        // skipping states is illegal
        assert!(doc.transition(Indexed).is_err());
        assert!(Pending.can_transition_to(DocumentStatus::Failed));
    }

    #[test]
    fn failed_is_reachable_from_everywhere_but_itself() {
        use DocumentStatus::{Failed, Parsing};
        assert!(Parsing.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Parsing));
    }
}
