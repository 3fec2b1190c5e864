//! The transient per-request search context

use crate::pipeline::request::{SearchOverrides, Warning, WarningKind};
use corpora_core::error::{Error, Result};
use corpora_core::identity::{CorrelationId, DocumentId, UserId};
use corpora_core::types::collection::Collection;
use corpora_core::types::document::ChunkKey;
use corpora_core::types::vector::VectorMatch;
use corpora_config::ConfigSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// A retrieved chunk as it moves through the stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievedChunk {
    /// Canonical chunk key
    pub key: ChunkKey,
    /// Similarity score from retrieval
    pub retrieval_score: f32,
    /// Pairwise score from reranking, when it ran
    pub rerank_score: Option<f32>,
    /// Chunk text (possibly compressed downstream)
    pub text: String,
    /// Page the chunk starts on
    pub page: Option<u32>,
    /// Source metadata
    pub metadata: HashMap<String, serde_json::Value>,
}

impl RetrievedChunk {
    /// Build from a vector-store hit
    #[must_use]
    pub fn from_match(hit: VectorMatch) -> Self {
        let page = hit
            .metadata
            .get("page")
            .and_then(serde_json::Value::as_u64)
            .and_then(|p| u32::try_from(p).ok());
        Self {
            key: hit.key,
            retrieval_score: hit.score,
            rerank_score: None,
            text: hit.text,
            page,
            metadata: hit.metadata,
        }
    }

    /// Source filename, when ingestion recorded one
    #[must_use]
    pub fn filename(&self) -> Option<&str> {
        self.metadata.get("filename").and_then(|v| v.as_str())
    }
}

/// A source attached to the answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRef {
    /// Supporting document
    pub document_id: DocumentId,
    /// Supporting chunk ordinal
    pub ordinal: u32,
    /// Page of the supporting chunk
    pub page: Option<u32>,
    /// Source filename
    pub filename: Option<String>,
    /// Attribution strength, 0..=1
    pub score: f32,
}

/// Conversational context the session layer injects into a search
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ContextAugmentation {
    /// Digest of recent messages, newest last
    pub recent_digest: String,
    /// Tracked entities, most recently mentioned first; used as
    /// coreference anchors during query rewriting
    pub entities: Vec<String>,
    /// Latest session summary, included in full
    pub summary: Option<String>,
    /// True when the question was classified as a follow-up; anchors
    /// bind more aggressively
    pub follow_up: bool,
}

/// One answered sub-question of a chain-of-thought pass
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAnswer {
    /// The sub-question
    pub question: String,
    /// Its answer; empty until synthesis runs
    pub answer: String,
}

/// The state threaded through the pipeline stages. Never persisted;
/// fragments of it are serialized into message metadata by the
/// conversation layer.
pub struct SearchContext {
    /// Correlates logs, metrics, and persisted metadata
    pub correlation_id: CorrelationId,
    /// Requesting user
    pub user: UserId,
    /// The collection being searched
    pub collection: Collection,
    /// The question exactly as submitted
    pub original_question: String,
    /// Whitespace- and case-normalized question
    pub cleaned_question: String,
    /// Enhanced question, when an enhancement stage produced one
    pub rewritten_question: Option<String>,
    /// Conversational augmentation
    pub augmentation: Option<ContextAugmentation>,
    /// Retrieval output
    pub retrieved: Vec<RetrievedChunk>,
    /// Post-retrieval output, when any post-retrieval stage ran
    pub reranked: Option<Vec<RetrievedChunk>>,
    /// Chain-of-thought trace
    pub reasoning: Vec<SubAnswer>,
    /// Generated answer
    pub answer: Option<String>,
    /// Attribution output
    pub sources: Vec<SourceRef>,
    /// Degradations observed so far
    pub warnings: Vec<Warning>,
    /// Frozen configuration
    pub snapshot: Arc<ConfigSnapshot>,
    /// Request overrides
    pub overrides: SearchOverrides,
    /// Cooperative cancellation signal
    pub cancel: CancellationToken,
    /// When the pipeline started, for deadline accounting
    pub started_at: Instant,
    /// Wall-clock deadline
    pub deadline: Option<Instant>,
    /// Set by generation when retrieval was empty and the canned
    /// insufficient-context answer was used
    pub insufficient_context: bool,
}

impl std::fmt::Debug for SearchContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchContext")
            .field("correlation_id", &self.correlation_id)
            .field("collection", &self.collection.id)
            .field("question", &self.original_question)
            .field("retrieved", &self.retrieved.len())
            .finish_non_exhaustive()
    }
}

impl SearchContext {
    /// The query text the next stage should operate on
    #[must_use]
    pub fn query_text(&self) -> &str {
        self.rewritten_question
            .as_deref()
            .unwrap_or(&self.cleaned_question)
    }

    /// The chunk set the next stage should operate on
    #[must_use]
    pub fn working_chunks(&self) -> &[RetrievedChunk] {
        self.reranked.as_deref().unwrap_or(&self.retrieved)
    }

    /// Effective retrieval cardinality after overrides
    #[must_use]
    pub fn effective_top_k(&self) -> usize {
        self.overrides.top_k.unwrap_or(self.snapshot.pipeline.top_k)
    }

    /// Effective similarity threshold after overrides
    #[must_use]
    pub fn effective_threshold(&self) -> f32 {
        self.overrides
            .similarity_threshold
            .unwrap_or(self.snapshot.pipeline.similarity_threshold)
    }

    /// Fail fast between stages on cancellation or an expired deadline.
    ///
    /// # Errors
    ///
    /// `Error::Cancelled` or `Error::DeadlineExceeded`.
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(Error::DeadlineExceeded {
                    elapsed_ms: self.started_at.elapsed().as_millis() as u64,
                });
            }
        }
        Ok(())
    }

    /// Record a degradation
    pub fn warn(&mut self, kind: WarningKind, message: impl Into<String>) {
        self.warnings.push(Warning {
            kind,
            message: message.into(),
        });
    }
}

/// Collapse whitespace and normalize casing
#[must_use]
pub fn clean_question(question: &str) -> String {
    question
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleaning_collapses_whitespace_and_case() {
        assert_eq!(
            clean_question("  What   is\n\tRust? "),
            "what is rust?"
        );
    }

    #[test]
    fn page_is_read_from_match_metadata() {
        let mut metadata = HashMap::new();
        metadata.insert("page".to_string(), serde_json::json!(30));
        let hit = VectorMatch {
            key: ChunkKey::new(DocumentId::new(), 3),
            score: 0.8,
            text: "text".into(),
            metadata,
        };
        let chunk = RetrievedChunk::from_match(hit);
        assert_eq!(chunk.page, Some(30));
    }
}
