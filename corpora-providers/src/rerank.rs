//! Reranking capability
//!
//! A reranker reorders retrieved chunks with a pairwise scorer that sees
//! the query and the chunk text together. The reference implementation
//! is lexical; a cross-encoder back-end implements the same trait.

use async_trait::async_trait;
use corpora_core::error::Result;
use std::collections::HashSet;

/// A candidate passed to the reranker
#[derive(Debug, Clone)]
pub struct RerankCandidate {
    /// Opaque identifier the caller uses to correlate results
    pub id: String,
    /// Candidate text
    pub text: String,
}

/// One scored candidate, higher is more relevant
#[derive(Debug, Clone)]
pub struct RerankScore {
    /// The candidate's identifier
    pub id: String,
    /// Pairwise relevance score
    pub score: f32,
}

/// Pairwise query/chunk scoring
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Score every candidate against the query. Output order matches
    /// input order; the caller sorts.
    ///
    /// # Errors
    ///
    /// Returns `Error::Unavailable` on provider failure; callers fall
    /// back to retrieval order.
    async fn score(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<RerankScore>>;
}

/// Word-overlap reranker (Jaccard similarity over lowercased tokens).
///
/// Deterministic and dependency-free; the reference scorer for tests
/// and the fallback when no cross-encoder is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LexicalReranker;

impl LexicalReranker {
    /// Create a lexical reranker
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    fn tokens(text: &str) -> HashSet<String> {
        text.split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase)
            .collect()
    }

    /// Jaccard similarity between two texts
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn similarity(a: &str, b: &str) -> f32 {
        let ta = Self::tokens(a);
        let tb = Self::tokens(b);
        let union = ta.union(&tb).count();
        if union == 0 {
            return 0.0;
        }
        ta.intersection(&tb).count() as f32 / union as f32
    }
}

#[async_trait]
impl Reranker for LexicalReranker {
    async fn score(&self, query: &str, candidates: &[RerankCandidate]) -> Result<Vec<RerankScore>> {
        Ok(candidates
            .iter()
            .map(|c| RerankScore {
                id: c.id.clone(),
                score: Self::similarity(query, &c.text),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn overlapping_text_scores_higher() {
        let reranker = LexicalReranker::new();
        let candidates = vec![
            RerankCandidate {
                id: "a".into(),
                text: "the quick brown fox jumps".into(),
            },
            RerankCandidate {
                id: "b".into(),
                text: "completely unrelated material".into(),
            },
        ];
        let scores = reranker
            .score("quick brown fox", &candidates)
            .await
            .unwrap();
        assert!(scores[0].score > scores[1].score);
    }

    #[test]
    fn similarity_is_symmetric_and_bounded() {
        let s = LexicalReranker::similarity("alpha beta", "beta alpha");
        assert!((s - 1.0).abs() < f32::EPSILON);
        assert_eq!(LexicalReranker::similarity("", ""), 0.0);
    }
}
