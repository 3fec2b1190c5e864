//! Search request and response shapes

use crate::pipeline::context::{ContextAugmentation, RetrievedChunk, SourceRef};
use crate::pipeline::metrics::StageMetrics;
use crate::techniques::{TechniqueId, TechniqueSpec};
use corpora_core::error::{Error, Result, StatusCode};
use corpora_core::identity::{CollectionId, CorrelationId, UserId};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Per-request overrides recognized by the pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOverrides {
    /// Retrieval cardinality
    pub top_k: Option<usize>,
    /// Minimum similarity for retrieved chunks, 0..=1
    pub similarity_threshold: Option<f32>,
    /// Result count after reranking
    pub rerank_top_k: Option<usize>,
    /// Sampling temperature, 0..=1
    pub temperature: Option<f32>,
    /// Generation token cap
    pub max_new_tokens: Option<u32>,
    /// Attach sources to the response (default true)
    pub include_sources: Option<bool>,
    /// Attach the retrieved chunks to the response (default false)
    pub include_chunks: Option<bool>,
}

impl SearchOverrides {
    /// Range-check the override values.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        if let Some(t) = self.temperature {
            if !(0.0..=1.0).contains(&t) {
                return Err(Error::validation(format!(
                    "temperature ({t}) must be within 0..=1"
                )));
            }
        }
        if let Some(s) = self.similarity_threshold {
            if !(0.0..=1.0).contains(&s) {
                return Err(Error::validation(format!(
                    "similarity_threshold ({s}) must be within 0..=1"
                )));
            }
        }
        if self.top_k == Some(0) || self.rerank_top_k == Some(0) {
            return Err(Error::validation("top_k must be positive"));
        }
        Ok(())
    }
}

/// A search submission
#[derive(Debug, Clone)]
pub struct SearchRequest {
    /// Requesting user
    pub user: UserId,
    /// Collection to search
    pub collection: CollectionId,
    /// The question
    pub question: String,
    /// Named preset; mutually exclusive with `techniques` and
    /// `cot_enabled`
    pub preset: Option<String>,
    /// Explicit technique sequence; mutually exclusive with `preset`
    pub techniques: Option<Vec<TechniqueSpec>>,
    /// Append chain-of-thought to the default plan; mutually exclusive
    /// with `preset`
    pub cot_enabled: Option<bool>,
    /// Force reranking on or off regardless of the plan
    pub rerank_enabled: Option<bool>,
    /// Value overrides
    pub overrides: SearchOverrides,
    /// Conversational augmentation supplied by the session layer
    pub augmentation: Option<ContextAugmentation>,
    /// Wall-clock budget for the whole request
    pub deadline: Option<Duration>,
    /// Cooperative cancellation signal
    pub cancel: CancellationToken,
}

impl SearchRequest {
    /// A plain request with defaults everywhere
    #[must_use]
    pub fn new(user: UserId, collection: CollectionId, question: impl Into<String>) -> Self {
        Self {
            user,
            collection,
            question: question.into(),
            preset: None,
            techniques: None,
            cot_enabled: None,
            rerank_enabled: None,
            overrides: SearchOverrides::default(),
            augmentation: None,
            deadline: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Structural validation before any work happens.
    ///
    /// # Errors
    ///
    /// `Error::Validation` for an empty question, a preset combined
    /// with an explicit technique list, or a preset combined with
    /// `cot_enabled`.
    pub fn validate(&self) -> Result<()> {
        if self.question.trim().is_empty() {
            return Err(Error::validation("question must not be empty"));
        }
        if self.preset.is_some() && self.techniques.is_some() {
            return Err(Error::validation(
                "technique_preset and techniques are mutually exclusive",
            ));
        }
        if self.preset.is_some() && self.cot_enabled.is_some() {
            return Err(Error::validation(
                "technique_preset and cot_enabled are mutually exclusive",
            ));
        }
        self.overrides.validate()
    }
}

/// Classification of a degraded-but-successful outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    /// Query enhancement fell back to the cleaned original
    EnhancementFallback,
    /// Reranking failed; retrieval order passed through
    RerankDegraded,
    /// Retrieval returned nothing
    EmptyRetrieval,
    /// Chain-of-thought decomposition was skipped
    CotSkipped,
}

/// A structured warning attached to the response
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Warning {
    /// What degraded
    pub kind: WarningKind,
    /// Human-readable detail
    pub message: String,
}

/// The pipeline's output
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Outcome: `ok`, `cancelled`, or `deadline_exceeded`; partial
    /// metrics accompany the latter two
    pub status: StatusCode,
    /// Generated answer; empty when the request did not reach generation
    pub answer: String,
    /// Supporting chunks per the attribution stage
    pub sources: Vec<SourceRef>,
    /// Retrieved chunks, when `include_chunks` was set
    pub chunks: Option<Vec<RetrievedChunk>>,
    /// Techniques that executed, in order
    pub techniques_applied: Vec<TechniqueId>,
    /// One record per completed stage
    pub metrics: Vec<StageMetrics>,
    /// Degradations observed along the way
    pub warnings: Vec<Warning>,
    /// True when retrieval was empty and the answer says so
    pub insufficient_context: bool,
    /// Correlates this response with logs and persisted metadata
    pub correlation_id: CorrelationId,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preset_and_techniques_are_exclusive() {
        let mut request = SearchRequest::new(UserId::new(), CollectionId::new(), "q");
        request.preset = Some("fast".into());
        request.techniques = Some(vec![TechniqueSpec::of(TechniqueId::VectorRetrieval)]);
        assert!(request.validate().is_err());
    }

    #[test]
    fn preset_and_cot_are_exclusive() {
        let mut request = SearchRequest::new(UserId::new(), CollectionId::new(), "q");
        request.preset = Some("accurate".into());
        request.cot_enabled = Some(true);
        assert!(request.validate().is_err());
    }

    #[test]
    fn override_ranges_are_checked() {
        let mut request = SearchRequest::new(UserId::new(), CollectionId::new(), "q");
        request.overrides.temperature = Some(1.5);
        assert!(request.validate().is_err());
        request.overrides.temperature = Some(0.5);
        request.overrides.top_k = Some(0);
        assert!(request.validate().is_err());
    }

    #[test]
    fn empty_question_is_rejected() {
        let request = SearchRequest::new(UserId::new(), CollectionId::new(), "   ");
        assert!(request.validate().is_err());
    }
}
