//! Typed per-stage metrics.
//!
//! The key vocabulary is closed: each stage emits exactly one variant,
//! so tests can match on structure instead of probing string maps.

use serde::{Deserialize, Serialize};

/// One stage's metrics record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "stage", rename_all = "snake_case")]
pub enum StageMetrics {
    /// Query enhancement (rewriting or HyDE)
    Enhancement {
        /// Whether the query was changed
        rewritten: bool,
        /// Whether the LLM contributed to the rewrite
        llm_used: bool,
        /// Wall-clock stage time
        duration_ms: u64,
    },
    /// Vector (or fused) retrieval
    Retrieval {
        /// Result count
        results_count: usize,
        /// Best similarity score, when any result came back
        top_score: Option<f32>,
        /// Wall-clock stage time
        duration_ms: u64,
    },
    /// Reranking
    Rerank {
        /// Candidates in
        input_count: usize,
        /// Candidates out
        output_count: usize,
        /// True when the reranker failed and retrieval order passed through
        degraded: bool,
        /// Wall-clock stage time
        duration_ms: u64,
    },
    /// Contextual compression
    Compression {
        /// Characters before
        input_chars: usize,
        /// Characters after
        output_chars: usize,
        /// Wall-clock stage time
        duration_ms: u64,
    },
    /// Multi-faceted filtering
    Filtering {
        /// Candidates in
        input_count: usize,
        /// Candidates out
        output_count: usize,
        /// Wall-clock stage time
        duration_ms: u64,
    },
    /// Chain-of-thought decomposition and synthesis
    Cot {
        /// Sub-questions produced
        sub_questions: usize,
        /// Wall-clock stage time
        duration_ms: u64,
    },
    /// Answer generation
    Generation {
        /// Total provider tokens consumed
        tokens_used: u32,
        /// Retries spent on transient provider failures
        retries: u32,
        /// True when retrieval was empty and the canned
        /// insufficient-context answer was returned
        insufficient_context: bool,
        /// Wall-clock stage time
        duration_ms: u64,
    },
    /// Source attribution
    Attribution {
        /// Sources attached to the answer
        sources_count: usize,
        /// Wall-clock stage time
        duration_ms: u64,
    },
}

impl StageMetrics {
    /// The stage's stable name, used in logs
    #[must_use]
    pub const fn stage_name(&self) -> &'static str {
        match self {
            Self::Enhancement { .. } => "enhancement",
            Self::Retrieval { .. } => "retrieval",
            Self::Rerank { .. } => "rerank",
            Self::Compression { .. } => "compression",
            Self::Filtering { .. } => "filtering",
            Self::Cot { .. } => "cot",
            Self::Generation { .. } => "generation",
            Self::Attribution { .. } => "attribution",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_serialize_with_stage_tag() {
        let metrics = StageMetrics::Retrieval {
            results_count: 7,
            top_score: Some(0.9),
            duration_ms: 12,
        };
        let json = serde_json::to_value(&metrics).unwrap();
        assert_eq!(json["stage"], "retrieval");
        assert_eq!(json["results_count"], 7);
    }
}
