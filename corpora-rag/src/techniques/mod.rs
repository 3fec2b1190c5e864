//! Named retrieval and reasoning techniques.
//!
//! Technique identifiers are a closed sum type parsed from stable
//! strings; unknown identifiers are rejected at parse time. Each ID
//! carries its own configuration variant, validated when a request is
//! built rather than when it executes. The builder checks composition
//! rules: stage order must be non-decreasing and a pipeline must
//! retrieve unless explicitly declared retrieval-free.

use corpora_core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Ordered pipeline stages a technique may occupy
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineStage {
    /// Question cleanup and rewriting
    QueryTransformation,
    /// Vector search
    Retrieval,
    /// Reranking, compression, filtering
    PostRetrieval,
    /// Chain-of-thought decomposition and synthesis
    Reasoning,
    /// Answer generation (built-in, not technique-addressable)
    Generation,
    /// Source attribution (built-in, not technique-addressable)
    PostGeneration,
}

/// The closed set of technique identifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TechniqueId {
    /// LLM- and anchor-assisted question rewriting
    QueryRewriting,
    /// Embed a hypothetical answer instead of the question
    Hyde,
    /// Plain k-NN retrieval
    VectorRetrieval,
    /// Retrieval over original and rewritten queries, rank-fused
    FusionRetrieval,
    /// Pairwise reranking of retrieved chunks
    Reranking,
    /// Drop chunk sentences irrelevant to the query
    ContextualCompression,
    /// Score- and metadata-based filtering
    MultiFacetedFiltering,
    /// Split a complex question into sub-questions
    CotDecomposition,
    /// Answer sub-questions and collect the trace
    CotSynthesis,
}

impl TechniqueId {
    /// Every identifier, in canonical stage order
    pub const ALL: [Self; 9] = [
        Self::QueryRewriting,
        Self::Hyde,
        Self::VectorRetrieval,
        Self::FusionRetrieval,
        Self::Reranking,
        Self::ContextualCompression,
        Self::MultiFacetedFiltering,
        Self::CotDecomposition,
        Self::CotSynthesis,
    ];

    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::QueryRewriting => "query_rewriting",
            Self::Hyde => "hyde",
            Self::VectorRetrieval => "vector_retrieval",
            Self::FusionRetrieval => "fusion_retrieval",
            Self::Reranking => "reranking",
            Self::ContextualCompression => "contextual_compression",
            Self::MultiFacetedFiltering => "multi_faceted_filtering",
            Self::CotDecomposition => "cot_decomposition",
            Self::CotSynthesis => "cot_synthesis",
        }
    }

    /// The stage this technique occupies
    #[must_use]
    pub const fn stage(self) -> PipelineStage {
        match self {
            Self::QueryRewriting | Self::Hyde => PipelineStage::QueryTransformation,
            Self::VectorRetrieval | Self::FusionRetrieval => PipelineStage::Retrieval,
            Self::Reranking | Self::ContextualCompression | Self::MultiFacetedFiltering => {
                PipelineStage::PostRetrieval
            }
            Self::CotDecomposition | Self::CotSynthesis => PipelineStage::Reasoning,
        }
    }

    /// Resource requirements of the technique
    #[must_use]
    pub const fn requirements(self) -> Requirements {
        match self {
            Self::QueryRewriting | Self::Hyde | Self::CotDecomposition => Requirements {
                llm: true,
                embeddings: false,
                vector_store: false,
            },
            Self::VectorRetrieval | Self::FusionRetrieval => Requirements {
                llm: false,
                embeddings: true,
                vector_store: true,
            },
            Self::CotSynthesis => Requirements {
                llm: true,
                embeddings: true,
                vector_store: true,
            },
            Self::Reranking | Self::ContextualCompression | Self::MultiFacetedFiltering => {
                Requirements {
                    llm: false,
                    embeddings: false,
                    vector_store: false,
                }
            }
        }
    }
}

impl fmt::Display for TechniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TechniqueId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| Error::InvalidPipeline {
                message: format!("unknown technique: {s}"),
            })
    }
}

/// Resources a technique needs at execution time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Needs the completion provider
    pub llm: bool,
    /// Needs the embedding provider
    pub embeddings: bool,
    /// Needs the vector store
    pub vector_store: bool,
}

/// Per-technique configuration; the variant fixes the technique, so a
/// config can never be paired with the wrong identifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "technique", rename_all = "snake_case")]
pub enum TechniqueConfig {
    /// See [`TechniqueId::QueryRewriting`]
    QueryRewriting {
        /// Ask the LLM to expand the question (anchors apply regardless)
        use_llm: bool,
    },
    /// See [`TechniqueId::Hyde`]
    Hyde,
    /// See [`TechniqueId::VectorRetrieval`]
    VectorRetrieval {
        /// Override the request's top-k
        top_k: Option<usize>,
    },
    /// See [`TechniqueId::FusionRetrieval`]
    FusionRetrieval {
        /// Override the request's top-k
        top_k: Option<usize>,
    },
    /// See [`TechniqueId::Reranking`]
    Reranking {
        /// Result count after reranking
        top_k: Option<usize>,
    },
    /// See [`TechniqueId::ContextualCompression`]
    ContextualCompression,
    /// See [`TechniqueId::MultiFacetedFiltering`]
    MultiFacetedFiltering {
        /// Minimum retrieval score to keep
        min_score: f32,
    },
    /// See [`TechniqueId::CotDecomposition`]
    CotDecomposition {
        /// Cap on generated sub-questions
        max_sub_questions: usize,
    },
    /// See [`TechniqueId::CotSynthesis`]
    CotSynthesis,
}

impl TechniqueConfig {
    /// The identifier this configuration belongs to
    #[must_use]
    pub const fn id(&self) -> TechniqueId {
        match self {
            Self::QueryRewriting { .. } => TechniqueId::QueryRewriting,
            Self::Hyde => TechniqueId::Hyde,
            Self::VectorRetrieval { .. } => TechniqueId::VectorRetrieval,
            Self::FusionRetrieval { .. } => TechniqueId::FusionRetrieval,
            Self::Reranking { .. } => TechniqueId::Reranking,
            Self::ContextualCompression => TechniqueId::ContextualCompression,
            Self::MultiFacetedFiltering { .. } => TechniqueId::MultiFacetedFiltering,
            Self::CotDecomposition { .. } => TechniqueId::CotDecomposition,
            Self::CotSynthesis => TechniqueId::CotSynthesis,
        }
    }

    /// The default configuration for an identifier
    #[must_use]
    pub const fn default_for(id: TechniqueId) -> Self {
        match id {
            TechniqueId::QueryRewriting => Self::QueryRewriting { use_llm: false },
            TechniqueId::Hyde => Self::Hyde,
            TechniqueId::VectorRetrieval => Self::VectorRetrieval { top_k: None },
            TechniqueId::FusionRetrieval => Self::FusionRetrieval { top_k: None },
            TechniqueId::Reranking => Self::Reranking { top_k: None },
            TechniqueId::ContextualCompression => Self::ContextualCompression,
            TechniqueId::MultiFacetedFiltering => Self::MultiFacetedFiltering { min_score: 0.0 },
            TechniqueId::CotDecomposition => Self::CotDecomposition {
                max_sub_questions: 4,
            },
            TechniqueId::CotSynthesis => Self::CotSynthesis,
        }
    }

    /// Range checks on the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidPipeline` for out-of-range values.
    pub fn validate(&self) -> Result<()> {
        match self {
            Self::MultiFacetedFiltering { min_score } => {
                if !(0.0..=1.0).contains(min_score) {
                    return Err(Error::InvalidPipeline {
                        message: format!("min_score ({min_score}) must be within 0..=1"),
                    });
                }
            }
            Self::CotDecomposition { max_sub_questions } => {
                if *max_sub_questions == 0 || *max_sub_questions > 8 {
                    return Err(Error::InvalidPipeline {
                        message: format!(
                            "max_sub_questions ({max_sub_questions}) must be within 1..=8"
                        ),
                    });
                }
            }
            Self::VectorRetrieval { top_k }
            | Self::FusionRetrieval { top_k }
            | Self::Reranking { top_k } => {
                if top_k == &Some(0) {
                    return Err(Error::InvalidPipeline {
                        message: "top_k must be positive".to_string(),
                    });
                }
            }
            _ => {}
        }
        Ok(())
    }
}

/// One entry of a technique sequence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TechniqueSpec {
    /// The technique's configuration (which fixes its identifier)
    pub config: TechniqueConfig,
}

impl TechniqueSpec {
    /// Spec with default configuration for an identifier
    #[must_use]
    pub const fn of(id: TechniqueId) -> Self {
        Self {
            config: TechniqueConfig::default_for(id),
        }
    }

    /// Parse an identifier string plus optional JSON configuration.
    ///
    /// # Errors
    ///
    /// `Error::InvalidPipeline` for unknown identifiers, mismatched or
    /// malformed configuration.
    pub fn parse(id: &str, config: Option<&serde_json::Value>) -> Result<Self> {
        let id: TechniqueId = id.parse()?;
        let config = match config {
            None => TechniqueConfig::default_for(id),
            Some(value) => {
                let mut tagged = value
                    .as_object()
                    .cloned()
                    .ok_or_else(|| Error::InvalidPipeline {
                        message: format!("configuration for {id} must be an object"),
                    })?;
                tagged.insert(
                    "technique".to_string(),
                    serde_json::Value::String(id.as_str().to_string()),
                );
                serde_json::from_value(serde_json::Value::Object(tagged)).map_err(|e| {
                    Error::InvalidPipeline {
                        message: format!("invalid configuration for {id}: {e}"),
                    }
                })?
            }
        };
        let spec = Self { config };
        spec.config.validate()?;
        Ok(spec)
    }

    /// The technique's identifier
    #[must_use]
    pub const fn id(&self) -> TechniqueId {
        self.config.id()
    }
}

/// The named presets. Language-neutral configurations, not code paths.
#[must_use]
pub fn preset(name: &str) -> Option<Vec<TechniqueSpec>> {
    let ids: &[TechniqueId] = match name {
        "default" => &[
            TechniqueId::QueryRewriting,
            TechniqueId::VectorRetrieval,
            TechniqueId::Reranking,
        ],
        "fast" => &[TechniqueId::VectorRetrieval],
        "accurate" => &[
            TechniqueId::QueryRewriting,
            TechniqueId::Hyde,
            TechniqueId::FusionRetrieval,
            TechniqueId::Reranking,
        ],
        "cost_optimized" => &[
            TechniqueId::VectorRetrieval,
            TechniqueId::MultiFacetedFiltering,
        ],
        "comprehensive" => &[
            TechniqueId::QueryRewriting,
            TechniqueId::FusionRetrieval,
            TechniqueId::Reranking,
            TechniqueId::ContextualCompression,
            TechniqueId::CotDecomposition,
            TechniqueId::CotSynthesis,
        ],
        _ => return None,
    };
    Some(ids.iter().map(|id| TechniqueSpec::of(*id)).collect())
}

/// Validate a technique sequence's composition rules.
///
/// # Errors
///
/// `Error::InvalidPipeline` when the stage order decreases, when no
/// retrieval technique is present (and the sequence is not declared
/// retrieval-free), when CoT synthesis appears without decomposition,
/// or when any configuration fails its range checks.
pub fn validate_sequence(specs: &[TechniqueSpec], retrieval_free: bool) -> Result<()> {
    if specs.is_empty() {
        return Err(Error::InvalidPipeline {
            message: "technique sequence is empty".to_string(),
        });
    }

    let mut last_stage = PipelineStage::QueryTransformation;
    for spec in specs {
        spec.config.validate()?;
        let stage = spec.id().stage();
        if stage < last_stage {
            return Err(Error::InvalidPipeline {
                message: format!(
                    "technique {} ({:?}) appears after a later stage",
                    spec.id(),
                    stage
                ),
            });
        }
        last_stage = stage;
    }

    let has_retrieval = specs
        .iter()
        .any(|s| s.id().stage() == PipelineStage::Retrieval);
    if !has_retrieval && !retrieval_free {
        return Err(Error::InvalidPipeline {
            message: "pipeline has no retrieval technique and is not declared retrieval-free"
                .to_string(),
        });
    }

    let has_decomposition = specs.iter().any(|s| s.id() == TechniqueId::CotDecomposition);
    let has_synthesis = specs.iter().any(|s| s.id() == TechniqueId::CotSynthesis);
    if has_synthesis && !has_decomposition {
        return Err(Error::InvalidPipeline {
            message: "cot_synthesis requires cot_decomposition".to_string(),
        });
    }

    Ok(())
}
