//! Per-user configuration: generation parameters, prompt templates, and
//! pipeline defaults.
//!
//! A user has exactly one profile. Missing pieces are lazily created by
//! the self-healing resolution in `corpora-config`; this module only
//! defines the records and their defaults.

use crate::identity::UserId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The template slots every user profile carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TemplateKind {
    /// Answer-generation template; placeholders `{context}`, `{question}`, `{history}`
    RagQuery,
    /// Follow-up and naming template; placeholders `{context}`, `{count}`
    QuestionGeneration,
    /// Reserved for the podcast frontend; unused by the core
    PodcastGeneration,
}

impl TemplateKind {
    /// All slots a complete profile must fill
    pub const ALL: [Self; 3] = [
        Self::RagQuery,
        Self::QuestionGeneration,
        Self::PodcastGeneration,
    ];

    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::RagQuery => "rag_query",
            Self::QuestionGeneration => "question_generation",
            Self::PodcastGeneration => "podcast_generation",
        }
    }
}

/// A prompt template bound to one slot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptTemplate {
    /// Which slot this template fills
    pub kind: TemplateKind,
    /// Template text with `{placeholder}` markers
    pub text: String,
}

/// Sampling parameters applied to every generation call for a user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmParameters {
    /// Sampling temperature, 0..=1
    pub temperature: f32,
    /// Upper bound on generated tokens
    pub max_new_tokens: u32,
    /// Nucleus sampling mass, 0..=1
    pub top_p: f32,
    /// Top-k sampling cutoff
    pub top_k: u32,
}

impl Default for LlmParameters {
    fn default() -> Self {
        Self {
            temperature: 0.7,
            max_new_tokens: 512,
            top_p: 0.9,
            top_k: 50,
        }
    }
}

/// Defaults the search pipeline starts from before per-request overrides
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineDefaults {
    /// Named technique preset
    pub preset: String,
    /// Retrieval cardinality
    pub top_k: usize,
    /// Minimum similarity for retrieved chunks, 0..=1
    pub similarity_threshold: f32,
}

impl Default for PipelineDefaults {
    fn default() -> Self {
        Self {
            preset: "default".to_string(),
            top_k: 10,
            similarity_threshold: 0.0,
        }
    }
}

/// The complete per-user configuration record
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    /// Owning user
    pub user_id: UserId,
    /// Generation parameters
    pub parameters: LlmParameters,
    /// Filled template slots
    pub templates: Vec<PromptTemplate>,
    /// Default pipeline configuration
    pub pipeline: PipelineDefaults,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp
    pub updated_at: DateTime<Utc>,
}

impl UserProfile {
    /// Look up the template for a slot
    #[must_use]
    pub fn template(&self, kind: TemplateKind) -> Option<&PromptTemplate> {
        self.templates.iter().find(|t| t.kind == kind)
    }

    /// Whether every required slot is filled
    #[must_use]
    pub fn is_complete(&self) -> bool {
        TemplateKind::ALL.iter().all(|k| self.template(*k).is_some())
    }
}
