//! Workspace error taxonomy.
//!
//! One enum covers the failure classes every subsystem reports. Each
//! variant maps to a stable logical [`StatusCode`] that frontends can
//! translate to their wire format, and to a transience flag that retry
//! loops consult. Stage and job retry logic never retries anything
//! `is_transient` returns false for.

use thiserror::Error;

/// Convenience result alias used across the workspace
pub type Result<T> = std::result::Result<T, Error>;

/// Error type shared by all corpora crates
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed request, schema violation, or unknown technique
    #[error("validation error: {message}")]
    Validation {
        /// What was wrong with the input
        message: String,
    },

    /// A technique sequence that violates stage ordering or composition rules
    #[error("invalid pipeline: {message}")]
    InvalidPipeline {
        /// Why the pipeline was rejected
        message: String,
    },

    /// Resource does not exist
    #[error("{resource} not found: {id}")]
    NotFound {
        /// Kind of resource ("collection", "document", "session", ...)
        resource: &'static str,
        /// Identifier that failed to resolve
        id: String,
    },

    /// Requester is not allowed to see or mutate the resource
    #[error("forbidden: {message}")]
    Forbidden {
        /// Reason, phrased without leaking internals
        message: String,
    },

    /// Name collision, concurrent mutation, or duplicate submission
    #[error("conflict: {message}")]
    Conflict {
        /// What collided
        message: String,
    },

    /// Provider token bucket was empty past the caller's deadline
    #[error("rate limited: {message}")]
    RateLimited {
        /// Which provider or resource throttled the call
        message: String,
    },

    /// A dependency (provider or store) is temporarily unavailable
    #[error("dependency unavailable: {message}")]
    Unavailable {
        /// Which dependency failed and how
        message: String,
        /// Underlying cause, when one exists
        #[source]
        source: Option<anyhow::Error>,
    },

    /// Document format the parser cannot handle; terminal for the document
    #[error("unsupported format: {message}")]
    UnsupportedFormat {
        /// Format details
        message: String,
    },

    /// Input bytes that cannot be parsed; terminal for the document
    #[error("corrupt input: {message}")]
    CorruptInput {
        /// Parse failure details
        message: String,
    },

    /// User configuration could not be materialized
    #[error("configuration error: {message}")]
    Configuration {
        /// What failed during resolution
        message: String,
    },

    /// Answer generation failed after exhausting its retry budget
    #[error("generation failed: {message}")]
    Generation {
        /// Final provider failure
        message: String,
    },

    /// The embedding model handle is not registered
    #[error("unknown embedding model: {model}")]
    UnknownEmbeddingModel {
        /// The handle that failed to resolve
        model: String,
    },

    /// The session's collection has been deleted; search is unavailable
    #[error("collection deleted: {id}")]
    CollectionDeleted {
        /// The tombstoned collection
        id: String,
    },

    /// Another request holds the session's append lock
    #[error("session busy: {id}")]
    SessionBusy {
        /// The contended session
        id: String,
    },

    /// Cooperative cancellation was observed
    #[error("operation cancelled")]
    Cancelled,

    /// The request's wall-clock deadline expired
    #[error("deadline exceeded after {elapsed_ms}ms")]
    DeadlineExceeded {
        /// Time spent before the pipeline gave up
        elapsed_ms: u64,
    },

    /// Invariant violation; logged with correlation ID, opaque to callers
    #[error("internal error: {message}")]
    Internal {
        /// Diagnostic detail (never surfaced verbatim to end users)
        message: String,
    },
}

impl Error {
    /// Shorthand for a validation failure
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Shorthand for a missing resource
    pub fn not_found(resource: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            resource,
            id: id.to_string(),
        }
    }

    /// Shorthand for a conflict
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Shorthand for a transient dependency failure without a cause chain
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable {
            message: message.into(),
            source: None,
        }
    }

    /// Shorthand for an internal invariant violation
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Whether a bounded retry with backoff is permitted for this error
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::RateLimited { .. })
    }

    /// The stable status code this error surfaces as
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation { .. }
            | Self::InvalidPipeline { .. }
            | Self::UnknownEmbeddingModel { .. } => StatusCode::InvalidInput,
            Self::NotFound { .. } => StatusCode::NotFound,
            Self::Forbidden { .. } => StatusCode::Forbidden,
            Self::Conflict { .. } | Self::SessionBusy { .. } => StatusCode::Conflict,
            Self::RateLimited { .. } => StatusCode::RateLimited,
            Self::Cancelled => StatusCode::Cancelled,
            Self::DeadlineExceeded { .. } => StatusCode::DeadlineExceeded,
            Self::Unavailable { .. }
            | Self::UnsupportedFormat { .. }
            | Self::CorruptInput { .. }
            | Self::CollectionDeleted { .. } => StatusCode::DependencyUnavailable,
            Self::Configuration { .. } | Self::Generation { .. } | Self::Internal { .. } => {
                StatusCode::InternalError
            }
        }
    }
}

/// Logical status codes exposed at the interface boundary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatusCode {
    /// Success
    Ok,
    /// Malformed or rejected input
    InvalidInput,
    /// Resource missing
    NotFound,
    /// Requester lacks access
    Forbidden,
    /// Concurrent or duplicate mutation
    Conflict,
    /// Throttled
    RateLimited,
    /// Cooperatively cancelled
    Cancelled,
    /// Wall-clock deadline expired
    DeadlineExceeded,
    /// A collaborator is unavailable or rejected the entity
    DependencyUnavailable,
    /// Opaque internal failure
    InternalError,
}

impl StatusCode {
    /// Stable string form used in logs and responses
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ok => "ok",
            Self::InvalidInput => "invalid_input",
            Self::NotFound => "not_found",
            Self::Forbidden => "forbidden",
            Self::Conflict => "conflict",
            Self::RateLimited => "rate_limited",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for StatusCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
