//! Job kinds, specifications, and status records

use chrono::{DateTime, Utc};
use corpora_core::identity::JobId;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// The closed set of background job kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Run the ingestion state machine for one document
    IngestDocument,
    /// Re-chunk and re-embed one document under its current policy
    ReprocessDocument,
    /// Sweep vectors, chunks, and blobs of a tombstoned collection
    DeleteCollectionData,
    /// Summarize the unsummarized range of one session
    SummarizeSession,
    /// Re-derive a session's entity tracker from its messages
    RebuildEntities,
}

impl JobKind {
    /// Stable string form
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::IngestDocument => "ingest_document",
            Self::ReprocessDocument => "reprocess_document",
            Self::DeleteCollectionData => "delete_collection_data",
            Self::SummarizeSession => "summarize_session",
            Self::RebuildEntities => "rebuild_entities",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job submission
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// What to run
    pub kind: JobKind,
    /// Deduplication key; submissions sharing an active or recently
    /// completed key collapse into one job
    pub idempotency_key: String,
    /// Handler-specific payload
    pub payload: serde_json::Value,
}

impl JobSpec {
    /// Build a spec
    #[must_use]
    pub fn new(kind: JobKind, idempotency_key: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            kind,
            idempotency_key: idempotency_key.into(),
            payload,
        }
    }
}

/// Execution state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// Waiting for a worker
    Queued,
    /// A worker is executing it
    Running,
    /// Finished successfully
    Completed,
    /// Exhausted its retry budget or failed permanently
    Failed,
}

impl JobState {
    /// Whether the job will make no further progress
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Tracked status of one job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStatus {
    /// Job identifier
    pub id: JobId,
    /// What kind of job this is
    pub kind: JobKind,
    /// The submission's idempotency key
    pub idempotency_key: String,
    /// Current state
    pub state: JobState,
    /// Attempts made so far
    pub attempts: u32,
    /// Terminal error, when failed
    pub error: Option<String>,
    /// Submission time
    pub enqueued_at: DateTime<Utc>,
    /// Completion or failure time
    pub finished_at: Option<DateTime<Utc>>,
}

/// Job-level retry budget; exponential backoff with jitter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(30),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), jittered up to 25%
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .base_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        base.mul_f64(1.0 + jitter)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_strings_are_stable() {
        assert_eq!(JobKind::IngestDocument.as_str(), "ingest_document");
        assert_eq!(JobKind::SummarizeSession.as_str(), "summarize_session");
    }

    #[test]
    fn backoff_grows_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
        };
        let d1 = policy.delay_for(1);
        let d3 = policy.delay_for(3);
        assert!(d1 >= Duration::from_millis(100));
        // capped at max_delay plus jitter headroom
        assert!(d3 <= Duration::from_millis(350).mul_f64(1.25));
    }
}
