//! # corpora-jobs
//!
//! The shared background-work machinery: a pool of worker tasks
//! consuming one queue of jobs. Ingestion, reprocessing, collection
//! cleanup, summarization, and entity rebuilds all run here.
//!
//! Jobs carry an idempotency key; re-enqueuing a job whose key is
//! active or recently completed returns the existing handle instead of
//! queuing duplicate work. Transient failures retry with exponential
//! backoff and jitter inside the worker; the job's status mirrors the
//! owning entity's lifecycle, and for its job kind the scheduler's
//! handler is the only writer of that entity field.

#![warn(missing_docs)]
#![warn(missing_debug_implementations)]

/// Job kinds, specs, and status
pub mod job;

/// Worker pool and tracker
pub mod scheduler;

pub use job::{JobKind, JobSpec, JobState, JobStatus, RetryPolicy};
pub use scheduler::{JobHandler, Scheduler, SchedulerConfig};
