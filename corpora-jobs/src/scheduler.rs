//! Worker pool and job tracking

use crate::job::{JobKind, JobSpec, JobState, JobStatus, RetryPolicy};
use async_trait::async_trait;
use chrono::Utc;
use corpora_core::error::{Error, Result};
use corpora_core::identity::JobId;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Executes one job kind. Handlers are registered once at service
/// construction and invoked only by scheduler workers, which makes the
/// scheduler the single writer of the entity status its job kind mirrors.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run the job to completion or failure.
    ///
    /// # Errors
    ///
    /// Transient errors are retried under the scheduler's policy;
    /// everything else fails the job.
    async fn run(&self, payload: &serde_json::Value, cancel: &CancellationToken) -> Result<()>;
}

/// Scheduler sizing and retry policy
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Worker task count
    pub workers: usize,
    /// Per-job retry budget
    pub retry: RetryPolicy,
    /// How long a completed key suppresses resubmission
    pub dedupe_ttl: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
            dedupe_ttl: Duration::from_secs(30),
        }
    }
}

struct QueuedJob {
    id: JobId,
    spec: JobSpec,
}

/// Shared pool of workers consuming a job queue
pub struct Scheduler {
    handlers: DashMap<JobKind, Arc<dyn JobHandler>>,
    statuses: DashMap<JobId, JobStatus>,
    by_key: DashMap<String, JobId>,
    tx: mpsc::UnboundedSender<QueuedJob>,
    shutdown: CancellationToken,
    config: SchedulerConfig,
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("config", &self.config)
            .field("tracked_jobs", &self.statuses.len())
            .finish_non_exhaustive()
    }
}

impl Scheduler {
    /// Create the scheduler and spawn its workers
    #[must_use]
    pub fn new(config: SchedulerConfig) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Arc::new(Self {
            handlers: DashMap::new(),
            statuses: DashMap::new(),
            by_key: DashMap::new(),
            tx,
            shutdown: CancellationToken::new(),
            config,
        });

        let rx = Arc::new(Mutex::new(rx));
        for worker in 0..scheduler.config.workers {
            let scheduler = scheduler.clone();
            let rx = rx.clone();
            tokio::spawn(async move {
                scheduler.worker_loop(worker, rx).await;
            });
        }
        scheduler
    }

    /// Register the handler for a job kind; later registrations replace
    /// earlier ones
    pub fn register(&self, kind: JobKind, handler: Arc<dyn JobHandler>) {
        self.handlers.insert(kind, handler);
    }

    /// Submit a job, deduplicating on its idempotency key.
    ///
    /// An active key, or one completed within the dedupe TTL, returns
    /// the existing job's ID. A previously failed key re-enqueues.
    ///
    /// # Errors
    ///
    /// Returns `Error::Validation` for a job kind with no handler and
    /// `Error::Unavailable` after shutdown.
    pub fn submit(&self, spec: JobSpec) -> Result<JobId> {
        if !self.handlers.contains_key(&spec.kind) {
            return Err(Error::validation(format!(
                "no handler registered for job kind {}",
                spec.kind
            )));
        }

        if let Some(existing) = self.by_key.get(&spec.idempotency_key) {
            let existing_id = *existing;
            drop(existing);
            if let Some(status) = self.statuses.get(&existing_id) {
                let suppress = match status.state {
                    JobState::Queued | JobState::Running => true,
                    JobState::Completed => status.finished_at.map_or(false, |at| {
                        let age = Utc::now().signed_duration_since(at);
                        age.to_std().map_or(true, |age| age < self.config.dedupe_ttl)
                    }),
                    JobState::Failed => false,
                };
                if suppress {
                    debug!(key = %spec.idempotency_key, job = %existing_id, "deduplicated job submission");
                    return Ok(existing_id);
                }
            }
        }

        let id = JobId::new();
        self.statuses.insert(
            id,
            JobStatus {
                id,
                kind: spec.kind,
                idempotency_key: spec.idempotency_key.clone(),
                state: JobState::Queued,
                attempts: 0,
                error: None,
                enqueued_at: Utc::now(),
                finished_at: None,
            },
        );
        self.by_key.insert(spec.idempotency_key.clone(), id);

        self.tx
            .send(QueuedJob { id, spec })
            .map_err(|_| Error::unavailable("scheduler is shut down"))?;
        Ok(id)
    }

    /// Current status of a job
    #[must_use]
    pub fn status(&self, id: &JobId) -> Option<JobStatus> {
        self.statuses.get(id).map(|s| s.value().clone())
    }

    /// Wait until a job reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` for an unknown job and
    /// `Error::DeadlineExceeded` past `timeout`.
    pub async fn wait(&self, id: &JobId, timeout: Duration) -> Result<JobStatus> {
        let started = std::time::Instant::now();
        loop {
            let status = self
                .status(id)
                .ok_or_else(|| Error::not_found("job", id))?;
            if status.state.is_terminal() {
                return Ok(status);
            }
            if started.elapsed() > timeout {
                return Err(Error::DeadlineExceeded {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Stop accepting work and cancel running jobs
    pub fn stop(&self) {
        info!("scheduler shutting down");
        self.shutdown.cancel();
    }

    async fn worker_loop(&self, worker: usize, rx: Arc<Mutex<mpsc::UnboundedReceiver<QueuedJob>>>) {
        loop {
            let job = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    () = self.shutdown.cancelled() => return,
                    job = rx.recv() => job,
                }
            };
            let Some(job) = job else { return };
            debug!(worker, job = %job.id, kind = %job.spec.kind, "worker picked up job");
            self.execute(job).await;
        }
    }

    async fn execute(&self, job: QueuedJob) {
        let Some(handler) = self
            .handlers
            .get(&job.spec.kind)
            .map(|h| Arc::clone(h.value()))
        else {
            // registration checked at submit; losing it mid-flight is a bug
            error!(job = %job.id, kind = %job.spec.kind, "handler vanished for queued job");
            self.finish(job.id, JobState::Failed, Some("handler missing".into()));
            return;
        };

        if let Some(mut status) = self.statuses.get_mut(&job.id) {
            status.state = JobState::Running;
        }

        let mut attempt = 0;
        loop {
            attempt += 1;
            if let Some(mut status) = self.statuses.get_mut(&job.id) {
                status.attempts = attempt;
            }

            match handler.run(&job.spec.payload, &self.shutdown).await {
                Ok(()) => {
                    self.finish(job.id, JobState::Completed, None);
                    return;
                }
                Err(err) if err.is_transient() && attempt < self.config.retry.max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    warn!(
                        job = %job.id,
                        kind = %job.spec.kind,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        "job attempt failed transiently: {err}"
                    );
                    tokio::select! {
                        () = self.shutdown.cancelled() => {
                            self.finish(job.id, JobState::Failed, Some("cancelled".into()));
                            return;
                        }
                        () = tokio::time::sleep(delay) => {}
                    }
                }
                Err(err) => {
                    error!(job = %job.id, kind = %job.spec.kind, attempts = attempt, "job failed: {err}");
                    self.finish(job.id, JobState::Failed, Some(err.to_string()));
                    return;
                }
            }
        }
    }

    fn finish(&self, id: JobId, state: JobState, error: Option<String>) {
        if let Some(mut status) = self.statuses.get_mut(&id) {
            status.state = state;
            status.error = error;
            status.finished_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingHandler {
        calls: AtomicU32,
        fail_first: u32,
    }

    #[async_trait]
    impl JobHandler for CountingHandler {
        async fn run(&self, _payload: &serde_json::Value, _cancel: &CancellationToken) -> Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                Err(Error::unavailable("not yet"))
            } else {
                Ok(())
            }
        }
    }

    fn fast_config() -> SchedulerConfig {
        SchedulerConfig {
            workers: 2,
            retry: RetryPolicy {
                max_attempts: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(4),
            },
            dedupe_ttl: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn jobs_run_and_complete() {
        let scheduler = Scheduler::new(fast_config());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        scheduler.register(JobKind::IngestDocument, handler.clone());

        let id = scheduler
            .submit(JobSpec::new(
                JobKind::IngestDocument,
                "doc-1",
                serde_json::json!({}),
            ))
            .unwrap();
        let status = scheduler.wait(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_failures_retry_then_succeed() {
        let scheduler = Scheduler::new(fast_config());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: 2,
        });
        scheduler.register(JobKind::IngestDocument, handler.clone());

        let id = scheduler
            .submit(JobSpec::new(
                JobKind::IngestDocument,
                "doc-2",
                serde_json::json!({}),
            ))
            .unwrap();
        let status = scheduler.wait(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(status.state, JobState::Completed);
        assert_eq!(status.attempts, 3);
    }

    #[tokio::test]
    async fn retry_budget_exhaustion_fails_the_job() {
        let scheduler = Scheduler::new(fast_config());
        scheduler.register(
            JobKind::IngestDocument,
            Arc::new(CountingHandler {
                calls: AtomicU32::new(0),
                fail_first: u32::MAX,
            }),
        );
        let id = scheduler
            .submit(JobSpec::new(
                JobKind::IngestDocument,
                "doc-3",
                serde_json::json!({}),
            ))
            .unwrap();
        let status = scheduler.wait(&id, Duration::from_secs(2)).await.unwrap();
        assert_eq!(status.state, JobState::Failed);
        assert!(status.error.is_some());
    }

    #[tokio::test]
    async fn duplicate_keys_collapse_to_one_job() {
        let scheduler = Scheduler::new(fast_config());
        let handler = Arc::new(CountingHandler {
            calls: AtomicU32::new(0),
            fail_first: 0,
        });
        scheduler.register(JobKind::IngestDocument, handler.clone());

        let spec = || JobSpec::new(JobKind::IngestDocument, "same-key", serde_json::json!({}));
        let first = scheduler.submit(spec()).unwrap();
        let second = scheduler.submit(spec()).unwrap();
        assert_eq!(first, second);

        scheduler.wait(&first, Duration::from_secs(2)).await.unwrap();
        // recently completed: still deduplicated
        let third = scheduler.submit(spec()).unwrap();
        assert_eq!(first, third);
        assert_eq!(handler.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unregistered_kind_is_rejected() {
        let scheduler = Scheduler::new(fast_config());
        let err = scheduler
            .submit(JobSpec::new(
                JobKind::SummarizeSession,
                "s-1",
                serde_json::json!({}),
            ))
            .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }
}
