//! Bounded retry with exponential backoff and jitter.
//!
//! Only errors classified transient by the taxonomy are retried; retries
//! never cross a stage or job boundary, so each caller owns its own
//! budget.

use corpora_core::error::{Error, Result};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Retry budget and backoff shape
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    /// Total attempts, including the first
    pub max_attempts: u32,
    /// Delay before the first retry
    pub initial_delay: Duration,
    /// Upper bound on any single delay
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    /// Delay before retry number `attempt` (1-based), with up to 25% jitter
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base = self
            .initial_delay
            .saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
            .min(self.max_delay);
        let jitter = rand::thread_rng().gen_range(0.0..=0.25);
        base.mul_f64(1.0 + jitter)
    }
}

/// Run `op` until it succeeds, fails permanently, is cancelled, or the
/// attempt budget is spent.
///
/// # Errors
///
/// Returns the last transient error when the budget is exhausted, any
/// non-transient error immediately, and `Error::Cancelled` when the
/// token fires between attempts.
pub async fn retry_with_backoff<T, F, Fut>(
    policy: BackoffPolicy,
    cancel: &CancellationToken,
    operation_name: &str,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0;
    loop {
        attempt += 1;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                let delay = policy.delay_for(attempt);
                debug!(
                    operation = operation_name,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    "transient failure, backing off: {err}"
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                if err.is_transient() {
                    warn!(
                        operation = operation_name,
                        attempts = attempt,
                        "retry budget exhausted: {err}"
                    );
                }
                return Err(err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: 3,
            initial_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(4),
        }
    }

    #[tokio::test]
    async fn succeeds_after_transient_failures() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let result = retry_with_backoff(fast_policy(), &cancel, "test", || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::unavailable("flaky"))
            } else {
                Ok(42)
            }
        })
        .await
        .unwrap();
        assert_eq!(result, 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let err = retry_with_backoff(fast_policy(), &cancel, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::validation("bad input"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let calls = AtomicU32::new(0);
        let cancel = CancellationToken::new();
        let err = retry_with_backoff(fast_policy(), &cancel, "test", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::unavailable("always down"))
        })
        .await
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancellation_stops_retries() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = retry_with_backoff(fast_policy(), &cancel, "test", || async {
            Ok::<_, Error>(1)
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
    }
}
