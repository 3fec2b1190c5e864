//! Token-bucket rate limiting for provider calls.
//!
//! Callers queue on an empty bucket rather than failing, up to their
//! own deadline; exceeding the deadline surfaces `Error::RateLimited`.

use corpora_core::error::{Error, Result};
use parking_lot::Mutex;
use std::time::{Duration, Instant};

/// Rate limit configuration
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    /// Bucket capacity (burst size)
    pub capacity: u32,
    /// Tokens replenished per second
    pub refill_per_sec: f64,
}

impl Default for RateLimit {
    fn default() -> Self {
        Self {
            capacity: 60,
            refill_per_sec: 10.0,
        }
    }
}

#[derive(Debug)]
struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// A token bucket shared by all callers of one provider
#[derive(Debug)]
pub struct TokenBucket {
    limit: RateLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    /// Create a full bucket
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            state: Mutex::new(BucketState {
                tokens: f64::from(limit.capacity),
                last_refill: Instant::now(),
            }),
        }
    }

    /// Try to take one token without waiting
    pub fn try_acquire(&self) -> bool {
        let mut state = self.state.lock();
        self.refill(&mut state);
        if state.tokens >= 1.0 {
            state.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Take one token, waiting for refill up to `deadline` when given.
    ///
    /// # Errors
    ///
    /// Returns `Error::RateLimited` when the deadline passes before a
    /// token becomes available.
    pub async fn acquire(&self, deadline: Option<Instant>) -> Result<()> {
        loop {
            let wait = {
                let mut state = self.state.lock();
                self.refill(&mut state);
                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                // Time until one token is available
                Duration::from_secs_f64((1.0 - state.tokens) / self.limit.refill_per_sec)
            };

            if let Some(deadline) = deadline {
                if Instant::now() + wait > deadline {
                    return Err(Error::RateLimited {
                        message: "provider token bucket empty past request deadline".to_string(),
                    });
                }
            }
            tokio::time::sleep(wait).await;
        }
    }

    fn refill(&self, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens =
            (state.tokens + elapsed * self.limit.refill_per_sec).min(f64::from(self.limit.capacity));
        state.last_refill = now;
    }
}
