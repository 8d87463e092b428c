//! Eval execution rate limiting.
//!
//! Two coordinated primitives over the same budget of eval executions: a
//! token bucket bounding overall evals/second (burst equals the refill
//! rate), and a semaphore bounding concurrent judge calls independently.
//!
//! Both acquisitions honor cancellation: a triggered token makes them
//! return [`Error::Cancelled`] without consuming a token or a slot.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use omnia_domain::config::RateLimitConfig;
use omnia_domain::error::{Error, Result};

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

pub struct RateLimiter {
    capacity: f64,
    refill_per_sec: f64,
    bucket: Mutex<Bucket>,
    judges: Arc<Semaphore>,
}

impl RateLimiter {
    pub fn new(cfg: &RateLimitConfig) -> Self {
        let rate = cfg.max_evals_per_second.max(1) as f64;
        Self {
            capacity: rate,
            refill_per_sec: rate,
            bucket: Mutex::new(Bucket {
                tokens: rate,
                last_refill: Instant::now(),
            }),
            judges: Arc::new(Semaphore::new(cfg.max_concurrent_judge_calls)),
        }
    }

    /// Take one token, waiting for refill if the bucket is empty.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let wait = {
                let mut bucket = self.bucket.lock();
                self.refill(&mut bucket);
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return Ok(());
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Take one token **and** one judge slot.
    ///
    /// The slot is claimed first so that a cancellation during the token
    /// wait releases it again — a cancelled acquire consumes nothing.
    pub async fn acquire_judge(&self, cancel: &CancellationToken) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let permit = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            permit = self.judges.clone().acquire_owned() => {
                permit.map_err(|_| Error::Invariant("judge semaphore closed".into()))?
            }
        };

        // A failed token acquire drops the permit, returning the slot.
        self.acquire(cancel).await?;
        permit.forget();
        Ok(())
    }

    /// Return a judge slot. Must be called on every exit path after a
    /// successful [`acquire_judge`](Self::acquire_judge).
    pub fn release_judge(&self) {
        self.judges.add_permits(1);
    }

    /// Judge slots currently free (for introspection/tests).
    pub fn available_judge_slots(&self) -> usize {
        self.judges.available_permits()
    }

    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        bucket.last_refill = now;
    }
}
