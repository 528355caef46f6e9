//! Token bucket admission gate.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Upper bound on a single sleep inside [`RateLimiter::wait_and_allow`].
const MAX_POLL_INTERVAL: Duration = Duration::from_millis(50);
const MIN_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
        }
    }

    fn refill(&mut self, capacity: f64, refill_rate: f64) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
    }

    fn try_acquire(&mut self, capacity: f64, refill_rate: f64) -> bool {
        self.refill(capacity, refill_rate);

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}

/// Per-resource rate limiter. The bucket starts full.
#[derive(Debug)]
pub struct RateLimiter {
    rate_per_second: f64,
    capacity: f64,
    bucket: Mutex<TokenBucket>,
}

impl RateLimiter {
    /// Both values must be positive; `config::validation` enforces this for
    /// configured limiters.
    pub fn new(rate_per_second: f64, capacity: f64) -> Self {
        debug_assert!(rate_per_second > 0.0 && capacity > 0.0);
        Self {
            rate_per_second,
            capacity,
            bucket: Mutex::new(TokenBucket::new(capacity)),
        }
    }

    pub fn rate_per_second(&self) -> f64 {
        self.rate_per_second
    }

    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Consume one token if available. Never blocks.
    pub fn allow(&self) -> bool {
        self.lock().try_acquire(self.capacity, self.rate_per_second)
    }

    /// Tokens currently in the bucket, after refill.
    pub fn available_tokens(&self) -> f64 {
        let mut bucket = self.lock();
        bucket.refill(self.capacity, self.rate_per_second);
        bucket.tokens
    }

    /// Wait until a token is available, or return false once `cancel` fires.
    ///
    /// Sleeps for the time the next token needs, capped at
    /// `MAX_POLL_INTERVAL`, and checks `cancel` on every iteration.
    pub async fn wait_and_allow(&self, cancel: &CancellationToken) -> bool {
        loop {
            if cancel.is_cancelled() {
                return false;
            }

            let wait = {
                let mut bucket = self.lock();
                if bucket.try_acquire(self.capacity, self.rate_per_second) {
                    return true;
                }
                let missing = 1.0 - bucket.tokens;
                // A tiny rate overflows Duration; a zero rate yields NaN.
                Duration::try_from_secs_f64(missing / self.rate_per_second)
                    .unwrap_or(MAX_POLL_INTERVAL)
            };
            let wait = wait.clamp(MIN_POLL_INTERVAL, MAX_POLL_INTERVAL);

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return false,
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, TokenBucket> {
        self.bucket.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
