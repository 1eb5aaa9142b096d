//! # Token-bucket rate limiter.
//!
//! A bucket of at most `burst` tokens, replenished at `rate` tokens per
//! second. Refill is computed **lazily** on each acquire from the elapsed
//! time since the last refill; there is no background timer.
//!
//! ## Modes
//! - [`RateLimiter::try_acquire`] - admission control: rejects immediately
//!   with `RateLimited` when the bucket is empty.
//! - [`RateLimiter::acquire`] - blocking: sleeps until a token accrues.
//!
//! ## Rules
//! - The token count is never negative and never exceeds `burst`.
//! - Time is measured on the tokio clock, so paused-clock tests are exact.
//! - After [`RateLimiter::seal`], every acquire fails with `PoolClosed`.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use crate::config::LimiterConfig;
use crate::error::SubmitError;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
    sealed: bool,
}

/// Token-bucket admission gate.
///
/// # Example
/// ```
/// use taskpool::{LimiterConfig, RateLimiter};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let limiter = RateLimiter::new(&LimiterConfig { rate: 1.0, burst: 2 });
/// assert!(limiter.try_acquire().is_ok());
/// assert!(limiter.try_acquire().is_ok());
/// assert!(limiter.try_acquire().is_err()); // bucket empty
/// # }
/// ```
pub struct RateLimiter {
    rate: f64,
    burst: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Creates a limiter with a full bucket.
    pub fn new(cfg: &LimiterConfig) -> Self {
        let burst = f64::from(cfg.burst.max(1));
        Self {
            rate: cfg.rate.max(0.0),
            burst,
            bucket: Mutex::new(Bucket {
                tokens: burst,
                last_refill: Instant::now(),
                sealed: false,
            }),
        }
    }

    /// Takes one token or rejects immediately.
    ///
    /// Fails with [`SubmitError::RateLimited`] when the bucket is empty and
    /// [`SubmitError::PoolClosed`] once sealed.
    pub fn try_acquire(&self) -> Result<(), SubmitError> {
        match self.take_or_wait() {
            Ok(()) => Ok(()),
            Err(Some(_wait)) => Err(SubmitError::RateLimited),
            Err(None) => Err(SubmitError::PoolClosed),
        }
    }

    /// Takes one token, sleeping until one accrues if the bucket is empty.
    ///
    /// Fails with [`SubmitError::PoolClosed`] once sealed, and with
    /// [`SubmitError::RateLimited`] when `rate` is zero (the bucket would
    /// never refill, so waiting is pointless).
    pub async fn acquire(&self) -> Result<(), SubmitError> {
        loop {
            match self.take_or_wait() {
                Ok(()) => return Ok(()),
                Err(None) => return Err(SubmitError::PoolClosed),
                Err(Some(wait)) => {
                    if self.rate <= 0.0 {
                        return Err(SubmitError::RateLimited);
                    }
                    tokio::time::sleep(wait).await;
                }
            }
        }
    }

    /// Permanently rejects all subsequent acquires (shutdown intake stop).
    pub fn seal(&self) {
        self.bucket.lock().expect("limiter lock poisoned").sealed = true;
    }

    /// Current token count after a lazy refill (observability/tests).
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().expect("limiter lock poisoned");
        self.refill(&mut bucket);
        bucket.tokens
    }

    /// Attempts to take a token. On failure returns how long until the next
    /// token accrues (`Err(Some(wait))`), or `Err(None)` when sealed.
    fn take_or_wait(&self) -> Result<(), Option<Duration>> {
        let mut bucket = self.bucket.lock().expect("limiter lock poisoned");
        if bucket.sealed {
            return Err(None);
        }
        self.refill(&mut bucket);
        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            return Ok(());
        }
        let wait = if self.rate > 0.0 {
            Duration::from_secs_f64((1.0 - bucket.tokens) / self.rate)
        } else {
            Duration::ZERO
        };
        Err(Some(wait))
    }

    /// Adds `elapsed * rate` tokens, capped at `burst`.
    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.saturating_duration_since(bucket.last_refill);
        bucket.last_refill = now;
        if self.rate > 0.0 {
            bucket.tokens = (bucket.tokens + elapsed.as_secs_f64() * self.rate).min(self.burst);
        }
    }
}
