//! # Global runtime configuration.
//!
//! Provides [`Config`], centralized settings for the taskpool runtime, plus
//! the admission sub-configs [`LimiterConfig`] and [`BreakerConfig`].
//!
//! Config is used in two ways:
//! 1. **Runtime creation**: `Runtime::start(config, subscribers)`
//! 2. **Standalone pools**: `WorkerPool::new(&config, bus)`
//!
//! ## Sentinel values
//! - `queue_bound = 0` → effectively unbounded (clamped to a very large cap)
//! - `pool_size = 0` → clamped to 1 (a pool always has at least one worker)

use std::time::Duration;

/// Global configuration for the taskpool runtime.
///
/// Defines:
/// - **Pool shape**: worker count and queue bound
/// - **Shutdown behavior**: grace period for draining
/// - **Event system**: bus capacity for event delivery
/// - **Admission control**: optional rate limiter and circuit breaker
///
/// ## Field semantics
/// - `pool_size`: fixed number of concurrent workers (min 1, clamped)
/// - `queue_bound`: pending-task queue capacity (`0` = unbounded)
/// - `grace`: maximum wait for in-flight tasks to drain on shutdown
/// - `bus_capacity`: event bus ring buffer size (min 1; clamped by `Bus`)
/// - `limiter`: `None` disables rate limiting at admission
/// - `breaker`: `None` disables the circuit breaker at admission
///
/// ## Notes
/// All fields are public for flexibility. Prefer the helper accessors to
/// avoid sprinkling sentinel checks across the codebase.
#[derive(Clone, Debug)]
pub struct Config {
    /// Fixed number of concurrently running workers.
    pub pool_size: usize,

    /// Capacity of the pending-task queue.
    ///
    /// - `0` = unbounded (no backpressure on submit)
    /// - `n > 0` = `try_submit` fails with `QueueFull` once `n` tasks queue up;
    ///   async `submit` waits for space instead.
    pub queue_bound: usize,

    /// Maximum time to wait for the queue and in-flight tasks to drain when
    /// shutting down. Past the grace, remaining tasks are abandoned and the
    /// shutdown returns `RuntimeError::PartialShutdown`.
    pub grace: Duration,

    /// Capacity of the event bus broadcast channel ring buffer.
    ///
    /// Slow subscribers that lag behind more than `bus_capacity` messages
    /// receive `Lagged` and skip older items. Minimum 1 (enforced by `Bus`).
    pub bus_capacity: usize,

    /// Token-bucket rate limiter at admission, if any.
    pub limiter: Option<LimiterConfig>,

    /// Circuit breaker at admission, if any.
    pub breaker: Option<BreakerConfig>,
}

impl Config {
    /// Returns the worker count clamped to a minimum of 1.
    #[inline]
    pub fn pool_size_clamped(&self) -> usize {
        self.pool_size.max(1)
    }

    /// Returns the queue bound as an `Option`.
    ///
    /// - `None` → unbounded
    /// - `Some(n)` → at most `n` queued tasks
    #[inline]
    pub fn queue_bound(&self) -> Option<usize> {
        if self.queue_bound == 0 {
            None
        } else {
            Some(self.queue_bound)
        }
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `pool_size = 4`
    /// - `queue_bound = 1024`
    /// - `grace = 30s`
    /// - `bus_capacity = 1024`
    /// - no limiter, no breaker
    fn default() -> Self {
        Self {
            pool_size: 4,
            queue_bound: 1024,
            grace: Duration::from_secs(30),
            bus_capacity: 1024,
            limiter: None,
            breaker: None,
        }
    }
}

/// Token-bucket parameters for the admission rate limiter.
#[derive(Clone, Copy, Debug)]
pub struct LimiterConfig {
    /// Refill rate in tokens per second.
    pub rate: f64,
    /// Maximum token count (bucket starts full).
    pub burst: u32,
}

impl Default for LimiterConfig {
    /// Default: `rate = 100/s`, `burst = 100`.
    fn default() -> Self {
        Self {
            rate: 100.0,
            burst: 100,
        }
    }
}

/// Circuit breaker thresholds and timers.
#[derive(Clone, Copy, Debug)]
pub struct BreakerConfig {
    /// Number of failures within `window` that trips the breaker open.
    pub failure_threshold: u32,
    /// Rolling window over which failures are counted.
    pub window: Duration,
    /// How long the breaker stays open before allowing a half-open probe.
    pub open_duration: Duration,
}

impl Default for BreakerConfig {
    /// Default: `failure_threshold = 5`, `window = 10s`, `open_duration = 30s`.
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            window: Duration::from_secs(10),
            open_duration: Duration::from_secs(30),
        }
    }
}
