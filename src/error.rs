//! Error types used by the taskpool runtime and tasks.
//!
//! This module defines three error enums:
//!
//! - [`TaskError`] — failures of an individual task execution, carried inside
//!   a [`TaskResult`](crate::tasks::TaskResult).
//! - [`SubmitError`] — synchronous admission rejections (pool, limiter, breaker).
//! - [`RuntimeError`] — errors raised by the orchestration runtime itself.
//!
//! All types provide `as_label` helpers for logging/metrics. Nothing in this
//! crate is fatal to the process; every failure state is representable as a
//! value returned to the caller.

use std::time::Duration;
use thiserror::Error;

/// # Errors produced by task execution.
///
/// These travel inside a [`TaskResult`](crate::tasks::TaskResult) and never
/// affect the outcome of any other task (except under explicit fail-fast mode
/// in a pipeline stage, where the first error cancels the shared context).
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TaskError {
    /// Context expired or was manually cancelled before or during execution.
    ///
    /// Never retried automatically.
    #[error("context cancelled")]
    Canceled,

    /// The task body itself reported an error.
    ///
    /// The message is propagated verbatim; it never masks other task outcomes.
    #[error("execution failed: {error}")]
    Failed {
        /// The underlying error message.
        error: String,
    },
}

impl TaskError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskpool::TaskError;
    ///
    /// let err = TaskError::Failed { error: "boom".into() };
    /// assert_eq!(err.as_label(), "task_failed");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Canceled => "task_canceled",
            TaskError::Failed { .. } => "task_failed",
        }
    }

    /// Convenience constructor for [`TaskError::Failed`].
    pub fn failed(error: impl Into<String>) -> Self {
        TaskError::Failed {
            error: error.into(),
        }
    }
}

/// # Admission rejections.
///
/// Returned synchronously from the submission path. None of these produce a
/// [`TaskResult`](crate::tasks::TaskResult): a rejected task was never
/// accepted, so the exactly-one-result guarantee does not apply to it.
#[non_exhaustive]
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitError {
    /// Submission after `close()` / `shutdown()`. Not retryable.
    #[error("pool closed")]
    PoolClosed,

    /// Bounded queue is full (non-blocking submit). Back-pressure signal;
    /// the caller may retry or drop.
    #[error("submission queue full")]
    QueueFull,

    /// Circuit breaker rejected admission. The caller should back off;
    /// recoverable once the breaker transitions to half-open/closed.
    #[error("circuit open")]
    CircuitOpen,

    /// Token bucket empty in admission-control mode. Retryable after refill.
    #[error("rate limited")]
    RateLimited,
}

impl SubmitError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use taskpool::SubmitError;
    ///
    /// assert_eq!(SubmitError::CircuitOpen.as_label(), "circuit_open");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SubmitError::PoolClosed => "pool_closed",
            SubmitError::QueueFull => "queue_full",
            SubmitError::CircuitOpen => "circuit_open",
            SubmitError::RateLimited => "rate_limited",
        }
    }

    /// Indicates whether the rejection is safe to retry later.
    ///
    /// Returns `true` for [`SubmitError::QueueFull`], [`SubmitError::CircuitOpen`]
    /// and [`SubmitError::RateLimited`], `false` for [`SubmitError::PoolClosed`].
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SubmitError::PoolClosed)
    }
}

/// # Errors produced by the taskpool runtime.
///
/// These represent failures of the orchestration system itself, such as a
/// shutdown drain exceeding its grace period.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RuntimeError {
    /// Drain grace period was exceeded; still-running tasks were abandoned
    /// and their results discarded.
    #[error("shutdown grace {grace:?} exceeded; abandoned {abandoned} task(s)")]
    PartialShutdown {
        /// The configured grace duration.
        grace: Duration,
        /// Number of tasks (queued + running) abandoned at the deadline.
        abandoned: usize,
    },
}

impl RuntimeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            RuntimeError::PartialShutdown { .. } => "partial_shutdown",
        }
    }

    /// Returns a human-readable message with details about the error.
    pub fn as_message(&self) -> String {
        match self {
            RuntimeError::PartialShutdown { grace, abandoned } => {
                format!("grace exceeded after {grace:?}; abandoned tasks={abandoned}")
            }
        }
    }
}
