//! # Runtime events emitted by the pool, admission control, and shutdown path.
//!
//! The [`EventKind`] enum classifies events across three categories:
//! - **Task lifecycle**: submitted, starting, completed, failed, cancelled.
//! - **Admission**: rejected submissions and breaker state transitions.
//! - **Shutdown**: requested, drained, or timed out.
//!
//! The [`Event`] struct carries metadata such as timestamps, the task id and
//! name, and a human-readable reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Use `seq` to restore the exact order when events are
//! delivered out of order.
//!
//! ## Example
//! ```rust
//! use taskpool::{Event, EventKind};
//!
//! let ev = Event::now(EventKind::TaskFailed)
//!     .with_task("demo-task")
//!     .with_reason("boom");
//!
//! assert_eq!(ev.kind, EventKind::TaskFailed);
//! assert_eq!(ev.task.as_deref(), Some("demo-task"));
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::tasks::TaskId;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of runtime events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Task lifecycle events ===
    /// Task accepted into the pool queue.
    TaskSubmitted,
    /// A worker dequeued the task and is about to run it.
    TaskStarting,
    /// Task produced a value.
    TaskCompleted,
    /// Task body reported an error (`reason` carries the message).
    TaskFailed,
    /// Task was cancelled (before or during execution).
    TaskCanceled,

    // === Admission events ===
    /// Submission rejected before reaching the queue
    /// (`reason` carries the rejection label).
    TaskRejected,
    /// Circuit breaker transitioned to open.
    BreakerOpened,
    /// Circuit breaker transitioned to half-open (probe window).
    BreakerHalfOpen,
    /// Circuit breaker transitioned back to closed.
    BreakerClosed,

    // === Shutdown events ===
    /// Shutdown initiated; intake is sealed.
    ShutdownRequested,
    /// All queued and running tasks drained within the grace period.
    DrainCompleted,
    /// Grace period exceeded; remaining tasks were abandoned.
    DrainTimedOut,
}

impl EventKind {
    /// Returns a short stable label (snake_case) for use in logs/metrics,
    /// matching the error-label vocabulary.
    pub fn as_label(&self) -> &'static str {
        match self {
            EventKind::TaskSubmitted => "submitted",
            EventKind::TaskStarting => "starting",
            EventKind::TaskCompleted => "completed",
            EventKind::TaskFailed => "failed",
            EventKind::TaskCanceled => "canceled",
            EventKind::TaskRejected => "rejected",
            EventKind::BreakerOpened => "breaker_opened",
            EventKind::BreakerHalfOpen => "breaker_half_open",
            EventKind::BreakerClosed => "breaker_closed",
            EventKind::ShutdownRequested => "shutdown_requested",
            EventKind::DrainCompleted => "drain_completed",
            EventKind::DrainTimedOut => "drain_timed_out",
        }
    }
}

/// A single runtime event with metadata.
#[derive(Debug, Clone)]
pub struct Event {
    /// Event classification.
    pub kind: EventKind,
    /// Task name, when the event concerns one task.
    pub task: Option<Arc<str>>,
    /// Task id, when the event concerns one task.
    pub id: Option<TaskId>,
    /// Human-readable detail (error message, rejection label).
    pub reason: Option<Arc<str>>,
    /// Time the task spent in the queue before a worker picked it up
    /// (`TaskStarting` only).
    pub queued_for: Option<Duration>,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Globally monotonic sequence number.
    pub seq: u64,
}

impl Event {
    /// Creates an event stamped with the current time and next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            kind,
            task: None,
            id: None,
            reason: None,
            queued_for: None,
            at: SystemTime::now(),
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
        }
    }

    /// Attaches a task name.
    #[inline]
    pub fn with_task(mut self, task: impl Into<Arc<str>>) -> Self {
        self.task = Some(task.into());
        self
    }

    /// Attaches a task id.
    #[inline]
    pub fn with_id(mut self, id: TaskId) -> Self {
        self.id = Some(id);
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches the time spent queued before execution began.
    #[inline]
    pub fn with_queued_for(mut self, queued_for: Duration) -> Self {
        self.queued_for = Some(queued_for);
        self
    }
}
