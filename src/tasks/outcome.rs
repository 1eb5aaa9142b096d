//! # Task identity and the exactly-once result channel.
//!
//! Every accepted task yields exactly one [`TaskResult`]: no duplicates, no
//! silent drops. The submitter receives it through a [`Completion`] handle.
//!
//! ## Rules
//! - [`TaskId`]s are process-global and strictly increasing (atomic counter).
//! - If the pool abandons a task during shutdown, its result is discarded and
//!   the completion resolves to [`TaskError::Canceled`].

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::oneshot;

use crate::error::TaskError;

/// Global counter for task identifiers.
static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque identifier assigned to a task at submission time.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl TaskId {
    /// Allocates the next identifier (strictly increasing, process-global).
    pub(crate) fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Returns the raw numeric value (for logs/metrics).
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

/// Outcome of one accepted task. Produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult<T> {
    /// The submission-time identifier.
    pub id: TaskId,
    /// Value produced by the task body, or the error that ended it.
    pub outcome: Result<T, TaskError>,
}

impl<T> TaskResult<T> {
    /// True if the task produced a value.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Awaitable handle for one submitted task.
///
/// Yields the task's [`TaskResult`] once a worker produces it. If the pool is
/// torn down before the task runs (shutdown abandonment), the result was
/// discarded and the completion resolves to [`TaskError::Canceled`].
#[derive(Debug)]
pub struct Completion<T> {
    id: TaskId,
    rx: oneshot::Receiver<TaskResult<T>>,
}

impl<T> Completion<T> {
    pub(crate) fn new(id: TaskId, rx: oneshot::Receiver<TaskResult<T>>) -> Self {
        Self { id, rx }
    }

    /// The identifier assigned to the submitted task.
    pub fn id(&self) -> TaskId {
        self.id
    }

    /// Waits for the task's result.
    pub async fn wait(self) -> TaskResult<T> {
        match self.rx.await {
            Ok(res) => res,
            // Sender dropped: the pool abandoned the task during shutdown.
            Err(_) => TaskResult {
                id: self.id,
                outcome: Err(TaskError::Canceled),
            },
        }
    }
}
