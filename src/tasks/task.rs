//! # Task abstraction.
//!
//! This module defines the [`Task`] trait (async, cancellable). The common
//! handle type is [`TaskRef`], an `Arc<dyn Task<T>>` suitable for sharing
//! across the runtime.
//!
//! A task receives a [`Context`] and should periodically check it to stop
//! cooperatively when cancelled or past its deadline.

use std::sync::Arc;

use async_trait::async_trait;

use crate::context::Context;
use crate::error::TaskError;

/// Shared handle to a task producing values of type `T`.
pub type TaskRef<T> = Arc<dyn Task<T>>;

/// # Asynchronous, cancellable unit of work.
///
/// A `Task` has a stable [`name`](Task::name) and an async [`run`](Task::run)
/// method that receives a [`Context`]. The context is the cooperative
/// cancellation poll point: the pool only surfaces cancellation at task
/// boundaries, so long-running bodies should check `ctx.is_cancelled()`
/// periodically and return [`TaskError::Canceled`] promptly.
///
/// # Example
/// ```
/// use async_trait::async_trait;
/// use taskpool::{Context, Task, TaskError};
///
/// struct Demo;
///
/// #[async_trait]
/// impl Task<u32> for Demo {
///     fn name(&self) -> &str { "demo" }
///
///     async fn run(&self, ctx: Context) -> Result<u32, TaskError> {
///         if ctx.is_cancelled() {
///             return Err(TaskError::Canceled);
///         }
///         Ok(42)
///     }
/// }
/// ```
#[async_trait]
pub trait Task<T>: Send + Sync + 'static
where
    T: Send + 'static,
{
    /// Returns a stable, human-readable task name.
    fn name(&self) -> &str;

    /// Executes the task until completion or cooperative cancellation.
    async fn run(&self, ctx: Context) -> Result<T, TaskError>;
}
