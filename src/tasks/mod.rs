//! # Task abstractions and per-task results.
//!
//! This module provides the core task-related types:
//! - [`Task`] - trait for implementing async cancellable units of work
//! - [`TaskFn`] - function-backed task implementation
//! - [`TaskRef`] - shared reference to a task (`Arc<dyn Task<T>>`)
//! - [`TaskId`] - opaque identifier assigned at submission
//! - [`TaskResult`] - the exactly-once outcome of an accepted task
//! - [`Completion`] - awaitable handle yielding a [`TaskResult`]

mod outcome;
mod task;
mod task_fn;

pub use outcome::{Completion, TaskId, TaskResult};
pub use task::{Task, TaskRef};
pub use task_fn::TaskFn;
