//! # taskpool
//!
//! **Taskpool** is a bounded concurrent task execution library for Rust.
//!
//! It provides primitives to submit, throttle, and compose async tasks over
//! fixed-size worker pools with cooperative cancellation and graceful
//! shutdown. The crate is designed as a building block for services that
//! need explicit resource bounds rather than unbounded spawning.
//!
//! ## Architecture
//! ### Overview
//! ```text
//!     ┌──────────────┐   ┌──────────────┐   ┌──────────────┐
//!     │     Task     │   │     Task     │   │     Task     │
//!     │ (user unit 1)│   │ (user unit 2)│   │ (user unit 3)│
//!     └──────┬───────┘   └──────┬───────┘   └──────┬───────┘
//!            ▼                  ▼                  ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  Runtime (front door)                                             │
//! │  - RateLimiter (token bucket, optional)                           │
//! │  - CircuitBreaker (failure-driven gate, optional)                 │
//! │  - Bus (broadcast events)                                         │
//! │  - SubscriberSet (fans out to user subscribers)                   │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//! ┌───────────────────────────────────────────────────────────────────┐
//! │  WorkerPool (bounded FIFO queue, pool_size workers)               │
//! │                                                                   │
//! │   queue ──► worker 1 ─┐                                           │
//! │         ──► worker 2 ─┼─► run(ctx) ─► oneshot ─► Completion       │
//! │         ──► worker N ─┘                                           │
//! └──────────────────────────────┬────────────────────────────────────┘
//!                                ▼
//!                     Bus (broadcast channel)
//!                (capacity: Config::bus_capacity)
//!                                │
//!                                ▼
//!                     ┌──────────────────────┐
//!                     │  subscriber_listener │
//!                     │     (in Runtime)     │
//!                     └──────────┬───────────┘
//!                                ▼
//!                          SubscriberSet
//!                        (per-sub queues)
//!                     ┌─────────┼─────────┐
//!                     ▼         ▼         ▼
//!                   worker1   worker2   workerN
//!                     ▼         ▼         ▼
//!                 sub1.on   sub2.on   subN.on
//!                 _event()  _event()  _event()
//! ```
//!
//! ### Lifecycle of one submission
//! ```text
//! submit(task, ctx)
//!   ├─► RateLimiter.acquire()        ─ RateLimited / PoolClosed
//!   ├─► CircuitBreaker.admit()       ─ CircuitOpen / PoolClosed
//!   ├─► WorkerPool queue (bounded)   ─ QueueFull / PoolClosed
//!   │
//!   worker dequeues:
//!   ├─ ctx cancelled? ──► result = Canceled (body never invoked)
//!   ├─► publish TaskStarting
//!   ├─► task.run(ctx)
//!   │     ├─ Ok(value)           ─► publish TaskCompleted
//!   │     ├─ Err(Canceled)       ─► publish TaskCanceled
//!   │     └─ Err(Failed{..})     ─► publish TaskFailed
//!   └─► oneshot ─► Completion::wait() (exactly one TaskResult)
//!
//! shutdown(grace)
//!   ├─► seal limiter + breaker + pool intake
//!   ├─► drain queue and in-flight tasks (never cancelled by shutdown)
//!   └─► grace exceeded ─► abandon remainder, Err(PartialShutdown)
//! ```
//!
//! ## Features
//! | Area              | Description                                                           | Key types / traits                       |
//! |-------------------|-----------------------------------------------------------------------|------------------------------------------|
//! | **Pool**          | Fixed-size workers over a bounded FIFO queue, exactly-once results.   | [`WorkerPool`], [`Completion`]           |
//! | **Cancellation**  | Hierarchical deadline/cancel contexts, polled cooperatively.          | [`Context`], [`CancelHandle`]            |
//! | **Pipelines**     | Stream stages and fan-out/fan-in with ordered or unordered merge.     | [`Stage`], [`FanOut`], [`MergePolicy`]   |
//! | **Admission**     | Token-bucket throttling and failure-driven circuit breaking.          | [`RateLimiter`], [`CircuitBreaker`]      |
//! | **Subscriber API**| Hook into lifecycle events (logging, metrics, custom subscribers).    | [`Subscribe`]                            |
//! | **Errors**        | Typed errors for admission, execution, and shutdown.                  | [`SubmitError`], [`TaskError`], [`RuntimeError`] |
//! | **Configuration** | Centralize runtime settings.                                          | [`Config`]                               |
//!
//! ## Optional features
//! - `logging`: exports a simple built-in [`LogWriter`] _(demo/reference only)_.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use taskpool::{Config, Context, Runtime, TaskFn, TaskRef};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut cfg = Config::default();
//!     cfg.pool_size = 2;
//!     cfg.grace = Duration::from_secs(5);
//!
//!     // Build subscribers (optional)
//!     #[cfg(feature = "logging")]
//!     let subs: Vec<Arc<dyn taskpool::Subscribe>> = {
//!         use taskpool::LogWriter;
//!         vec![Arc::new(LogWriter::default())]
//!     };
//!     #[cfg(not(feature = "logging"))]
//!     let subs: Vec<Arc<dyn taskpool::Subscribe>> = Vec::new();
//!
//!     let rt = Runtime::start(cfg, subs);
//!
//!     // Define a simple task; the context is polled cooperatively.
//!     let hello: TaskRef<&'static str> = TaskFn::arc("hello", |ctx: Context| async move {
//!         if ctx.is_cancelled() {
//!             return Err(taskpool::TaskError::Canceled);
//!         }
//!         Ok("hello from the pool")
//!     });
//!
//!     let completion = rt.submit(hello, &Context::root()).await?;
//!     println!("{:?}", completion.wait().await.outcome);
//!
//!     rt.shutdown(Duration::from_secs(5)).await?;
//!     Ok(())
//! }
//! ```
mod admission;
mod config;
mod context;
mod error;
mod events;
mod pipeline;
mod pool;
mod runtime;
mod subscribers;
mod tasks;

// ---- Public re-exports ----

pub use admission::{CircuitBreaker, CircuitState, RateLimiter, Ticket};
pub use config::{BreakerConfig, Config, LimiterConfig};
pub use context::{CancelHandle, Context};
pub use error::{RuntimeError, SubmitError, TaskError};
pub use events::{Bus, Event, EventKind};
pub use pipeline::{FanOut, MergePolicy, Stage, StageConfig};
pub use pool::WorkerPool;
pub use runtime::{wait_for_shutdown_signal, Runtime, ShutdownSignal};
pub use subscribers::{Subscribe, SubscriberSet};
pub use tasks::{Completion, Task, TaskFn, TaskId, TaskRef, TaskResult};

// Optional: expose a simple built-in logger subscriber (demo/reference).
// Enable with: `--features logging`
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
