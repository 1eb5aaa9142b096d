//! # Worker pool: bounded concurrent task execution.
//!
//! [`WorkerPool`] maintains exactly `pool_size` concurrently running workers
//! pulling from one shared FIFO queue. Every accepted task yields exactly one
//! [`TaskResult`] through its [`Completion`] handle: no duplicates, no silent
//! drops.
//!
//! ## Architecture
//! ```text
//! submit()/try_submit()
//!        │           (bounded mpsc queue)
//!        ▼
//!   ┌─────────┐    ┌──────────┐ ┌──────────┐ ┌──────────┐
//!   │  queue  │───►│ worker 1 │ │ worker 2 │ │ worker N │
//!   └─────────┘    └────┬─────┘ └────┬─────┘ └────┬─────┘
//!                       │ run(ctx)   │            │
//!                       ▼            ▼            ▼
//!                  oneshot ─► Completion::wait() per task
//!                       │
//!                       └─► Bus: TaskStarting / TaskCompleted /
//!                                TaskFailed / TaskCanceled
//! ```
//!
//! ## Submission policy
//! Both policies from the contract are exposed and documented:
//! - [`WorkerPool::submit`] (async) **blocks until queue space is available**;
//! - [`WorkerPool::try_submit`] is non-blocking and fails with
//!   [`SubmitError::QueueFull`] when the bounded queue is full.
//!
//! Both fail with [`SubmitError::PoolClosed`] once the pool is closing.
//!
//! ## Rules
//! - `0 ≤ active ≤ pool_size` always; workers never run more than one task.
//! - A task whose context is already cancelled at dequeue time produces a
//!   `Canceled` result **without invoking the body**.
//! - Cancellation is cooperative: a deadline elapsing mid-run never
//!   interrupts the body; the pool surfaces it only at task boundaries.
//! - Within a single worker, tasks run strictly in dequeue order.
//! - `close()` stops intake immediately, drains the queue, then returns once
//!   all workers have exited. Calling it twice is a no-op. A submit parked
//!   on a full queue when the pool closes is rejected with `PoolClosed`
//!   rather than admitted into freed space.

mod worker;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::context::Context;
use crate::error::{RuntimeError, SubmitError};
use crate::events::{Bus, Event, EventKind};
use crate::tasks::{Completion, TaskId, TaskRef, TaskResult};

use worker::worker_loop;

/// Queue capacity used for the `queue_bound = 0` (unbounded) sentinel.
const UNBOUNDED_QUEUE: usize = usize::MAX >> 4;

/// One accepted task in flight between `submit` and a worker.
pub(crate) struct Submission<T> {
    pub id: TaskId,
    pub task: TaskRef<T>,
    pub ctx: Context,
    pub submitted_at: Instant,
    pub done: oneshot::Sender<TaskResult<T>>,
}

/// Pool state shared between the handle and the workers.
///
/// All mutation happens through these atomics; nothing outside the pool
/// instance touches them.
pub(crate) struct PoolShared {
    pub capacity: usize,
    pub active: AtomicUsize,
    pub queued: AtomicUsize,
    pub closed: AtomicBool,
}

/// Fixed-size set of concurrent executors over a shared bounded queue.
///
/// # Example
/// ```
/// use taskpool::{Config, Context, Bus, TaskFn, WorkerPool};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let cfg = Config { pool_size: 2, ..Config::default() };
/// let pool = WorkerPool::new(&cfg, Bus::new(16));
///
/// let task = TaskFn::arc("double", |_ctx| async move { Ok(21 * 2) });
/// let completion = pool.submit(task, &Context::root()).await.unwrap();
/// assert_eq!(completion.wait().await.outcome, Ok(42));
///
/// pool.close().await;
/// # }
/// ```
pub struct WorkerPool<T> {
    shared: Arc<PoolShared>,
    tx: std::sync::Mutex<Option<mpsc::Sender<Submission<T>>>>,
    workers: Mutex<JoinSet<()>>,
    // Cancelled by seal(); a submit parked on a full queue selects on it so
    // closing the pool also unparks (and rejects) waiting submitters.
    closed: CancellationToken,
    bus: Bus,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Creates the pool and spawns `cfg.pool_size` workers immediately.
    pub fn new(cfg: &Config, bus: Bus) -> Self {
        let capacity = cfg.pool_size_clamped();
        let bound = cfg.queue_bound().unwrap_or(UNBOUNDED_QUEUE);

        let (tx, rx) = mpsc::channel::<Submission<T>>(bound);
        let rx = Arc::new(Mutex::new(rx));

        let shared = Arc::new(PoolShared {
            capacity,
            active: AtomicUsize::new(0),
            queued: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        });

        let mut workers = JoinSet::new();
        for _ in 0..capacity {
            workers.spawn(worker_loop(
                Arc::clone(&shared),
                Arc::clone(&rx),
                bus.clone(),
            ));
        }

        Self {
            shared,
            tx: std::sync::Mutex::new(Some(tx)),
            workers: Mutex::new(workers),
            closed: CancellationToken::new(),
            bus,
        }
    }

    /// Submits a task, waiting for queue space if the bounded queue is full
    /// (blocking-submit policy).
    ///
    /// Returns a [`Completion`] that yields the task's single [`TaskResult`].
    pub async fn submit(
        &self,
        task: TaskRef<T>,
        ctx: &Context,
    ) -> Result<Completion<T>, SubmitError> {
        let (sub, completion) = self.accept(task, ctx)?;
        let tx = self.sender()?;

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        // The cloned sender keeps the channel open past seal(), so a submit
        // parked on a full queue must watch the close signal as well: space
        // freed by a worker after close() must not admit the task.
        let sent = tokio::select! {
            res = tx.send(sub) => res.is_ok(),
            _ = self.closed.cancelled() => false,
        };
        if !sent {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(SubmitError::PoolClosed);
        }
        self.publish_submitted(&completion);
        Ok(completion)
    }

    /// Submits a task without blocking (admission-control policy).
    ///
    /// Fails with [`SubmitError::QueueFull`] when the bounded queue is full.
    pub fn try_submit(
        &self,
        task: TaskRef<T>,
        ctx: &Context,
    ) -> Result<Completion<T>, SubmitError> {
        let (sub, completion) = self.accept(task, ctx)?;
        let tx = self.sender()?;

        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        match tx.try_send(sub) {
            Ok(()) => {
                self.publish_submitted(&completion);
                Ok(completion)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                Err(SubmitError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.shared.queued.fetch_sub(1, Ordering::SeqCst);
                Err(SubmitError::PoolClosed)
            }
        }
    }

    /// Stops intake immediately, lets queued tasks drain, then returns once
    /// all workers have exited. Idempotent.
    pub async fn close(&self) {
        self.seal();
        let mut workers = self.workers.lock().await;
        while workers.join_next().await.is_some() {}
    }

    /// Like [`WorkerPool::close`], but abandons work still pending after
    /// `grace`: remaining tasks are dropped (their completions resolve to
    /// `Canceled`) and [`RuntimeError::PartialShutdown`] is returned.
    pub async fn close_with_grace(&self, grace: Duration) -> Result<(), RuntimeError> {
        self.seal();
        let mut workers = self.workers.lock().await;
        let drain = async {
            while workers.join_next().await.is_some() {}
        };
        match tokio::time::timeout(grace, drain).await {
            Ok(()) => {
                self.bus.emit(EventKind::DrainCompleted);
                Ok(())
            }
            Err(_) => {
                let abandoned = self.shared.active.load(Ordering::SeqCst)
                    + self.shared.queued.load(Ordering::SeqCst);
                workers.abort_all();
                while workers.join_next().await.is_some() {}
                self.bus.publish(
                    Event::now(EventKind::DrainTimedOut)
                        .with_reason(format!("abandoned={abandoned}")),
                );
                Err(RuntimeError::PartialShutdown { grace, abandoned })
            }
        }
    }

    /// Number of tasks currently being executed by workers.
    pub fn active(&self) -> usize {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Number of accepted tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    /// Fixed worker count.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// True once `close()` / `close_with_grace()` has been called.
    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Validates intake and builds the submission + completion pair.
    fn accept(
        &self,
        task: TaskRef<T>,
        ctx: &Context,
    ) -> Result<(Submission<T>, Completion<T>), SubmitError> {
        if self.is_closed() {
            return Err(SubmitError::PoolClosed);
        }
        let id = TaskId::next();
        let (done, rx) = oneshot::channel();
        let sub = Submission {
            id,
            task,
            ctx: ctx.clone(),
            submitted_at: Instant::now(),
            done,
        };
        Ok((sub, Completion::new(id, rx)))
    }

    fn sender(&self) -> Result<mpsc::Sender<Submission<T>>, SubmitError> {
        self.tx
            .lock()
            .expect("pool sender lock poisoned")
            .clone()
            .ok_or(SubmitError::PoolClosed)
    }

    /// Marks the pool closed, unparks waiting submitters, and drops the queue
    /// sender so workers observe end-of-stream after draining.
    fn seal(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.closed.cancel();
        self.tx.lock().expect("pool sender lock poisoned").take();
    }

    fn publish_submitted(&self, completion: &Completion<T>) {
        self.bus
            .publish(Event::now(EventKind::TaskSubmitted).with_id(completion.id()));
    }
}
