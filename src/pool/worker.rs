//! # Worker executor loop.
//!
//! Each worker repeatedly dequeues one [`Submission`], checks its context,
//! runs the body, and delivers the single [`TaskResult`] plus lifecycle
//! events to the [`Bus`].
//!
//! ## Flow
//! ```text
//! loop {
//!   ├─► dequeue (blocks while empty; exits when the pool is sealed
//!   │            and the queue is drained)
//!   ├─► ctx cancelled already? ─► deliver Err(Canceled), skip the body
//!   ├─► publish TaskStarting, active += 1
//!   ├─► run body to completion (cooperative cancellation only)
//!   ├─► active -= 1, publish TaskCompleted / TaskFailed / TaskCanceled
//!   └─► deliver result via oneshot
//! }
//! ```
//!
//! ## Rules
//! - Exactly one terminal event and one result per dequeued submission.
//! - The dequeue mutex is held only across `recv()`; execution happens
//!   outside it, so workers run tasks in parallel.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::error::TaskError;
use crate::events::{Bus, Event, EventKind};
use crate::tasks::TaskResult;

use super::{PoolShared, Submission};

/// Main loop of one pool worker. Exits when the queue is closed and drained.
pub(crate) async fn worker_loop<T: Send + 'static>(
    shared: Arc<PoolShared>,
    rx: Arc<Mutex<mpsc::Receiver<Submission<T>>>>,
    bus: Bus,
) {
    loop {
        let sub = {
            let mut guard = rx.lock().await;
            guard.recv().await
        };
        let Some(sub) = sub else {
            break; // sealed and drained
        };
        shared.queued.fetch_sub(1, Ordering::SeqCst);
        run_one(&shared, &bus, sub).await;
    }
}

/// Executes one submission and delivers its result exactly once.
async fn run_one<T: Send + 'static>(shared: &PoolShared, bus: &Bus, sub: Submission<T>) {
    let name = sub.task.name().to_string();

    // Cancellation observed at the task boundary: skip the body entirely.
    if sub.ctx.is_cancelled() {
        bus.publish(
            Event::now(EventKind::TaskCanceled)
                .with_task(name)
                .with_id(sub.id),
        );
        let _ = sub.done.send(TaskResult {
            id: sub.id,
            outcome: Err(TaskError::Canceled),
        });
        return;
    }

    let was_active = shared.active.fetch_add(1, Ordering::SeqCst);
    debug_assert!(was_active < shared.capacity);

    bus.publish(
        Event::now(EventKind::TaskStarting)
            .with_task(name.clone())
            .with_id(sub.id)
            .with_queued_for(sub.submitted_at.elapsed()),
    );

    let outcome = sub.task.run(sub.ctx.clone()).await;
    shared.active.fetch_sub(1, Ordering::SeqCst);

    let ev = match &outcome {
        Ok(_) => Event::now(EventKind::TaskCompleted),
        Err(TaskError::Canceled) => Event::now(EventKind::TaskCanceled),
        Err(e) => Event::now(EventKind::TaskFailed).with_reason(e.to_string()),
    };
    bus.publish(ev.with_task(name).with_id(sub.id));

    // Receiver may be gone (submitter dropped the completion); that is fine,
    // the result was still produced exactly once.
    let _ = sub.done.send(TaskResult {
        id: sub.id,
        outcome,
    });
}
