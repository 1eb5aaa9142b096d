//! # Fan-out/fan-in coordinator.
//!
//! [`FanOut`] splits one input stream across N replicas of a [`Stage`] and
//! merges their outputs back into one stream.
//!
//! ## Partitioning
//! Deterministic **round-robin**: item *i* (0-based, in input order) goes to
//! replica *i mod N*. Partitioning never restores order by itself; the merge
//! policy is the sole order-restoration mechanism.
//!
//! ## Fan-in
//! ```text
//!            ┌► replica pool 0 ─┐
//! dispatcher ┼► replica pool 1 ─┼─► merge ─► output stream
//!   (seq i)  └► replica pool 2 ─┘     │
//!                                     ├─ Unordered: completion order
//!                                     └─ Ordered: reorder buffer keyed by
//!                                        seq, flushed at next_seq; bounded
//!                                        by the shared in_flight semaphore
//!                                        (permits held until emit), which
//!                                        is the backpressure point
//! ```
//!
//! ## Rules
//! - The in-flight bound covers queued + executing + buffered items across
//!   **all** replicas; dispatch stalls once it is exhausted.
//! - Fail-fast cancels the shared child context, so in-flight siblings on
//!   every replica observe the cancellation.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::Stream;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::Config;
use crate::context::{CancelHandle, Context};
use crate::pool::WorkerPool;
use crate::tasks::{Completion, TaskRef, TaskResult};

use super::stage::{emit, ItemTask, MergePolicy, Stage, StageConfig};

/// One dispatched item, tagged with its input-order sequence number.
struct SeqEnvelope<O> {
    seq: u64,
    completion: Completion<O>,
    permit: OwnedSemaphorePermit,
}

/// Runs N replicas of a stage over one partitioned input stream.
///
/// # Example
/// ```
/// use futures::StreamExt;
/// use taskpool::{Context, FanOut, Stage, StageConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let stage = Stage::new("square", StageConfig::default(), |_ctx, n: u32| async move {
///     Ok(n * n)
/// });
/// let fan = FanOut::new(stage, 3);
///
/// let out: Vec<_> = fan
///     .process(&Context::root(), futures::stream::iter(vec![1u32, 2, 3, 4]))
///     .map(|r| r.outcome.unwrap())
///     .collect()
///     .await;
/// assert_eq!(out, vec![1, 4, 9, 16]); // ordered merge by default
/// # }
/// ```
pub struct FanOut<I, O> {
    stage: Stage<I, O>,
    replicas: usize,
}

impl<I, O> FanOut<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a coordinator over `replicas` copies of `stage`
    /// (clamped to a minimum of 1).
    pub fn new(stage: Stage<I, O>, replicas: usize) -> Self {
        Self {
            stage,
            replicas: replicas.max(1),
        }
    }

    /// Number of replicas.
    pub fn replicas(&self) -> usize {
        self.replicas
    }

    /// Runs the replicas over `input`, returning the merged output stream.
    pub fn process<S>(&self, ctx: &Context, input: S) -> ReceiverStream<TaskResult<O>>
    where
        S: Stream<Item = I> + Send + 'static,
    {
        let cfg = *self.stage.config();
        let bound = cfg.in_flight_clamped();
        let pool_cfg = Config {
            pool_size: cfg.workers,
            queue_bound: cfg.queue_bound,
            ..Config::default()
        };

        let pools: Vec<Arc<WorkerPool<O>>> = (0..self.replicas)
            .map(|_| Arc::new(WorkerPool::new(&pool_cfg, self.stage.bus())))
            .collect();

        let (fan_ctx, cancel) = ctx.with_cancel();
        let inflight = Arc::new(Semaphore::new(bound));
        let (env_tx, env_rx) = mpsc::channel::<SeqEnvelope<O>>(bound);
        let (out_tx, out_rx) = mpsc::channel::<TaskResult<O>>(bound);

        self.spawn_dispatcher(input, pools.clone(), fan_ctx, inflight, env_tx);
        spawn_merge(cfg, pools, cancel, env_rx, out_tx);

        ReceiverStream::new(out_rx)
    }

    /// Round-robin dispatcher: item `seq` goes to replica `seq % N`.
    fn spawn_dispatcher<S>(
        &self,
        input: S,
        pools: Vec<Arc<WorkerPool<O>>>,
        fan_ctx: Context,
        inflight: Arc<Semaphore>,
        env_tx: mpsc::Sender<SeqEnvelope<O>>,
    ) where
        S: Stream<Item = I> + Send + 'static,
    {
        let name = self.stage.name_owned();
        let handler = self.stage.handler();
        let replicas = self.replicas as u64;

        tokio::spawn(async move {
            futures::pin_mut!(input);
            let mut seq = 0u64;
            while let Some(item) = input.next().await {
                if fan_ctx.is_cancelled() {
                    break;
                }
                let Ok(permit) = Arc::clone(&inflight).acquire_owned().await else {
                    break;
                };
                let task: TaskRef<O> =
                    Arc::new(ItemTask::new(name.clone(), Arc::clone(&handler), item));
                let pool = &pools[(seq % replicas) as usize];
                let Ok(completion) = pool.submit(task, &fan_ctx).await else {
                    break;
                };
                if env_tx
                    .send(SeqEnvelope {
                        seq,
                        completion,
                        permit,
                    })
                    .await
                    .is_err()
                {
                    break; // merge ended early
                }
                seq += 1;
            }
        });
    }
}

/// Fan-in: resolves completions and forwards them per the merge policy,
/// then drains every replica pool.
fn spawn_merge<O: Send + 'static>(
    cfg: StageConfig,
    pools: Vec<Arc<WorkerPool<O>>>,
    cancel: CancelHandle,
    env_rx: mpsc::Receiver<SeqEnvelope<O>>,
    out_tx: mpsc::Sender<TaskResult<O>>,
) {
    tokio::spawn(async move {
        match cfg.merge {
            MergePolicy::Ordered => merge_ordered(cfg, cancel, env_rx, out_tx).await,
            MergePolicy::Unordered => merge_unordered(cfg, cancel, env_rx, out_tx).await,
        }
        for pool in pools {
            pool.close().await;
        }
    });
}

/// Emits in completion order across all replicas.
async fn merge_unordered<O: Send + 'static>(
    cfg: StageConfig,
    cancel: CancelHandle,
    mut env_rx: mpsc::Receiver<SeqEnvelope<O>>,
    out_tx: mpsc::Sender<TaskResult<O>>,
) {
    let mut pending = FuturesUnordered::new();
    let mut intake_done = false;

    loop {
        if intake_done && pending.is_empty() {
            break;
        }
        tokio::select! {
            env = env_rx.recv(), if !intake_done => match env {
                Some(env) => pending.push(async move {
                    let res = env.completion.wait().await;
                    (res, env.permit)
                }),
                None => intake_done = true,
            },
            Some((res, permit)) = pending.next() => {
                drop(permit);
                if emit(&cfg, &cancel, &out_tx, res).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Re-sequences completions to input order via a reorder buffer keyed by
/// `seq`. Completed items ahead of `next_seq` keep their in-flight permit
/// while parked, so the buffer can never outgrow the in-flight bound.
async fn merge_ordered<O: Send + 'static>(
    cfg: StageConfig,
    cancel: CancelHandle,
    mut env_rx: mpsc::Receiver<SeqEnvelope<O>>,
    out_tx: mpsc::Sender<TaskResult<O>>,
) {
    let mut pending = FuturesUnordered::new();
    let mut buffer: BTreeMap<u64, (TaskResult<O>, OwnedSemaphorePermit)> = BTreeMap::new();
    let mut next_seq = 0u64;
    let mut intake_done = false;

    loop {
        if intake_done && pending.is_empty() {
            // Dispatch order equals seq order, so once everything dispatched
            // has resolved the buffer has no gaps left.
            debug_assert!(buffer.is_empty());
            break;
        }
        tokio::select! {
            env = env_rx.recv(), if !intake_done => match env {
                Some(env) => {
                    let seq = env.seq;
                    let permit_holder = env.permit;
                    let completion = env.completion;
                    pending.push(async move {
                        let res = completion.wait().await;
                        (seq, res, permit_holder)
                    });
                }
                None => intake_done = true,
            },
            Some((seq, res, permit)) = pending.next() => {
                buffer.insert(seq, (res, permit));
                while let Some((res, permit)) = buffer.remove(&next_seq) {
                    drop(permit);
                    next_seq += 1;
                    if emit(&cfg, &cancel, &out_tx, res).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TaskError;
    use std::time::Duration;

    fn stage(merge: MergePolicy, fail_fast: bool) -> Stage<u32, u32> {
        Stage::new(
            "fan",
            StageConfig {
                workers: 2,
                in_flight: 16,
                merge,
                fail_fast,
                ..StageConfig::default()
            },
            |_ctx, n: u32| async move {
                // Later items finish first.
                tokio::time::sleep(Duration::from_millis(u64::from(100 - n * 10))).await;
                Ok(n)
            },
        )
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_fan_in_restores_input_order_across_replicas() {
        let fan = FanOut::new(stage(MergePolicy::Ordered, false), 3);
        let input = futures::stream::iter(vec![1u32, 2, 3, 4, 5]);

        let out: Vec<u32> = fan
            .process(&Context::root(), input)
            .map(|r| r.outcome.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn unordered_fan_in_is_complete_as_a_set() {
        let fan = FanOut::new(stage(MergePolicy::Unordered, false), 3);
        let input = futures::stream::iter(vec![1u32, 2, 3, 4, 5]);

        let mut out: Vec<u32> = fan
            .process(&Context::root(), input)
            .map(|r| r.outcome.unwrap())
            .collect()
            .await;
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn round_robin_partitioning_is_deterministic() {
        // Two replicas: evens go to replica 0, odds to replica 1. Odd items
        // sleep; even items do not, so with an unordered merge every even
        // item is emitted before any odd one.
        let st = Stage::new(
            "parity",
            StageConfig {
                workers: 1,
                in_flight: 16,
                merge: MergePolicy::Unordered,
                fail_fast: false,
                ..StageConfig::default()
            },
            |_ctx, n: u32| async move {
                if n % 2 == 1 {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
                Ok(n)
            },
        );
        let fan = FanOut::new(st, 2);
        let input = futures::stream::iter(vec![0u32, 1, 2, 3, 4, 5]);

        let out: Vec<u32> = fan
            .process(&Context::root(), input)
            .map(|r| r.outcome.unwrap())
            .collect()
            .await;
        assert_eq!(&out[..3], &[0, 2, 4], "evens drain first from replica 0");
        assert_eq!(&out[3..], &[1, 3, 5]);
    }

    #[tokio::test]
    async fn in_flight_bound_is_shared_across_replicas() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        use tokio::sync::Semaphore;

        // Three replicas, but one bound: with the gate shut, dispatch must
        // stop at in_flight items total, not in_flight per replica.
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let st = {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            Stage::new(
                "bounded",
                StageConfig {
                    workers: 2,
                    in_flight: 2,
                    merge: MergePolicy::Ordered,
                    ..StageConfig::default()
                },
                move |_ctx, n: u32| {
                    let gate = Arc::clone(&gate);
                    let started = Arc::clone(&started);
                    async move {
                        started.fetch_add(1, Ordering::SeqCst);
                        gate.acquire().await.expect("gate closed").forget();
                        Ok(n)
                    }
                },
            )
        };
        let fan = FanOut::new(st, 3);
        let stream = fan.process(&Context::root(), futures::stream::iter(0..9u32));

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            started.load(Ordering::SeqCst),
            2,
            "the bound spans all replicas"
        );

        gate.add_permits(9);
        let out: Vec<u32> = stream.map(|r| r.outcome.unwrap()).collect().await;
        assert_eq!(out, (0..9).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn single_replica_behaves_like_a_plain_stage() {
        let fan = FanOut::new(stage(MergePolicy::Ordered, false), 1);
        let input = futures::stream::iter(vec![1u32, 2, 3]);

        let out: Vec<u32> = fan
            .process(&Context::root(), input)
            .map(|r| r.outcome.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_cancels_siblings_on_other_replicas() {
        let st = Stage::new(
            "failfast",
            StageConfig {
                workers: 2,
                in_flight: 16,
                merge: MergePolicy::Unordered,
                fail_fast: true,
                ..StageConfig::default()
            },
            |ctx, n: u32| async move {
                if n == 0 {
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    return Err(TaskError::failed("replica failure"));
                }
                for _ in 0..20 {
                    if ctx.is_cancelled() {
                        return Err(TaskError::Canceled);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(n)
            },
        );
        let fan = FanOut::new(st, 3);
        let input = futures::stream::iter((0..9u32).collect::<Vec<_>>());

        let out: Vec<_> = fan.process(&Context::root(), input).collect().await;
        assert!(out.len() < 9, "stream must terminate early");
        assert!(out
            .iter()
            .any(|r| r.outcome == Err(TaskError::failed("replica failure"))));
        assert!(out.iter().all(|r| r.outcome.is_err()));
    }
}
