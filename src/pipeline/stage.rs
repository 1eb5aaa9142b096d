//! # Pipeline stage: a worker pool behind a stream interface.
//!
//! [`Stage::process`] consumes an input stream, runs the stage handler on
//! each item through an internal [`WorkerPool`], and produces an output
//! stream of per-item [`TaskResult`]s, incrementally.
//!
//! ## Architecture
//! ```text
//! input stream ─► dispatcher ─► WorkerPool (cfg.workers executors)
//!                   │  (in_flight semaphore = backpressure bound)
//!                   ▼
//!             completion queue ─► collector ─► output stream
//!                                  │
//!                                  ├─ Ordered: await completions in
//!                                  │  submission order (input order out)
//!                                  └─ Unordered: FuturesUnordered
//!                                     (completion order out)
//! ```
//!
//! ## Rules
//! - At most `in_flight` items are queued/executing/buffered at once; the
//!   dispatcher stalls on the semaphore past that bound.
//! - One result per input item; a failed item does not abort the stream.
//! - `fail_fast`: the first error cancels the stage's shared child context
//!   and terminates the output stream early; in-flight siblings observe the
//!   cancellation cooperatively.

use std::borrow::Cow;
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::Stream;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio_stream::wrappers::ReceiverStream;

use crate::config::Config;
use crate::context::{CancelHandle, Context};
use crate::error::TaskError;
use crate::events::Bus;
use crate::pool::WorkerPool;
use crate::tasks::{Completion, Task, TaskRef, TaskResult};

use async_trait::async_trait;

/// How fan-in re-assembles results into one stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MergePolicy {
    /// Results re-sequenced to match original input order. Out-of-order
    /// completions are buffered (bounded by `in_flight`) until their turn.
    Ordered,
    /// Results emitted in completion order (first-finished-first-out).
    Unordered,
}

/// Configuration for one stage (and for each fan-out replica).
#[derive(Clone, Copy, Debug)]
pub struct StageConfig {
    /// Workers in the stage's internal pool (min 1, clamped).
    pub workers: usize,
    /// Internal pool queue bound (`0` = unbounded; the `in_flight` semaphore
    /// already bounds admission).
    pub queue_bound: usize,
    /// Maximum items queued/executing/buffered at once. This is the ordered
    /// merge buffer bound and the backpressure point (min 1, clamped).
    pub in_flight: usize,
    /// Output re-assembly policy.
    pub merge: MergePolicy,
    /// Cancel all in-flight siblings on the first error and end the stream.
    pub fail_fast: bool,
}

impl StageConfig {
    /// Returns the in-flight bound clamped to a minimum of 1.
    #[inline]
    pub fn in_flight_clamped(&self) -> usize {
        self.in_flight.max(1)
    }
}

impl Default for StageConfig {
    /// Default: `workers = 4`, unbounded pool queue, `in_flight = 16`,
    /// ordered merge, no fail-fast.
    fn default() -> Self {
        Self {
            workers: 4,
            queue_bound: 0,
            in_flight: 16,
            merge: MergePolicy::Ordered,
            fail_fast: false,
        }
    }
}

/// Stage handler: produces a fresh future per item.
pub(crate) type Handler<I, O> =
    Arc<dyn Fn(Context, I) -> BoxFuture<'static, Result<O, TaskError>> + Send + Sync>;

/// One dispatched item in flight between dispatcher and collector.
struct Envelope<O> {
    completion: Completion<O>,
    permit: OwnedSemaphorePermit,
}

/// Adapts one stream item to the pool's [`Task`] contract.
///
/// The item is consumed on first run; a pool never runs a submission twice.
pub(crate) struct ItemTask<I, O> {
    name: Cow<'static, str>,
    handler: Handler<I, O>,
    item: std::sync::Mutex<Option<I>>,
}

impl<I, O> ItemTask<I, O> {
    pub(crate) fn new(name: Cow<'static, str>, handler: Handler<I, O>, item: I) -> Self {
        Self {
            name,
            handler,
            item: std::sync::Mutex::new(Some(item)),
        }
    }
}

#[async_trait]
impl<I, O> Task<O> for ItemTask<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: Context) -> Result<O, TaskError> {
        let item = self
            .item
            .lock()
            .expect("stage item lock poisoned")
            .take()
            .ok_or_else(|| TaskError::failed("stage item already consumed"))?;
        (self.handler)(ctx, item).await
    }
}

/// A transformation step backed by a worker pool.
///
/// # Example
/// ```
/// use futures::StreamExt;
/// use taskpool::{Context, Stage, StageConfig};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let stage = Stage::new("double", StageConfig::default(), |_ctx, n: u32| async move {
///     Ok(n * 2)
/// });
///
/// let input = futures::stream::iter(vec![1, 2, 3]);
/// let out: Vec<_> = stage
///     .process(&Context::root(), input)
///     .map(|r| r.outcome.unwrap())
///     .collect()
///     .await;
/// assert_eq!(out, vec![2, 4, 6]);
/// # }
/// ```
pub struct Stage<I, O> {
    name: Cow<'static, str>,
    cfg: StageConfig,
    handler: Handler<I, O>,
    bus: Bus,
}

impl<I, O> Clone for Stage<I, O> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            cfg: self.cfg,
            handler: Arc::clone(&self.handler),
            bus: self.bus.clone(),
        }
    }
}

impl<I, O> Stage<I, O>
where
    I: Send + 'static,
    O: Send + 'static,
{
    /// Creates a stage from a handler closure.
    pub fn new<F, Fut>(name: impl Into<Cow<'static, str>>, cfg: StageConfig, f: F) -> Self
    where
        F: Fn(Context, I) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<O, TaskError>> + Send + 'static,
    {
        Self {
            name: name.into(),
            cfg,
            handler: Arc::new(move |ctx, item| Box::pin(f(ctx, item))),
            bus: Bus::new(1),
        }
    }

    /// Attaches an event bus; the internal pool publishes lifecycle events
    /// to it.
    pub fn with_bus(mut self, bus: Bus) -> Self {
        self.bus = bus;
        self
    }

    /// Stage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stage configuration.
    pub fn config(&self) -> &StageConfig {
        &self.cfg
    }

    pub(crate) fn handler(&self) -> Handler<I, O> {
        Arc::clone(&self.handler)
    }

    pub(crate) fn bus(&self) -> Bus {
        self.bus.clone()
    }

    pub(crate) fn name_owned(&self) -> Cow<'static, str> {
        self.name.clone()
    }

    /// Runs the stage over `input`, returning a lazy output stream with one
    /// [`TaskResult`] per input item (finite if the input is finite).
    ///
    /// Restartable only by calling `process` again with a fresh input.
    pub fn process<S>(&self, ctx: &Context, input: S) -> ReceiverStream<TaskResult<O>>
    where
        S: Stream<Item = I> + Send + 'static,
    {
        let cfg = self.cfg;
        let bound = cfg.in_flight_clamped();
        let pool_cfg = Config {
            pool_size: cfg.workers,
            queue_bound: cfg.queue_bound,
            ..Config::default()
        };
        let pool = Arc::new(WorkerPool::<O>::new(&pool_cfg, self.bus.clone()));
        let (stage_ctx, cancel) = ctx.with_cancel();
        let inflight = Arc::new(Semaphore::new(bound));

        let (env_tx, env_rx) = mpsc::channel::<Envelope<O>>(bound);
        let (out_tx, out_rx) = mpsc::channel::<TaskResult<O>>(bound);

        self.spawn_dispatcher(input, Arc::clone(&pool), stage_ctx, inflight, env_tx);
        spawn_collector(cfg, pool, cancel, env_rx, out_tx);

        ReceiverStream::new(out_rx)
    }

    /// Pulls items from the input and submits them to the pool under the
    /// in-flight bound. Stops on cancellation or when downstream is gone.
    fn spawn_dispatcher<S>(
        &self,
        input: S,
        pool: Arc<WorkerPool<O>>,
        stage_ctx: Context,
        inflight: Arc<Semaphore>,
        env_tx: mpsc::Sender<Envelope<O>>,
    ) where
        S: Stream<Item = I> + Send + 'static,
    {
        let name = self.name.clone();
        let handler = Arc::clone(&self.handler);

        tokio::spawn(async move {
            futures::pin_mut!(input);
            while let Some(item) = input.next().await {
                if stage_ctx.is_cancelled() {
                    break;
                }
                let Ok(permit) = Arc::clone(&inflight).acquire_owned().await else {
                    break;
                };
                let task: TaskRef<O> =
                    Arc::new(ItemTask::new(name.clone(), Arc::clone(&handler), item));
                let Ok(completion) = pool.submit(task, &stage_ctx).await else {
                    break;
                };
                if env_tx.send(Envelope { completion, permit }).await.is_err() {
                    break; // collector ended early (fail-fast or dropped output)
                }
            }
        });
    }
}

/// Re-assembles completions into the output stream per the merge policy,
/// then drains the pool.
fn spawn_collector<O: Send + 'static>(
    cfg: StageConfig,
    pool: Arc<WorkerPool<O>>,
    cancel: CancelHandle,
    env_rx: mpsc::Receiver<Envelope<O>>,
    out_tx: mpsc::Sender<TaskResult<O>>,
) {
    tokio::spawn(async move {
        match cfg.merge {
            MergePolicy::Ordered => collect_ordered(cfg, cancel, env_rx, out_tx).await,
            MergePolicy::Unordered => collect_unordered(cfg, cancel, env_rx, out_tx).await,
        }
        pool.close().await;
    });
}

/// Awaits completions strictly in submission order: output order equals
/// input order, with out-of-order completions parked in their oneshot slots
/// (bounded by the in-flight semaphore).
async fn collect_ordered<O: Send + 'static>(
    cfg: StageConfig,
    cancel: CancelHandle,
    mut env_rx: mpsc::Receiver<Envelope<O>>,
    out_tx: mpsc::Sender<TaskResult<O>>,
) {
    while let Some(env) = env_rx.recv().await {
        let res = env.completion.wait().await;
        drop(env.permit);
        if emit(&cfg, &cancel, &out_tx, res).await.is_err() {
            break;
        }
    }
}

/// Emits results as completions arrive (first-finished-first-out).
async fn collect_unordered<O: Send + 'static>(
    cfg: StageConfig,
    cancel: CancelHandle,
    mut env_rx: mpsc::Receiver<Envelope<O>>,
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

/// Forwards one result downstream. Returns `Err` when the stream must end:
/// consumer gone, or fail-fast tripped (after cancelling the shared context).
pub(crate) async fn emit<O>(
    cfg: &StageConfig,
    cancel: &CancelHandle,
    out_tx: &mpsc::Sender<TaskResult<O>>,
    res: TaskResult<O>,
) -> Result<(), ()> {
    let failed = res.outcome.is_err();
    if failed && cfg.fail_fast {
        cancel.cancel();
        let _ = out_tx.send(res).await;
        return Err(());
    }
    if out_tx.send(res).await.is_err() {
        return Err(());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cfg(merge: MergePolicy, fail_fast: bool) -> StageConfig {
        StageConfig {
            workers: 8,
            in_flight: 16,
            merge,
            fail_fast,
            ..StageConfig::default()
        }
    }

    /// Latency inversely proportional to the value: later items finish first.
    fn reversed_latency_stage(merge: MergePolicy) -> Stage<u32, u32> {
        Stage::new("reversed", cfg(merge, false), |_ctx, n: u32| async move {
            tokio::time::sleep(Duration::from_millis(u64::from(60 - n * 10))).await;
            Ok(n)
        })
    }

    #[tokio::test(start_paused = true)]
    async fn ordered_merge_restores_input_order() {
        let stage = reversed_latency_stage(MergePolicy::Ordered);
        let input = futures::stream::iter(vec![1u32, 2, 3, 4, 5]);

        let out: Vec<u32> = stage
            .process(&Context::root(), input)
            .map(|r| r.outcome.unwrap())
            .collect()
            .await;
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test(start_paused = true)]
    async fn unordered_merge_is_complete_as_a_set() {
        let stage = reversed_latency_stage(MergePolicy::Unordered);
        let input = futures::stream::iter(vec![1u32, 2, 3, 4, 5]);

        let mut out: Vec<u32> = stage
            .process(&Context::root(), input)
            .map(|r| r.outcome.unwrap())
            .collect()
            .await;
        out.sort_unstable();
        assert_eq!(out, vec![1, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn dispatcher_stalls_at_the_in_flight_bound() {
        use std::sync::atomic::{AtomicUsize, Ordering};

        // Items park inside the handler until the gate opens, so permits are
        // never released and dispatch must stop exactly at the bound.
        let gate = Arc::new(Semaphore::new(0));
        let started = Arc::new(AtomicUsize::new(0));
        let stage = {
            let gate = Arc::clone(&gate);
            let started = Arc::clone(&started);
            Stage::new(
                "bounded",
                StageConfig {
                    workers: 4,
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
        let stream = stage.process(&Context::root(), futures::stream::iter(0..10u32));

        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
        assert_eq!(
            started.load(Ordering::SeqCst),
            2,
            "no more than in_flight items may be dispatched"
        );

        gate.add_permits(10);
        let out: Vec<u32> = stream.map(|r| r.outcome.unwrap()).collect().await;
        assert_eq!(out, (0..10).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn one_failed_item_does_not_abort_the_stream() {
        let stage = Stage::new("flaky", cfg(MergePolicy::Ordered, false), |_ctx, n: u32| {
            async move {
                if n == 3 {
                    Err(TaskError::failed("bad item"))
                } else {
                    Ok(n)
                }
            }
        });
        let input = futures::stream::iter(vec![1u32, 2, 3, 4, 5]);

        let out: Vec<_> = stage.process(&Context::root(), input).collect().await;
        assert_eq!(out.len(), 5);
        assert_eq!(out.iter().filter(|r| r.outcome.is_err()).count(), 1);
        assert_eq!(out[2].outcome, Err(TaskError::failed("bad item")));
    }

    #[tokio::test(start_paused = true)]
    async fn fail_fast_cancels_siblings_and_ends_the_stream() {
        let stage = Stage::new("failfast", cfg(MergePolicy::Unordered, true), |ctx, n: u32| {
            async move {
                if n == 1 {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    return Err(TaskError::failed("first error"));
                }
                // Cooperative sibling: polls the context while working.
                for _ in 0..20 {
                    if ctx.is_cancelled() {
                        return Err(TaskError::Canceled);
                    }
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
                Ok(n)
            }
        });
        let input = futures::stream::iter(vec![1u32, 2, 3, 4, 5]);

        let out: Vec<_> = stage.process(&Context::root(), input).collect().await;
        assert!(out.len() < 5, "stream must terminate early");
        assert!(out
            .iter()
            .any(|r| r.outcome == Err(TaskError::failed("first error"))));
        // Nothing after the tripping error is a success.
        let err_pos = out
            .iter()
            .position(|r| r.outcome == Err(TaskError::failed("first error")))
            .unwrap();
        assert!(out[err_pos + 1..].iter().all(|r| r.outcome.is_err()));
    }

    #[tokio::test(start_paused = true)]
    async fn caller_context_cancellation_propagates_into_the_stage() {
        let (ctx, handle) = Context::root().with_cancel();
        handle.cancel();

        let stage = Stage::new("canceled", cfg(MergePolicy::Ordered, false), |_ctx, n: u32| {
            async move { Ok(n) }
        });
        let input = futures::stream::iter(vec![1u32, 2, 3]);

        let out: Vec<_> = stage.process(&ctx, input).collect().await;
        // The dispatcher observes the cancelled parent and stops; anything
        // already dispatched resolves as Canceled.
        assert!(out.iter().all(|r| r.outcome == Err(TaskError::Canceled)));
    }
}
