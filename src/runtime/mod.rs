//! # Runtime: lifecycle, admission chain, and coordinated shutdown.
//!
//! [`Runtime`] assembles the pieces into one front door: an event [`Bus`],
//! a [`WorkerPool`], the optional admission gates ([`RateLimiter`] and
//! [`CircuitBreaker`]), and a [`SubscriberSet`] fed by a listener task.
//!
//! ## Architecture
//! ```text
//! submit()/try_submit()
//!     │
//!     ▼
//! [RateLimiter] ─► [CircuitBreaker] ─► [WorkerPool] ─► Completion
//!     │                  │                  │
//!     └── RateLimited    └── CircuitOpen    └── QueueFull / PoolClosed
//!
//! Bus ─► listener ─► SubscriberSet ─► per-subscriber queues
//! ```
//!
//! ## Admission chain
//! Gates run in order: limiter first, breaker second, pool last. A grant from
//! an earlier gate is not refunded when a later gate rejects (a rate-limit
//! token is spent on the attempt); an unused breaker grant **is** returned so
//! a half-open probe slot is never leaked by a full queue.
//!
//! ## Shutdown
//! [`Runtime::shutdown`] seals intake at every gate, publishes
//! `ShutdownRequested`, then drains the pool for at most the grace period.
//! In-flight tasks are never cancelled by shutdown itself; past the grace
//! they are abandoned and [`RuntimeError::PartialShutdown`] reports how many.
//! The subscriber listener is torn down last, after the drain events have
//! been delivered. Calling `shutdown` twice is harmless.

mod shutdown;

use std::borrow::Cow;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::admission::{CircuitBreaker, CircuitState, RateLimiter, Ticket};
use crate::config::Config;
use crate::context::Context;
use crate::error::{RuntimeError, SubmitError, TaskError};
use crate::events::{Bus, Event, EventKind};
use crate::pipeline::{Stage, StageConfig};
use crate::pool::WorkerPool;
use crate::subscribers::{Subscribe, SubscriberSet};
use crate::tasks::{Completion, TaskRef};

pub use shutdown::{wait_for_shutdown_signal, ShutdownSignal};

/// Owning handle over one pool plus its admission gates and event plumbing.
///
/// # Example
/// ```
/// use std::sync::Arc;
/// use taskpool::{Config, Context, Runtime, TaskFn};
///
/// # #[tokio::main(flavor = "current_thread")]
/// # async fn main() {
/// let rt = Runtime::start(Config::default(), vec![]);
///
/// let task = TaskFn::arc("double", |_ctx| async move { Ok(21 * 2) });
/// let completion = rt.submit(task, &Context::root()).await.unwrap();
/// assert_eq!(completion.wait().await.outcome, Ok(42));
///
/// rt.shutdown(std::time::Duration::from_secs(1)).await.unwrap();
/// # }
/// ```
pub struct Runtime<T> {
    cfg: Config,
    bus: Bus,
    pool: WorkerPool<T>,
    limiter: Option<RateLimiter>,
    breaker: Option<Arc<CircuitBreaker>>,
    listener_stop: CancellationToken,
    listener: std::sync::Mutex<Option<JoinHandle<()>>>,
    shutdown_started: AtomicBool,
}

impl<T: Send + 'static> Runtime<T> {
    /// Builds the runtime and spawns its background machinery (pool workers,
    /// subscriber listener). Must be called within a tokio runtime.
    pub fn start(cfg: Config, subscribers: Vec<Arc<dyn Subscribe>>) -> Arc<Self> {
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let pool = WorkerPool::new(&cfg, bus.clone());
        let limiter = cfg.limiter.as_ref().map(RateLimiter::new);
        let breaker = cfg
            .breaker
            .as_ref()
            .map(|b| Arc::new(CircuitBreaker::new(b, bus.clone())));

        let listener_stop = CancellationToken::new();
        let listener = tokio::spawn(subscriber_listener(
            bus.subscribe(),
            SubscriberSet::new(subscribers),
            listener_stop.clone(),
        ));

        Arc::new(Self {
            cfg,
            bus,
            pool,
            limiter,
            breaker,
            listener_stop,
            listener: std::sync::Mutex::new(Some(listener)),
            shutdown_started: AtomicBool::new(false),
        })
    }

    /// Submits a task through the admission chain, waiting where the chain
    /// allows it: the limiter sleeps until a token accrues and the pool waits
    /// for queue space. The breaker never waits.
    pub async fn submit(
        &self,
        task: TaskRef<T>,
        ctx: &Context,
    ) -> Result<Completion<T>, SubmitError> {
        let name: Arc<str> = Arc::from(task.name());

        if let Some(limiter) = &self.limiter {
            limiter.acquire().await.map_err(|e| self.reject(&name, e))?;
        }
        let ticket = self.admit(&name)?;

        match self.pool.submit(task, ctx).await {
            Ok(completion) => Ok(self.observe(completion, ticket)),
            Err(e) => Err(self.refund(&name, ticket, e)),
        }
    }

    /// Submits a task without waiting at any gate: an empty token bucket, an
    /// open circuit, or a full queue each reject immediately.
    pub fn try_submit(
        &self,
        task: TaskRef<T>,
        ctx: &Context,
    ) -> Result<Completion<T>, SubmitError> {
        let name: Arc<str> = Arc::from(task.name());

        if let Some(limiter) = &self.limiter {
            limiter.try_acquire().map_err(|e| self.reject(&name, e))?;
        }
        let ticket = self.admit(&name)?;

        match self.pool.try_submit(task, ctx) {
            Ok(completion) => Ok(self.observe(completion, ticket)),
            Err(e) => Err(self.refund(&name, ticket, e)),
        }
    }

    /// Builds a [`Stage`] wired to this runtime's event bus.
    pub fn stage<I, O, F, Fut>(
        &self,
        name: impl Into<Cow<'static, str>>,
        cfg: StageConfig,
        f: F,
    ) -> Stage<I, O>
    where
        I: Send + 'static,
        O: Send + 'static,
        F: Fn(Context, I) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<O, TaskError>> + Send + 'static,
    {
        Stage::new(name, cfg, f).with_bus(self.bus.clone())
    }

    /// Seals intake everywhere, then drains the pool for at most `grace`.
    ///
    /// In-flight tasks are allowed to finish; they are **not** cancelled.
    /// Past the grace, remaining tasks are abandoned (their completions
    /// resolve to `Canceled`) and `PartialShutdown` reports the count.
    /// Idempotent: a second call finds nothing left to drain.
    pub async fn shutdown(&self, grace: Duration) -> Result<(), RuntimeError> {
        self.shutdown_inner(grace, None).await
    }

    async fn shutdown_inner(
        &self,
        grace: Duration,
        reason: Option<&'static str>,
    ) -> Result<(), RuntimeError> {
        if !self.shutdown_started.swap(true, Ordering::SeqCst) {
            let mut ev = Event::now(EventKind::ShutdownRequested);
            if let Some(reason) = reason {
                ev = ev.with_reason(reason);
            }
            self.bus.publish(ev);
        }
        if let Some(limiter) = &self.limiter {
            limiter.seal();
        }
        if let Some(breaker) = &self.breaker {
            breaker.seal();
        }

        let drained = self.pool.close_with_grace(grace).await;

        // Tear the listener down only after the drain events are on the bus,
        // so subscribers observe the full shutdown sequence.
        self.listener_stop.cancel();
        let listener = self
            .listener
            .lock()
            .expect("runtime listener lock poisoned")
            .take();
        if let Some(handle) = listener {
            let _ = handle.await;
        }
        drained
    }

    /// Blocks until the process receives a termination signal, then shuts
    /// down with the configured grace period. The `ShutdownRequested` event
    /// carries the signal's label as its reason.
    pub async fn run_until_signal(&self) -> anyhow::Result<()> {
        let sig = shutdown::wait_for_shutdown_signal().await?;
        self.shutdown_inner(self.cfg.grace, Some(sig.as_label()))
            .await?;
        Ok(())
    }

    /// The runtime's event bus (for extra receivers or wiring stages).
    pub fn bus(&self) -> Bus {
        self.bus.clone()
    }

    /// Number of tasks currently being executed.
    pub fn active(&self) -> usize {
        self.pool.active()
    }

    /// Number of accepted tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.pool.queued()
    }

    /// Current breaker state, when a breaker is configured.
    pub fn breaker_state(&self) -> Option<CircuitState> {
        self.breaker.as_ref().map(|b| b.state())
    }

    /// True once [`Runtime::shutdown`] has been called.
    pub fn is_shutdown(&self) -> bool {
        self.shutdown_started.load(Ordering::SeqCst)
    }

    fn admit(&self, name: &Arc<str>) -> Result<Option<Ticket>, SubmitError> {
        match &self.breaker {
            Some(breaker) => match breaker.admit() {
                Ok(ticket) => Ok(Some(ticket)),
                Err(e) => Err(self.reject(name, e)),
            },
            None => Ok(None),
        }
    }

    /// Wraps the pool completion so the task's outcome is reported back to
    /// the breaker. A cancelled task is neither a success nor a failure; its
    /// ticket is released unreported.
    fn observe(&self, completion: Completion<T>, ticket: Option<Ticket>) -> Completion<T> {
        let (Some(ticket), Some(breaker)) = (ticket, self.breaker.as_ref()) else {
            return completion;
        };
        let breaker = Arc::clone(breaker);
        let id = completion.id();
        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let res = completion.wait().await;
            match &res.outcome {
                Ok(_) => breaker.on_success(ticket),
                Err(TaskError::Canceled) => breaker.release(ticket),
                Err(_) => breaker.on_failure(ticket),
            }
            let _ = tx.send(res);
        });
        Completion::new(id, rx)
    }

    /// Returns an unused breaker grant after a pool rejection, then records
    /// the rejection.
    fn refund(&self, name: &Arc<str>, ticket: Option<Ticket>, err: SubmitError) -> SubmitError {
        if let (Some(breaker), Some(ticket)) = (&self.breaker, ticket) {
            breaker.release(ticket);
        }
        self.reject(name, err)
    }

    fn reject(&self, name: &Arc<str>, err: SubmitError) -> SubmitError {
        self.bus.publish(
            Event::now(EventKind::TaskRejected)
                .with_task(Arc::clone(name))
                .with_reason(err.as_label()),
        );
        err
    }
}

/// Forwards bus events to the subscriber set until stopped.
///
/// The drain is biased: pending events are delivered before the stop token
/// is honored, so nothing published before the stop is lost.
async fn subscriber_listener(
    mut rx: broadcast::Receiver<Event>,
    set: SubscriberSet,
    stop: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            res = rx.recv() => match res {
                Ok(ev) => set.emit(&ev),
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = stop.cancelled() => break,
        }
    }
    set.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BreakerConfig, LimiterConfig};
    use crate::tasks::TaskFn;
    use async_trait::async_trait;
    use std::sync::Mutex;

    fn failing_task() -> TaskRef<u32> {
        TaskFn::arc("flaky", |_ctx| async move {
            Err(TaskError::failed("downstream unavailable"))
        })
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_past_grace_reports_partial() {
        let cfg = Config {
            pool_size: 10,
            queue_bound: 0,
            ..Config::default()
        };
        let rt = Runtime::start(cfg, vec![]);
        let ctx = Context::root();

        let mut completions = Vec::new();
        for _ in 0..100 {
            let task = TaskFn::arc("slow", |_ctx| async move {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(0u32)
            });
            completions.push(rt.submit(task, &ctx).await.unwrap());
        }
        tokio::task::yield_now().await;

        let err = rt.shutdown(Duration::from_millis(50)).await.unwrap_err();
        let RuntimeError::PartialShutdown { abandoned, grace } = err;
        assert_eq!(grace, Duration::from_millis(50));
        assert!(abandoned > 0);

        // Intake stays sealed after shutdown.
        let late = TaskFn::arc("late", |_ctx| async move { Ok(0u32) });
        assert_eq!(
            rt.try_submit(late, &ctx).unwrap_err(),
            SubmitError::PoolClosed
        );

        // Abandoned completions resolve rather than hang.
        let mut completed = 0usize;
        for c in completions {
            if c.wait().await.is_ok() {
                completed += 1;
            }
        }
        assert!(completed < 100);
    }

    #[tokio::test(start_paused = true)]
    async fn breaker_trips_at_the_admission_gate() {
        let cfg = Config {
            pool_size: 1,
            breaker: Some(BreakerConfig {
                failure_threshold: 2,
                window: Duration::from_secs(10),
                open_duration: Duration::from_secs(5),
            }),
            ..Config::default()
        };
        let rt = Runtime::start(cfg, vec![]);
        let ctx = Context::root();

        for _ in 0..2 {
            let c = rt.submit(failing_task(), &ctx).await.unwrap();
            assert!(!c.wait().await.is_ok());
        }
        assert_eq!(rt.breaker_state(), Some(CircuitState::Open));
        assert_eq!(
            rt.try_submit(failing_task(), &ctx).unwrap_err(),
            SubmitError::CircuitOpen
        );

        // After open_duration one probe passes; its success closes the loop.
        tokio::time::advance(Duration::from_secs(5)).await;
        let probe = TaskFn::arc("probe", |_ctx| async move { Ok(1u32) });
        let c = rt.submit(probe, &ctx).await.unwrap();
        assert!(c.wait().await.is_ok());
        assert_eq!(rt.breaker_state(), Some(CircuitState::Closed));

        rt.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn limiter_bounds_try_submit() {
        let cfg = Config {
            limiter: Some(LimiterConfig {
                rate: 1.0,
                burst: 2,
            }),
            ..Config::default()
        };
        let rt = Runtime::start(cfg, vec![]);
        let ctx = Context::root();
        let task = || TaskFn::arc("unit", |_ctx| async move { Ok(0u32) });

        let a = rt.try_submit(task(), &ctx).unwrap();
        let b = rt.try_submit(task(), &ctx).unwrap();
        assert_eq!(
            rt.try_submit(task(), &ctx).unwrap_err(),
            SubmitError::RateLimited
        );

        assert!(a.wait().await.is_ok());
        assert!(b.wait().await.is_ok());
        rt.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_tasks_do_not_feed_the_breaker() {
        let cfg = Config {
            breaker: Some(BreakerConfig {
                failure_threshold: 1,
                window: Duration::from_secs(10),
                open_duration: Duration::from_secs(5),
            }),
            ..Config::default()
        };
        let rt = Runtime::start(cfg, vec![]);

        let (ctx, handle) = Context::root().with_cancel();
        handle.cancel();

        let task = TaskFn::arc("skipped", |_ctx| async move { Ok(0u32) });
        let res = rt.submit(task, &ctx).await.unwrap().wait().await;
        assert_eq!(res.outcome, Err(TaskError::Canceled));
        assert_eq!(rt.breaker_state(), Some(CircuitState::Closed));

        rt.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_seals_every_gate() {
        let cfg = Config {
            limiter: Some(LimiterConfig::default()),
            breaker: Some(BreakerConfig::default()),
            ..Config::default()
        };
        let rt: Arc<Runtime<u32>> = Runtime::start(cfg, vec![]);
        rt.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(rt.is_shutdown());

        let task = TaskFn::arc("late", |_ctx| async move { Ok(0u32) });
        assert_eq!(
            rt.try_submit(task, &Context::root()).unwrap_err(),
            SubmitError::PoolClosed
        );

        // Second shutdown finds nothing left to drain.
        rt.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    struct Recorder {
        kinds: Arc<Mutex<Vec<EventKind>>>,
    }

    #[async_trait]
    impl Subscribe for Recorder {
        async fn on_event(&self, event: &Event) {
            self.kinds
                .lock()
                .expect("recorder lock poisoned")
                .push(event.kind);
        }

        fn name(&self) -> &'static str {
            "recorder"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn subscribers_observe_the_lifecycle() {
        let kinds = Arc::new(Mutex::new(Vec::new()));
        let recorder = Arc::new(Recorder {
            kinds: Arc::clone(&kinds),
        });

        let rt = Runtime::start(Config::default(), vec![recorder]);
        let ctx = Context::root();

        let task = TaskFn::arc("unit", |_ctx| async move { Ok(7u32) });
        let c = rt.submit(task, &ctx).await.unwrap();
        assert_eq!(c.wait().await.outcome, Ok(7));

        rt.shutdown(Duration::from_secs(1)).await.unwrap();

        let seen = kinds.lock().expect("recorder lock poisoned").clone();
        for expected in [
            EventKind::TaskSubmitted,
            EventKind::TaskStarting,
            EventKind::TaskCompleted,
            EventKind::ShutdownRequested,
            EventKind::DrainCompleted,
        ] {
            assert!(seen.contains(&expected), "missing event {expected:?}");
        }
    }
}
