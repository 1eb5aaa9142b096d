//! # SubscriberSet: non-blocking fan-out of events to subscribers.
//!
//! One bounded queue and one worker task per subscriber. `emit` filters each
//! event through [`Subscribe::interested`], enqueues it for the takers, and
//! returns without waiting for any of them.
//!
//! ```text
//!    emit(&Event)
//!        │  interested(kind)?      (Arc-clone per taker)
//!        ├─────────yes───────► [queue S1] ─► worker S1 ─► on_event()
//!        ├─────────no──╳
//!        └─────────yes───────► [queue SN] ─► worker SN ─► on_event()
//! ```
//!
//! ## Rules
//! - Per-subscriber FIFO; no ordering guarantee across subscribers.
//! - A full or closed queue drops the event for that subscriber only; drops
//!   are counted per subscriber and surfaced via [`SubscriberSet::dropped`].
//! - A panic inside `on_event` is caught and logged; the subscriber keeps
//!   receiving subsequent events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::{sync::mpsc, task::JoinHandle};

use crate::events::Event;

use super::Subscribe;

/// One subscriber's intake side: its queue, identity, and drop counter.
struct Lane {
    name: &'static str,
    sub: Arc<dyn Subscribe>,
    queue: mpsc::Sender<Arc<Event>>,
    dropped: AtomicU64,
}

/// Composite fan-out over all registered subscribers.
pub struct SubscriberSet {
    lanes: Vec<Lane>,
    workers: Vec<JoinHandle<()>>,
}

impl SubscriberSet {
    /// Creates the set and spawns one worker per subscriber.
    #[must_use]
    pub fn new(subs: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut lanes = Vec::with_capacity(subs.len());
        let mut workers = Vec::with_capacity(subs.len());

        for sub in subs {
            let (queue, rx) = mpsc::channel::<Arc<Event>>(sub.queue_capacity().max(1));
            workers.push(spawn_worker(Arc::clone(&sub), rx));
            lanes.push(Lane {
                name: sub.name(),
                sub,
                queue,
                dropped: AtomicU64::new(0),
            });
        }

        Self { lanes, workers }
    }

    /// Fans one event out to every interested subscriber without waiting.
    ///
    /// Subscribers whose queue is full or whose worker has exited miss this
    /// event; the miss is counted against them.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind;
        let ev = Arc::new(event.clone());
        for lane in &self.lanes {
            if !lane.sub.interested(kind) {
                continue;
            }
            if lane.queue.try_send(Arc::clone(&ev)).is_err() {
                let total = lane.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                eprintln!(
                    "[taskpool] subscriber '{}' missed a {} event ({} dropped so far)",
                    lane.name,
                    kind.as_label(),
                    total,
                );
            }
        }
    }

    /// Events dropped so far, per subscriber.
    pub fn dropped(&self) -> Vec<(&'static str, u64)> {
        self.lanes
            .iter()
            .map(|l| (l.name, l.dropped.load(Ordering::Relaxed)))
            .collect()
    }

    /// Graceful shutdown: closes all queues, lets the workers drain their
    /// backlog, and waits for them to exit.
    pub async fn shutdown(self) {
        drop(self.lanes);
        for h in self.workers {
            let _ = h.await;
        }
    }

    /// True if there are no subscribers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lanes.is_empty()
    }

    /// Number of subscribers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lanes.len()
    }
}

/// Drains one subscriber's queue, isolating panics so one bad handler cannot
/// take the worker (and all later events) down with it.
fn spawn_worker(sub: Arc<dyn Subscribe>, mut rx: mpsc::Receiver<Arc<Event>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = rx.recv().await {
            let fut = sub.on_event(ev.as_ref());
            if let Err(panic_err) = std::panic::AssertUnwindSafe(fut).catch_unwind().await {
                eprintln!(
                    "[taskpool] subscriber '{}' panicked on a {} event: {:?}",
                    sub.name(),
                    ev.kind.as_label(),
                    panic_err,
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct BreakerWatcher {
        seen: Arc<Mutex<Vec<EventKind>>>,
    }

    #[async_trait]
    impl Subscribe for BreakerWatcher {
        async fn on_event(&self, event: &Event) {
            self.seen
                .lock()
                .expect("watcher lock poisoned")
                .push(event.kind);
        }

        fn interested(&self, kind: EventKind) -> bool {
            matches!(
                kind,
                EventKind::BreakerOpened | EventKind::BreakerHalfOpen | EventKind::BreakerClosed
            )
        }

        fn name(&self) -> &'static str {
            "breaker_watcher"
        }
    }

    #[tokio::test]
    async fn uninterested_kinds_never_reach_the_subscriber() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let set = SubscriberSet::new(vec![Arc::new(BreakerWatcher {
            seen: Arc::clone(&seen),
        })]);

        set.emit(&Event::now(EventKind::TaskSubmitted));
        set.emit(&Event::now(EventKind::BreakerOpened));
        set.emit(&Event::now(EventKind::TaskCompleted));
        set.emit(&Event::now(EventKind::BreakerClosed));
        set.shutdown().await;

        assert_eq!(
            *seen.lock().expect("watcher lock poisoned"),
            vec![EventKind::BreakerOpened, EventKind::BreakerClosed]
        );
    }

    #[tokio::test]
    async fn filtered_events_are_not_counted_as_drops() {
        let set = SubscriberSet::new(vec![Arc::new(BreakerWatcher {
            seen: Arc::new(Mutex::new(Vec::new())),
        })]);

        for _ in 0..10 {
            set.emit(&Event::now(EventKind::TaskStarting));
        }
        assert_eq!(set.dropped(), vec![("breaker_watcher", 0)]);
        set.shutdown().await;
    }
}
