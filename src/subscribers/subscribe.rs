//! # Subscriber contract.
//!
//! `Subscribe` is the extension point for observing the runtime: metrics
//! sinks, audit logs, alerting hooks. Each subscriber runs on its own worker
//! task behind a bounded queue owned by the
//! [`SubscriberSet`](crate::subscribers::SubscriberSet), so a slow or
//! panicking subscriber never stalls the pool or its siblings.
//!
//! ## Contract
//! - [`Subscribe::on_event`] may be slow (I/O, batching); it runs off the
//!   publishing path.
//! - [`Subscribe::interested`] filters by [`EventKind`] **before** the event
//!   is queued; uninteresting events cost the subscriber nothing. Default:
//!   everything.
//! - [`Subscribe::queue_capacity`] sizes the subscriber's queue; on overflow
//!   events for that subscriber are dropped and counted (warn).

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// Contract for event subscribers.
///
/// Called from a subscriber-dedicated worker task. Implementations should
/// avoid blocking the async runtime (prefer async I/O and cooperative waits).
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles a single event for this subscriber.
    async fn on_event(&self, event: &Event);

    /// Returns whether this subscriber wants events of the given kind.
    ///
    /// Checked on the publishing side before the event enters this
    /// subscriber's queue. A metrics sink can take only breaker transitions,
    /// an audit log only task lifecycle, without paying for the rest.
    fn interested(&self, _kind: EventKind) -> bool {
        true
    }

    /// Human-readable name (for drop warnings and diagnostics).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}
