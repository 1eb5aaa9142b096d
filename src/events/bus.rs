//! # Event bus: the single broadcast channel behind all lifecycle events.
//!
//! Workers, the admission gates, and the shutdown path all publish through
//! one [`Bus`]; the runtime's subscriber listener and any ad-hoc observers
//! attach independent receivers.
//!
//! ## Rules
//! - Publishing never blocks and never fails: with no receivers attached the
//!   event is simply dropped.
//! - One ring buffer of `capacity` recent events is shared by all receivers;
//!   a receiver that falls more than `capacity` events behind gets
//!   `RecvError::Lagged(n)` and skips the `n` oldest.
//! - A receiver only observes events published after it subscribed; the bus
//!   keeps no history for late joiners.

use tokio::sync::broadcast;

use super::event::{Event, EventKind};

/// Broadcast channel for runtime events.
///
/// Cheap to clone (the sender is `Arc`-backed); every part of the runtime
/// holds its own clone and publishes concurrently.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
    capacity: usize,
}

impl Bus {
    /// Creates a bus with the given ring-buffer capacity (clamped to min 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<Event>(capacity);
        Self { tx, capacity }
    }

    /// Publishes a fully-built event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Publishes a bare event of the given kind, stamped with the current
    /// time and sequence number. For events carrying no task metadata
    /// (breaker transitions, drain completion).
    pub fn emit(&self, kind: EventKind) {
        self.publish(Event::now(kind));
    }

    /// Creates an independent receiver observing subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }

    /// Ring-buffer capacity shared by all receivers.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
