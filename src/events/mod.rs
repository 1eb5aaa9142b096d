//! # Runtime events: bus and event types.
//!
//! Every noteworthy state change (task lifecycle, admission rejections,
//! breaker transitions, shutdown progress) is published as an [`Event`] on
//! the [`Bus`]. Subscribers consume events without blocking publishers.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
