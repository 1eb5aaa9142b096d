//! # Event subscribers: non-blocking fan-out of runtime events.
//!
//! - [`Subscribe`] - trait for plugging custom event handlers (metrics, audit)
//! - [`SubscriberSet`] - per-subscriber bounded queues with worker tasks
//! - [`LogWriter`] - stdout subscriber for demos (feature `logging`)

mod set;
mod subscribe;

#[cfg(feature = "logging")]
mod log;

pub use set::SubscriberSet;
pub use subscribe::Subscribe;

#[cfg(feature = "logging")]
pub use log::LogWriter;
