//! # Simple logging subscriber for debugging and demos.
//!
//! [`LogWriter`] prints one line per event to stdout, keyed by the event's
//! label, with whatever metadata the event carries.
//!
//! ## Output format
//! ```text
//! [submitted] id=task-3
//! [starting] task=resize id=task-3 queued=1.2ms
//! [failed] task=resize id=task-3 reason=execution failed: connection refused
//! [rejected] task=resize reason=circuit_open
//! [breaker_opened]
//! [drain_timed_out] reason=abandoned=7
//! ```

use async_trait::async_trait;

use crate::events::Event;
use crate::subscribers::Subscribe;

/// Simple stdout logging subscriber.
///
/// Enabled via the `logging` feature. Not intended for production use -
/// implement a custom [`Subscribe`] for structured logging or metrics.
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    /// Creates a new writer.
    pub fn new() -> Self {
        LogWriter
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let mut line = format!("[{}]", e.kind.as_label());
        if let Some(task) = &e.task {
            line.push_str(&format!(" task={task}"));
        }
        if let Some(id) = e.id {
            line.push_str(&format!(" id={id}"));
        }
        if let Some(queued) = e.queued_for {
            line.push_str(&format!(" queued={queued:?}"));
        }
        if let Some(reason) = &e.reason {
            line.push_str(&format!(" reason={reason}"));
        }
        println!("{line}");
    }

    fn name(&self) -> &'static str {
        "log_writer"
    }
}
