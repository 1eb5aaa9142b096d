//! # Pipeline composition: stages and fan-out/fan-in.
//!
//! A [`Stage`] wraps a worker pool behind a stream-to-stream interface:
//! `process(ctx, input) -> output`, producing one [`TaskResult`] per input
//! item, incrementally. A [`FanOut`] partitions one input stream across N
//! stage replicas (deterministic round-robin) and merges their outputs.
//!
//! ## Merge policies
//! - [`MergePolicy::Unordered`]: results are emitted in completion order
//!   (first-finished-first-out).
//! - [`MergePolicy::Ordered`]: results are re-sequenced to the original
//!   input order. Out-of-order completions are buffered until their turn;
//!   the buffer is bounded by the stage's `in_flight` limit, which is the
//!   backpressure point (dispatch stalls while the bound is exhausted).
//!
//! ## Failure semantics
//! A single failed item does not abort the stream: its result carries the
//! error and the stream continues. With `fail_fast` set, the first error
//! cancels the stage's shared context, in-flight siblings observe the
//! cancellation, and the stream terminates early.
//!
//! [`TaskResult`]: crate::TaskResult

mod fanout;
mod stage;

pub use fanout::FanOut;
pub use stage::{MergePolicy, Stage, StageConfig};
