//! # Cancellation contexts: propagating cancel/deadline signals.
//!
//! A [`Context`] is a node in a reference-counted tree. Each node carries its
//! own cancel flag and an optional deadline; a node observes itself cancelled
//! when its own flag is set, its own deadline has elapsed, or any ancestor is
//! cancelled. Cancellation is **monotonic**: a context never re-enters the
//! uncancelled state.
//!
//! ## Architecture
//! ```text
//! Context::root()
//!     └── with_deadline(5s) ──► child A   (cancelled when 5s elapse)
//!     └── with_cancel() ──────► child B + CancelHandle
//!              └── with_deadline(1s) ──► grandchild
//!                  (cancelled when B is cancelled OR 1s elapses)
//! ```
//!
//! ## Rules
//! - [`Context::is_cancelled`] never blocks; it is a pure, fast check
//!   (flag load + deadline compare, walked up to the root).
//! - Only the holder of a [`CancelHandle`] may issue manual cancellation;
//!   any clone of the context may observe it.
//! - [`CancelHandle::cancel`] is idempotent.
//! - Cancellation is **advisory**: nothing is preempted. Task bodies are
//!   expected to poll their context at safe points and exit cooperatively.

mod node;

pub use node::{CancelHandle, Context};
