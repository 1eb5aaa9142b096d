//! Context tree nodes and the owner-side cancel handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

/// One node of the cancellation tree.
///
/// Nodes are immutable apart from the `cancelled` flag, which only ever
/// transitions `false → true`.
#[derive(Debug)]
struct Node {
    cancelled: AtomicBool,
    deadline: Option<Instant>,
    parent: Option<Arc<Node>>,
}

impl Node {
    /// True iff this node or any ancestor is cancelled, or a deadline
    /// (own or inherited) has elapsed.
    fn is_cancelled(&self, now: Instant) -> bool {
        let mut node = self;
        loop {
            if node.cancelled.load(Ordering::Acquire) {
                return true;
            }
            if let Some(dl) = node.deadline {
                if now >= dl {
                    return true;
                }
            }
            match &node.parent {
                Some(p) => node = p,
                None => return false,
            }
        }
    }
}

/// Propagating cancellation/deadline signal passed into every task invocation.
///
/// Cheap to clone (a single `Arc`); all clones observe the same node.
///
/// # Example
/// ```
/// use taskpool::Context;
///
/// let root = Context::root();
/// let (ctx, cancel) = root.with_cancel();
/// assert!(!ctx.is_cancelled());
///
/// cancel.cancel();
/// cancel.cancel(); // idempotent
/// assert!(ctx.is_cancelled());
/// assert!(!root.is_cancelled());
/// ```
#[derive(Clone, Debug)]
pub struct Context {
    inner: Arc<Node>,
}

impl Context {
    /// Creates an uncancellable root context.
    pub fn root() -> Self {
        Self {
            inner: Arc::new(Node {
                cancelled: AtomicBool::new(false),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// Derives a manually-cancellable child context.
    ///
    /// The child is cancelled when [`CancelHandle::cancel`] is called or the
    /// parent becomes cancelled. Cancelling the child never affects the parent.
    pub fn with_cancel(&self) -> (Context, CancelHandle) {
        let node = Arc::new(Node {
            cancelled: AtomicBool::new(false),
            deadline: None,
            parent: Some(Arc::clone(&self.inner)),
        });
        (
            Context {
                inner: Arc::clone(&node),
            },
            CancelHandle { node },
        )
    }

    /// Derives a child context that cancels itself once `timeout` elapses.
    ///
    /// The deadline is measured on the tokio clock, so paused-clock tests
    /// observe it deterministically.
    pub fn with_deadline(&self, timeout: Duration) -> Context {
        let deadline = Instant::now() + timeout;
        Context {
            inner: Arc::new(Node {
                cancelled: AtomicBool::new(false),
                deadline: Some(deadline),
                parent: Some(Arc::clone(&self.inner)),
            }),
        }
    }

    /// Pure, non-blocking cancellation check.
    ///
    /// True iff this context's flag is set, its deadline has elapsed, or any
    /// ancestor is cancelled. A context never un-cancels.
    pub fn is_cancelled(&self) -> bool {
        self.inner.is_cancelled(Instant::now())
    }

    /// Returns the effective (nearest) deadline across this context and its
    /// ancestors, if any.
    pub fn deadline(&self) -> Option<Instant> {
        let mut node = Some(&self.inner);
        let mut nearest: Option<Instant> = None;
        while let Some(n) = node {
            nearest = match (nearest, n.deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            node = n.parent.as_ref();
        }
        nearest
    }
}

/// Owner-side handle for manual cancellation.
///
/// Only the holder of the handle may cancel; observers hold [`Context`]
/// clones. The handle is deliberately not `Clone`: one owner per node.
#[derive(Debug)]
pub struct CancelHandle {
    node: Arc<Node>,
}

impl CancelHandle {
    /// Cancels the associated context. Idempotent; calling it more than once
    /// has no additional effect.
    pub fn cancel(&self) {
        self.node.cancelled.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_is_never_cancelled() {
        let root = Context::root();
        assert!(!root.is_cancelled());
        assert!(root.deadline().is_none());
    }

    #[test]
    fn cancel_is_idempotent_and_monotonic() {
        let (ctx, handle) = Context::root().with_cancel();
        assert!(!ctx.is_cancelled());
        handle.cancel();
        assert!(ctx.is_cancelled());
        handle.cancel();
        handle.cancel();
        assert!(ctx.is_cancelled(), "context must never un-cancel");
    }

    #[test]
    fn parent_cancellation_propagates_to_children() {
        let (parent, handle) = Context::root().with_cancel();
        let (child, _child_handle) = parent.with_cancel();
        let grandchild = child.with_deadline(Duration::from_secs(3600));

        assert!(!grandchild.is_cancelled());
        handle.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn child_cancellation_does_not_affect_parent() {
        let (parent, _parent_handle) = Context::root().with_cancel();
        let (child, handle) = parent.with_cancel();

        handle.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_elapsing_cancels_the_context() {
        let ctx = Context::root().with_deadline(Duration::from_millis(100));
        assert!(!ctx.is_cancelled());

        tokio::time::advance(Duration::from_millis(99)).await;
        assert!(!ctx.is_cancelled());

        tokio::time::advance(Duration::from_millis(2)).await;
        assert!(ctx.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn effective_deadline_is_the_nearest_ancestor_deadline() {
        let outer = Context::root().with_deadline(Duration::from_secs(10));
        let inner = outer.with_deadline(Duration::from_secs(60));

        // Inner inherits the tighter outer deadline.
        assert_eq!(inner.deadline(), outer.deadline());

        tokio::time::advance(Duration::from_secs(11)).await;
        assert!(inner.is_cancelled());
    }
}
