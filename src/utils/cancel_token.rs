use std::fmt;
use std::fmt::Debug;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Shared cancellation state. A state may have a parent, so cancelling a
/// parent is observed by all of its descendants.
struct CancelState {
    cancelled: AtomicBool,
    parent: Option<Arc<CancelState>>,
}

impl CancelState {
    #[inline]
    fn new_root() -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            parent: None,
        })
    }

    #[inline]
    fn child_of(parent: Arc<CancelState>) -> Arc<Self> {
        Arc::new(Self {
            cancelled: AtomicBool::new(false),
            parent: Some(parent),
        })
    }

    #[inline]
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    /// True if this state or any ancestor has been cancelled.
    #[inline]
    fn is_cancelled(&self) -> bool {
        let mut state = self;
        loop {
            if state.cancelled.load(Ordering::Relaxed) {
                return true;
            }
            match &state.parent {
                Some(parent) => state = parent,
                None => return false,
            }
        }
    }
}

/// Hierarchical cancellation token.
///
/// Cheap to clone and check. Cancelling a parent token cancels all of
/// its children.
#[derive(Clone)]
pub struct CancelToken {
    state: Arc<CancelState>,
}

impl Debug for CancelToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelToken")
            .field("is_cancelled", &self.is_cancelled())
            .finish()
    }
}

impl CancelToken {
    #[inline]
    pub fn new_root() -> Self {
        Self {
            state: CancelState::new_root(),
        }
    }

    #[inline]
    pub fn cancel(&self) {
        self.state.cancel();
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.state.is_cancelled()
    }

    /// Creates a child token linked to this one.
    #[inline]
    pub fn new_child(&self) -> Self {
        Self {
            state: CancelState::child_of(self.state.clone()),
        }
    }

    /// Sleeps until cancelled or the duration elapses. Returns false when
    /// the sleep was interrupted by cancellation.
    pub fn sleep_cancellable(&self, total: Duration) -> bool {
        let mut slept = Duration::ZERO;
        let tick = Duration::from_millis(50);
        while slept < total {
            if self.is_cancelled() {
                return false;
            }
            std::thread::sleep(tick.min(total - slept));
            slept += tick;
        }
        true
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new_root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parent_cancel_reaches_children() {
        let root = CancelToken::new_root();
        let child = root.new_child();
        let grandchild = child.new_child();
        assert!(!grandchild.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[test]
    fn child_cancel_stays_local() {
        let root = CancelToken::new_root();
        let child = root.new_child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!root.is_cancelled());
    }
}
