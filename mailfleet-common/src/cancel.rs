//! Cooperative cancellation.
//!
//! A single [`CancelToken`] is cloned into every component that can
//! suspend (job claim, send attempt, backoff sleep, connection
//! handshake). Cancellation is observed, never forced: an in-flight
//! operation runs to its next checkpoint before stopping, so no send is
//! torn down mid-transaction.

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// Shared cancellation flag.
///
/// Cheap to clone; all clones observe the same flag. The flag only ever
/// transitions from unset to set.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    /// Create a new, unset token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    /// Returns `true` once cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_unset() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[test]
    fn clones_share_the_flag() {
        let token = CancelToken::new();
        let observer = token.clone();
        assert!(!observer.is_cancelled());

        token.cancel();
        assert!(observer.is_cancelled());

        // Setting twice is fine
        token.cancel();
        assert!(token.is_cancelled());
    }
}
