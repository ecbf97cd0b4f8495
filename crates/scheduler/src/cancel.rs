//! Cancellation tokens for loading sessions
//!
//! Each progressive loading session owns a token. Starting a new session or
//! cancelling the loader trips the old token, so a fetch that completes
//! afterwards can tell its result is no longer wanted.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative session cancellation
///
/// Clones share the same underlying state, so a fetch holding a clone
/// observes cancellation issued through the original.
///
/// # Example
///
/// ```
/// use stockroom_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let fetch_token = token.clone();
///
/// token.cancel();
/// assert!(fetch_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new cancellation token
    ///
    /// The token starts in a non-cancelled state.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token
    ///
    /// All clones of this token will also observe the cancellation.
    /// Calling it more than once has no further effect.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Check if this token has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
