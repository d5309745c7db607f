//! Cooperative cancellation flag.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared abort flag, polled at iteration and yield boundaries.
///
/// Cloning yields a handle to the same flag, so a UI or signal handler can
/// hold one clone while the sampling loop polls another.
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    /// Create a signal in the not-aborted state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn abort(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    /// Whether cancellation was requested.
    pub fn is_aborted(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}
