//! Cooperative exit flag shared by the workers.
//!
//! Workers poll the flag at fixed checkpoints (before each source message,
//! once per idle tick). In-flight socket reads and HTTP calls are not
//! interrupted; they finish or time out before the flag is observed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared, clonable exit flag.
#[derive(Debug, Clone, Default)]
pub struct ShutdownFlag {
    raised: Arc<AtomicBool>,
}

impl ShutdownFlag {
    /// Create a lowered flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask every holder of the flag to exit.
    pub fn trigger(&self) {
        self.raised.store(true, Ordering::SeqCst);
    }

    /// Check whether exit has been requested.
    pub fn is_triggered(&self) -> bool {
        self.raised.load(Ordering::SeqCst)
    }
}
