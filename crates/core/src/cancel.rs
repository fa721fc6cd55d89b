//! Consume-once cancellation signal.
//!
//! A stop request sets the flag; the generation session polls it once per
//! upstream chunk. Reading and clearing happen in one critical section, so a
//! single stop request is observed by exactly one poller.

use std::sync::Mutex;

/// A mutex-guarded stop flag with check-and-clear semantics.
#[derive(Debug, Default)]
pub struct CancellationSignal {
    stop_requested: Mutex<bool>,
}

impl CancellationSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the flag. Idempotent until someone consumes it.
    pub fn request_stop(&self) {
        let mut flag = self.stop_requested.lock().unwrap_or_else(|e| e.into_inner());
        *flag = true;
    }

    /// Atomically read the flag and reset it to `false`, returning the prior
    /// value.
    pub fn check_and_clear(&self) -> bool {
        let mut flag = self.stop_requested.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::replace(&mut *flag, false)
    }

    /// Drop any pending stop without observing it.
    pub fn reset(&self) {
        let mut flag = self.stop_requested.lock().unwrap_or_else(|e| e.into_inner());
        *flag = false;
    }

    /// Peek at the flag without consuming it.
    pub fn is_requested(&self) -> bool {
        *self.stop_requested.lock().unwrap_or_else(|e| e.into_inner())
    }
}
