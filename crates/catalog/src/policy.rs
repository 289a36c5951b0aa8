//! Timeout and retry policy applied to every store call.

use std::time::Duration;

use common::Backoff;

/// Bounds on how long and how often the catalog talks to its store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorePolicy {
    /// Upper bound for a single store call.
    pub timeout: Duration,
    /// Attempts for calls that are safe to repeat; 1 disables retries.
    pub max_attempts: u32,
    /// Delay schedule between attempts.
    pub backoff: Backoff,
}

impl StorePolicy {
    pub fn new(timeout: Duration, max_attempts: u32) -> Self {
        Self {
            timeout,
            max_attempts: max_attempts.max(1),
            backoff: Backoff::default(),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

impl Default for StorePolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(2), 3)
    }
}
