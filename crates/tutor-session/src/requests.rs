//! Shared in-flight request counter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Counts backend requests in flight. The session is busy while the count
/// is above zero.
///
/// Clones share the same counter.
#[derive(Debug, Clone, Default)]
pub struct PendingRequests {
    count: Arc<AtomicUsize>,
}

impl PendingRequests {
    /// Creates a counter at zero.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Increments the counter and returns a guard that decrements it on drop.
    #[must_use = "the request is released as soon as the guard is dropped"]
    pub fn acquire(&self) -> RequestGuard {
        self.increment();
        RequestGuard {
            counter: self.clone(),
        }
    }

    /// Increments the counter, returning the new value.
    pub fn increment(&self) -> usize {
        self.count.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Decrements the counter, never going below zero. Returns the new value.
    pub fn decrement(&self) -> usize {
        let previous = self
            .count
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap_or(0);
        previous.saturating_sub(1)
    }

    /// Current number of requests in flight.
    #[must_use]
    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }

    /// Returns `true` while any request is in flight.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.count() > 0
    }
}

/// Releases one in-flight request when dropped.
#[derive(Debug)]
pub struct RequestGuard {
    counter: PendingRequests,
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.counter.decrement();
    }
}
