// SPDX-License-Identifier: Apache-2.0
// Copyright Skytap Authors

//! Cooperative shutdown signalling.
//!
//! One [`Shutdown`] handle is cloned into every background loop.  Loops must
//! use [`Shutdown::sleep`] instead of raw sleeps so that cancellation
//! interrupts any dwell immediately rather than after it elapses.

#![deny(clippy::all, clippy::pedantic)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A process-wide cancellation event.
///
/// Cheap to clone; all clones observe the same flag.  Once triggered it never
/// resets.
#[derive(Debug, Clone, Default)]
pub struct Shutdown {
    inner: Arc<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    triggered: AtomicBool,
    lock: Mutex<()>,
    cond: Condvar,
}

impl Shutdown {
    /// Create a new, untriggered shutdown event.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Trigger the event, waking every thread blocked in [`Shutdown::sleep`].
    pub fn trigger(&self) {
        self.inner.triggered.store(true, Ordering::SeqCst);
        // The guard serializes with sleepers between their flag check and
        // their wait, so no wakeup can be lost.
        let _guard = match self.inner.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        self.inner.cond.notify_all();
    }

    /// Whether shutdown has been requested.
    #[must_use]
    pub fn is_triggered(&self) -> bool {
        self.inner.triggered.load(Ordering::SeqCst)
    }

    /// Sleep for `timeout`, returning early if shutdown is triggered.
    ///
    /// Returns `true` if the sleep was interrupted by shutdown.
    pub fn sleep(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        let mut guard = match self.inner.lock.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        loop {
            if self.is_triggered() {
                return true;
            }
            let now = std::time::Instant::now();
            let Some(remaining) = deadline.checked_duration_since(now).filter(|d| !d.is_zero())
            else {
                return false;
            };
            guard = match self.inner.cond.wait_timeout(guard, remaining) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::time::Instant;

    #[test]
    fn sleep_runs_to_completion_when_untriggered() {
        let shutdown = Shutdown::new();
        let start = Instant::now();
        assert!(!shutdown.sleep(Duration::from_millis(20)));
        assert!(start.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn sleep_returns_immediately_once_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let start = Instant::now();
        assert!(shutdown.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn trigger_wakes_a_sleeping_thread() {
        let shutdown = Shutdown::new();
        let sleeper = shutdown.clone();
        let handle = std::thread::spawn(move || sleeper.sleep(Duration::from_secs(30)));
        std::thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        assert!(handle.join().unwrap());
    }

    #[test]
    fn clones_share_the_flag() {
        let shutdown = Shutdown::new();
        let clone = shutdown.clone();
        assert!(!clone.is_triggered());
        shutdown.trigger();
        assert!(clone.is_triggered());
    }
}
