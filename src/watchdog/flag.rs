//! The watchdog's on/off switch, guarded by its own lock.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Shared "keep checking for deadlocks" flag.
///
/// Separate from the ledger lock so turning the watchdog off never contends
/// with workers. Clearing the flag wakes a watchdog sleeping between polls.
#[derive(Debug)]
pub struct ActiveFlag {
    active: Mutex<bool>,
    changed: Condvar,
}

impl ActiveFlag {
    #[must_use]
    pub fn new(active: bool) -> Self {
        Self {
            active: Mutex::new(active),
            changed: Condvar::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        *self.active.lock()
    }

    pub fn deactivate(&self) {
        *self.active.lock() = false;
        self.changed.notify_all();
    }

    /// Sleep for `interval` unless the flag is cleared first.
    ///
    /// Returns whether the flag is still set afterwards.
    pub fn wait_while_active(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut active = self.active.lock();
        while *active {
            if self.changed.wait_until(&mut active, deadline).timed_out() {
                break;
            }
        }
        *active
    }
}

impl Default for ActiveFlag {
    fn default() -> Self {
        Self::new(true)
    }
}
