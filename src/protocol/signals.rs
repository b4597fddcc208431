//! Release notification channels.
//!
//! A blocked request parks on the channel of the resource it asked for. A
//! release wakes one waiter of that resource, and every waiter on channels
//! whose requests may have become safe through it; each woken task re-runs
//! its check under the ledger lock. Wakeup order is whatever the platform
//! gives.

#![allow(missing_docs)]

use std::time::Instant;

use parking_lot::{Condvar, MutexGuard};

use crate::ledger::ResourceId;
use crate::protocol::arbiter::ArbiterState;

/// Why a parked request resumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    /// Signalled, or woken spuriously.
    Notified,
    /// The deadline passed first.
    TimedOut,
}

/// Wait/notify seam between the arbiter and its blocking primitive.
///
/// `wait_for_release` must atomically release the guard while parked and
/// hold it again on return.
pub trait ReleaseSignal: Send + Sync {
    fn wait_for_release(
        &self,
        resource: ResourceId,
        guard: &mut MutexGuard<'_, ArbiterState>,
        deadline: Option<Instant>,
    ) -> WakeReason;

    /// Wake one task parked on `resource`.
    fn notify_release(&self, resource: ResourceId);

    /// Wake every task parked on `resource`.
    fn broadcast_release(&self, resource: ResourceId);
}

/// One condition variable per resource kind, all paired with the arbiter's
/// single mutex.
#[derive(Debug)]
pub struct CondvarSignals {
    channels: Vec<Condvar>,
}

impl CondvarSignals {
    #[must_use]
    pub fn new(resource_kinds: usize) -> Self {
        Self {
            channels: (0..resource_kinds).map(|_| Condvar::new()).collect(),
        }
    }

    #[must_use]
    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

impl ReleaseSignal for CondvarSignals {
    fn wait_for_release(
        &self,
        resource: ResourceId,
        guard: &mut MutexGuard<'_, ArbiterState>,
        deadline: Option<Instant>,
    ) -> WakeReason {
        // Ids are validated by the arbiter before anyone parks.
        let Some(channel) = self.channels.get(resource.index()) else {
            return WakeReason::TimedOut;
        };
        match deadline {
            Some(deadline) => {
                if channel.wait_until(guard, deadline).timed_out() {
                    WakeReason::TimedOut
                } else {
                    WakeReason::Notified
                }
            }
            None => {
                channel.wait(guard);
                WakeReason::Notified
            }
        }
    }

    fn notify_release(&self, resource: ResourceId) {
        if let Some(channel) = self.channels.get(resource.index()) {
            channel.notify_one();
        }
    }

    fn broadcast_release(&self, resource: ResourceId) {
        if let Some(channel) = self.channels.get(resource.index()) {
            channel.notify_all();
        }
    }
}
