//! Deadlock watchdog loop: sleep, lock the ledger, run the detector, repeat.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serde::Serialize;

use crate::analysis::{DeadlockStatus, detect};
use crate::core::errors::{BankerError, Result};
use crate::ledger::{LedgerSnapshot, TaskId};
use crate::logger::activity::{ActivityEvent, ActivitySink};
use crate::protocol::{CondvarSignals, ReleaseSignal, ResourceArbiter};
use crate::watchdog::flag::ActiveFlag;

/// What the watchdog saw when it found a deadlock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadlockReport {
    /// Tasks that can never obtain their remaining need.
    pub tasks: Vec<TaskId>,
    /// Poll on which the deadlock was found (1-based).
    pub poll: u64,
    pub snapshot: LedgerSnapshot,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchdogOutcome {
    /// The active flag was cleared; no deadlock was seen.
    Stopped { polls: u64 },
    Deadlocked(DeadlockReport),
}

impl WatchdogOutcome {
    #[must_use]
    pub const fn is_deadlocked(&self) -> bool {
        matches!(self, Self::Deadlocked(_))
    }
}

pub struct Watchdog<S: ReleaseSignal = CondvarSignals> {
    arbiter: Arc<ResourceArbiter<S>>,
    flag: Arc<ActiveFlag>,
    interval: Duration,
    sink: Arc<dyn ActivitySink>,
}

impl<S: ReleaseSignal + 'static> Watchdog<S> {
    #[must_use]
    pub fn new(
        arbiter: Arc<ResourceArbiter<S>>,
        flag: Arc<ActiveFlag>,
        interval: Duration,
        sink: Arc<dyn ActivitySink>,
    ) -> Self {
        Self {
            arbiter,
            flag,
            interval,
            sink,
        }
    }

    /// Poll until the active flag is cleared or a deadlock is found.
    ///
    /// The ledger lock is held only for the detector run itself; the sleep
    /// between polls happens on the flag's own lock.
    pub fn run(&self) -> WatchdogOutcome {
        let mut polls = 0_u64;
        while self.flag.wait_while_active(self.interval) {
            polls += 1;
            let (status, snapshot) = self
                .arbiter
                .inspect(|ledger, pending| (detect(ledger), ledger.snapshot(Some(pending))));

            self.sink.record(ActivityEvent::DeadlockCheck {
                poll: polls,
                deadlocked: status.is_deadlocked(),
            });

            if let DeadlockStatus::Deadlocked { tasks } = status {
                self.sink.record(ActivityEvent::DeadlockDetected {
                    tasks: tasks.clone(),
                });
                return WatchdogOutcome::Deadlocked(DeadlockReport {
                    tasks,
                    poll: polls,
                    snapshot,
                });
            }
        }

        self.sink.record(ActivityEvent::WatchdogStopped { polls });
        WatchdogOutcome::Stopped { polls }
    }

    /// Run on a dedicated named thread.
    pub fn spawn(self) -> Result<thread::JoinHandle<WatchdogOutcome>> {
        thread::Builder::new()
            .name("banker-watchdog".to_string())
            .spawn(move || self.run())
            .map_err(|e| BankerError::Runtime {
                details: format!("failed to spawn watchdog thread: {e}"),
            })
    }
}
