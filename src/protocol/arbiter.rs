//! The resource arbiter: the single owner of the ledger once a run starts.
//!
//! Every read and write of the ledger happens under one mutex. A request that
//! cannot be granted yet records what it is waiting for, parks on the release
//! channel of its resource, and re-runs the whole check each time it wakes.
//! The first wait of a call is bounded by a deadline fixed when the call
//! begins; once that deadline has passed the task waits without a bound, so
//! a release must wake every parked request it may have made safe.

#![allow(missing_docs)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, MutexGuard};

use crate::analysis::{DeadlockStatus, SafetyVerdict, check_availability, check_request, detect};
use crate::core::config::Config;
use crate::core::errors::{BankerError, Result};
use crate::ledger::{LedgerSnapshot, ResourceId, ResourceLedger, TaskId};
use crate::logger::activity::{ActivityEvent, ActivitySink};
use crate::protocol::ProtocolMode;
use crate::protocol::signals::{CondvarSignals, ReleaseSignal, WakeReason};

// ──────────────────── shared state ────────────────────

/// Everything guarded by the arbiter's lock.
#[derive(Debug)]
pub struct ArbiterState {
    ledger: ResourceLedger,
    /// Units each blocked request is waiting for, per task and resource.
    pending: Vec<Vec<u32>>,
}

impl ArbiterState {
    #[must_use]
    pub fn new(ledger: ResourceLedger) -> Self {
        let pending = vec![vec![0; ledger.resource_count()]; ledger.task_count()];
        Self { ledger, pending }
    }

    #[must_use]
    pub const fn ledger(&self) -> &ResourceLedger {
        &self.ledger
    }

    #[must_use]
    pub fn pending(&self) -> &[Vec<u32>] {
        &self.pending
    }

    /// Number of parked requests on each resource kind.
    fn parked_per_resource(&self) -> Vec<usize> {
        let mut parked = vec![0; self.ledger.resource_count()];
        for row in &self.pending {
            for (count, &units) in parked.iter_mut().zip(row) {
                if units > 0 {
                    *count += 1;
                }
            }
        }
        parked
    }
}

// ──────────────────── options ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArbiterOptions {
    pub mode: ProtocolMode,
    pub first_wait_timeout: Duration,
    /// Emit a full state dump after every grant and release.
    pub state_dumps: bool,
}

impl Default for ArbiterOptions {
    fn default() -> Self {
        Self {
            mode: ProtocolMode::Both,
            first_wait_timeout: Duration::from_secs(2),
            state_dumps: false,
        }
    }
}

impl ArbiterOptions {
    #[must_use]
    pub const fn from_config(config: &Config) -> Self {
        Self {
            mode: config.protocol.mode,
            first_wait_timeout: Duration::from_millis(config.protocol.first_wait_timeout_ms),
            state_dumps: config.logging.state_dumps,
        }
    }
}

/// What happened on the way to a grant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrantReport {
    pub task: TaskId,
    pub resource: ResourceId,
    pub amount: u32,
    /// Times the request parked before it was granted.
    pub waits: u32,
    /// Whether the bounded first wait ran out.
    pub timed_out: bool,
    pub elapsed: Duration,
}

// ──────────────────── arbiter ────────────────────

pub struct ResourceArbiter<S: ReleaseSignal = CondvarSignals> {
    state: Mutex<ArbiterState>,
    signals: S,
    options: ArbiterOptions,
    sink: Arc<dyn ActivitySink>,
}

impl ResourceArbiter<CondvarSignals> {
    /// Arbiter with one condition variable per resource kind.
    #[must_use]
    pub fn new(ledger: ResourceLedger, options: ArbiterOptions, sink: Arc<dyn ActivitySink>) -> Self {
        let signals = CondvarSignals::new(ledger.resource_count());
        Self::with_signals(ledger, options, sink, signals)
    }
}

impl<S: ReleaseSignal> ResourceArbiter<S> {
    #[must_use]
    pub fn with_signals(
        ledger: ResourceLedger,
        options: ArbiterOptions,
        sink: Arc<dyn ActivitySink>,
        signals: S,
    ) -> Self {
        Self {
            state: Mutex::new(ArbiterState::new(ledger)),
            signals,
            options,
            sink,
        }
    }

    #[must_use]
    pub const fn options(&self) -> ArbiterOptions {
        self.options
    }

    #[must_use]
    pub const fn mode(&self) -> ProtocolMode {
        self.options.mode
    }

    /// Block until `amount` units of `resource` can be granted to `task`,
    /// then grant them.
    ///
    /// Unknown ids and claims beyond the task's remaining need are rejected
    /// before anything is recorded. A zero-unit request grants nothing and
    /// never waits.
    pub fn request(&self, task: TaskId, resource: ResourceId, amount: u32) -> Result<GrantReport> {
        let entered = Instant::now();
        let deadline = entered + self.options.first_wait_timeout;

        let mut state = self.state.lock();
        state.ledger.check_task(task)?;
        state.ledger.check_resource(resource)?;
        let label = state.ledger.label(resource).to_string();

        let remaining = state.ledger.remaining_need(task)[resource.index()];
        if amount > remaining {
            return Err(BankerError::ClaimExceeded {
                task: task.to_string(),
                resource: label,
                requested: amount,
                remaining,
            });
        }

        let mut report = GrantReport {
            task,
            resource,
            amount,
            waits: 0,
            timed_out: false,
            elapsed: Duration::ZERO,
        };

        if amount > 0 {
            loop {
                let verdict = self.evaluate(&state.ledger, task, resource, amount);
                self.sink.record(ActivityEvent::RequestEvaluated {
                    task,
                    resource: label.clone(),
                    amount,
                    safe: verdict.is_safe(),
                });
                if verdict.is_safe() {
                    break;
                }

                state.pending[task.index()][resource.index()] = amount;
                let bound = (!report.timed_out).then_some(deadline);
                self.sink.record(ActivityEvent::RequestWaiting {
                    task,
                    resource: label.clone(),
                    amount,
                    bounded: bound.is_some(),
                });
                report.waits += 1;

                if self.signals.wait_for_release(resource, &mut state, bound) == WakeReason::TimedOut
                    && !report.timed_out
                {
                    report.timed_out = true;
                    self.sink.record(ActivityEvent::WaitTimedOut {
                        task,
                        resource: label.clone(),
                        amount,
                    });
                }
            }

            state.pending[task.index()][resource.index()] = 0;
            state.ledger.grant(task, resource, amount)?;
        }

        report.elapsed = entered.elapsed();
        self.sink.record(ActivityEvent::Granted {
            task,
            resource: label,
            amount,
            waits: report.waits,
        });
        if self.options.state_dumps && amount > 0 {
            self.dump_locked(&state, format!("after {task} allocate"));
        }
        Ok(report)
    }

    /// Return `amount` units of `resource` held by `task`. Never blocks
    /// beyond the ledger lock.
    ///
    /// The released kind is signalled once. Returned units can also make a
    /// request parked on another kind safe, so every channel with parked
    /// requests is woken as well; woken tasks that are still unsafe park
    /// again.
    pub fn release(&self, task: TaskId, resource: ResourceId, amount: u32) -> Result<()> {
        let mut state = self.state.lock();
        state.ledger.check_task(task)?;
        state.ledger.check_resource(resource)?;
        let label = state.ledger.label(resource).to_string();

        if amount > 0 {
            state.ledger.reclaim(task, resource, amount)?;
        }
        self.sink.record(ActivityEvent::Released {
            task,
            resource: label,
            amount,
        });
        if self.options.state_dumps && amount > 0 {
            self.dump_locked(&state, format!("after {task} release"));
        }
        let parked = state.parked_per_resource();
        drop(state);

        if amount > 0 {
            self.signals.notify_release(resource);
            for (index, &waiters) in parked.iter().enumerate() {
                let kind = ResourceId(index);
                // A lone waiter on the released kind already has its signal.
                if waiters > 1 || (waiters == 1 && kind != resource) {
                    self.signals.broadcast_release(kind);
                }
            }
        }
        Ok(())
    }

    /// Run `f` against the ledger and pending matrix under the lock.
    pub fn inspect<R>(&self, f: impl FnOnce(&ResourceLedger, &[Vec<u32>]) -> R) -> R {
        let state = self.state.lock();
        f(&state.ledger, &state.pending)
    }

    /// Run the deadlock detector against the live ledger.
    pub fn detect(&self) -> DeadlockStatus {
        self.inspect(|ledger, _| detect(ledger))
    }

    /// Consistent copy of the ledger, pending requests included.
    pub fn snapshot(&self) -> LedgerSnapshot {
        self.inspect(|ledger, pending| ledger.snapshot(Some(pending)))
    }

    /// Emit a labelled state dump through the activity sink.
    pub fn dump_state(&self, label: impl Into<String>) {
        let state = self.state.lock();
        self.dump_locked(&state, label.into());
    }

    fn dump_locked(&self, state: &MutexGuard<'_, ArbiterState>, label: String) {
        self.sink.record(ActivityEvent::StateDump {
            label,
            snapshot: state.ledger.snapshot(Some(&state.pending)),
        });
    }

    fn evaluate(
        &self,
        ledger: &ResourceLedger,
        task: TaskId,
        resource: ResourceId,
        amount: u32,
    ) -> SafetyVerdict {
        if self.options.mode.avoids() {
            check_request(ledger, task, resource, amount)
        } else {
            check_availability(ledger, resource, amount)
        }
    }
}
