//! Scenario runner: one thread per worker script, an optional watchdog, and
//! a coordinator loop that decides how the run ends.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{RecvTimeoutError, Sender, unbounded};
use rand::Rng;

use crate::core::config::Config;
use crate::core::errors::{BankerError, Result};
use crate::ledger::{LedgerSnapshot, ResourceId, ResourceLedger, TaskId};
use crate::logger::activity::{ActivityEvent, ActivitySink};
use crate::protocol::{ArbiterOptions, ResourceArbiter};
use crate::scenario::script::Step;
use crate::watchdog::{ActiveFlag, DeadlockReport, Watchdog, WatchdogOutcome};

/// Coordinator wake-up period while workers run.
const COORDINATOR_TICK: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Up to this many extra milliseconds are added to every pause.
    pub jitter_ms: u64,
    /// Set from outside (e.g. by a signal handler) to abandon the run.
    pub interrupt: Option<Arc<AtomicBool>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every worker ran its script to the end.
    Completed {
        snapshot: LedgerSnapshot,
        elapsed: Duration,
        watchdog_polls: u64,
    },
    /// The watchdog found a deadlock. Blocked workers are left parked.
    Deadlocked {
        report: DeadlockReport,
        elapsed: Duration,
    },
    Interrupted {
        snapshot: LedgerSnapshot,
        elapsed: Duration,
    },
}

impl RunOutcome {
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Completed { .. } => "completed",
            Self::Deadlocked { .. } => "deadlocked",
            Self::Interrupted { .. } => "interrupted",
        }
    }

    #[must_use]
    pub const fn elapsed(&self) -> Duration {
        match self {
            Self::Completed { elapsed, .. }
            | Self::Deadlocked { elapsed, .. }
            | Self::Interrupted { elapsed, .. } => *elapsed,
        }
    }
}

/// A script step with its resource label resolved against the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Request(ResourceId, u32),
    Release(ResourceId, u32),
    Pause(u64),
}

fn resolve_script(ledger: &ResourceLedger, script: &[Step]) -> Result<Vec<Action>> {
    script
        .iter()
        .map(|step| {
            Ok(match step {
                Step::Request { resource, amount } => {
                    Action::Request(ledger.resolve_resource(resource)?, *amount)
                }
                Step::Release { resource, amount } => {
                    Action::Release(ledger.resolve_resource(resource)?, *amount)
                }
                Step::Pause { ms } => Action::Pause(*ms),
            })
        })
        .collect()
}

type WorkerDone = (TaskId, Result<()>);

/// Run every task script of `config` to completion, deadlock or interrupt.
///
/// A worker that fails (claim exceeded, invariant violation) aborts the run
/// with its error.
#[allow(clippy::too_many_lines)]
pub fn run_scenario(
    config: &Config,
    sink: Arc<dyn ActivitySink>,
    options: &RunOptions,
) -> Result<RunOutcome> {
    config.validate()?;
    let started = Instant::now();

    let ledger = ResourceLedger::from_config(config)?;
    let scripts = config
        .tasks
        .iter()
        .map(|task| resolve_script(&ledger, &task.script))
        .collect::<Result<Vec<_>>>()?;

    let arbiter = Arc::new(ResourceArbiter::new(
        ledger,
        ArbiterOptions::from_config(config),
        Arc::clone(&sink),
    ));
    let mode = arbiter.mode();

    sink.record(ActivityEvent::RunStarted {
        mode: mode.to_string(),
        config_hash: config.stable_hash()?,
        tasks: scripts.len(),
    });
    arbiter.dump_state("initial");

    let flag = Arc::new(ActiveFlag::new(mode.detects()));
    let mut watchdog = if mode.detects() {
        let interval = Duration::from_millis(config.watchdog.poll_interval_ms);
        Some(
            Watchdog::new(
                Arc::clone(&arbiter),
                Arc::clone(&flag),
                interval,
                Arc::clone(&sink),
            )
            .spawn()?,
        )
    } else {
        None
    };

    let (done_tx, done_rx) = unbounded::<WorkerDone>();
    let mut workers = Vec::with_capacity(scripts.len());
    for (index, actions) in scripts.into_iter().enumerate() {
        let task = TaskId(index);
        let arbiter = Arc::clone(&arbiter);
        let sink = Arc::clone(&sink);
        let done_tx = done_tx.clone();
        let jitter_ms = options.jitter_ms;
        let spawned = thread::Builder::new()
            .name(format!("banker-{task}"))
            .spawn(move || worker_main(task, &actions, &arbiter, sink.as_ref(), jitter_ms, &done_tx));
        match spawned {
            Ok(handle) => workers.push(handle),
            Err(e) => {
                flag.deactivate();
                return Err(BankerError::Runtime {
                    details: format!("failed to spawn worker {task}: {e}"),
                });
            }
        }
    }
    drop(done_tx);

    let mut remaining = workers.len();
    let outcome = loop {
        if options
            .interrupt
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
        {
            flag.deactivate();
            sink.record(ActivityEvent::Warning {
                message: "run interrupted".to_string(),
            });
            break RunOutcome::Interrupted {
                snapshot: arbiter.snapshot(),
                elapsed: started.elapsed(),
            };
        }

        if watchdog
            .as_ref()
            .is_some_and(std::thread::JoinHandle::is_finished)
            && let Some(handle) = watchdog.take()
            && let Some(report) = join_watchdog(handle)?
        {
            break RunOutcome::Deadlocked {
                report,
                elapsed: started.elapsed(),
            };
        }

        match done_rx.recv_timeout(COORDINATOR_TICK) {
            Ok((task, Ok(()))) => {
                sink.record(ActivityEvent::TaskFinished { task, error: None });
                remaining -= 1;
                if remaining == 0 {
                    flag.deactivate();
                    let mut watchdog_polls = 0;
                    if let Some(handle) = watchdog.take() {
                        match handle.join() {
                            Ok(WatchdogOutcome::Stopped { polls }) => watchdog_polls = polls,
                            Ok(WatchdogOutcome::Deadlocked(report)) => {
                                break RunOutcome::Deadlocked {
                                    report,
                                    elapsed: started.elapsed(),
                                };
                            }
                            Err(_) => {
                                return Err(BankerError::Runtime {
                                    details: "watchdog thread panicked".to_string(),
                                });
                            }
                        }
                    }
                    for handle in workers.drain(..) {
                        let _ = handle.join();
                    }
                    break RunOutcome::Completed {
                        snapshot: arbiter.snapshot(),
                        elapsed: started.elapsed(),
                        watchdog_polls,
                    };
                }
            }
            Ok((task, Err(error))) => {
                sink.record(ActivityEvent::TaskFinished {
                    task,
                    error: Some(error.to_string()),
                });
                flag.deactivate();
                return Err(error);
            }
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => {
                flag.deactivate();
                return Err(BankerError::ChannelClosed {
                    component: "scenario runner",
                });
            }
        }
    };

    arbiter.dump_state("final");
    sink.record(ActivityEvent::RunFinished {
        outcome: outcome.label().to_string(),
        elapsed_ms: u64::try_from(outcome.elapsed().as_millis()).unwrap_or(u64::MAX),
    });
    Ok(outcome)
}

fn join_watchdog(handle: thread::JoinHandle<WatchdogOutcome>) -> Result<Option<DeadlockReport>> {
    match handle.join() {
        Ok(WatchdogOutcome::Deadlocked(report)) => Ok(Some(report)),
        Ok(WatchdogOutcome::Stopped { .. }) => Ok(None),
        Err(_) => Err(BankerError::Runtime {
            details: "watchdog thread panicked".to_string(),
        }),
    }
}

fn worker_main(
    task: TaskId,
    actions: &[Action],
    arbiter: &ResourceArbiter,
    sink: &dyn ActivitySink,
    jitter_ms: u64,
    done_tx: &Sender<WorkerDone>,
) {
    sink.record(ActivityEvent::TaskStarted { task });
    let result = run_actions(task, actions, arbiter, jitter_ms);
    // The coordinator may already have returned after a deadlock.
    let _ = done_tx.send((task, result));
}

fn run_actions(
    task: TaskId,
    actions: &[Action],
    arbiter: &ResourceArbiter,
    jitter_ms: u64,
) -> Result<()> {
    let mut rng = rand::rng();
    for action in actions {
        match *action {
            Action::Request(resource, amount) => {
                arbiter.request(task, resource, amount)?;
            }
            Action::Release(resource, amount) => arbiter.release(task, resource, amount)?,
            Action::Pause(ms) => {
                let extra = if jitter_ms > 0 {
                    rng.random_range(0..=jitter_ms)
                } else {
                    0
                };
                thread::sleep(Duration::from_millis(ms.saturating_add(extra)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::{ResourcesConfig, TaskConfig};
    use crate::logger::activity::RecordingSink;
    use crate::protocol::ProtocolMode;

    fn single_resource_config(mode: ProtocolMode, tasks: Vec<TaskConfig>) -> Config {
        let mut config = Config {
            resources: ResourcesConfig {
                labels: vec!["A".to_string()],
                total: vec![2],
            },
            tasks,
            ..Config::default()
        };
        config.protocol.mode = mode;
        config.watchdog.poll_interval_ms = 10;
        config.logging.console = false;
        config
    }

    #[test]
    fn resolve_script_maps_labels_to_ids() {
        let ledger = ResourceLedger::from_config(&Config::default()).unwrap();
        let actions = resolve_script(
            &ledger,
            &[Step::pause(5), Step::request("C", 1), Step::release("C", 1)],
        )
        .unwrap();
        assert_eq!(
            actions,
            vec![
                Action::Pause(5),
                Action::Request(ResourceId(2), 1),
                Action::Release(ResourceId(2), 1)
            ]
        );
        assert!(resolve_script(&ledger, &[Step::request("Q", 1)]).is_err());
    }

    #[test]
    fn sequential_holders_complete() {
        let task = TaskConfig {
            max_demand: vec![2],
            script: vec![Step::request("A", 2), Step::pause(5), Step::release("A", 2)],
        };
        let config = single_resource_config(ProtocolMode::Both, vec![task.clone(), task]);
        let sink = Arc::new(RecordingSink::new());

        let outcome = run_scenario(&config, sink.clone(), &RunOptions::default()).unwrap();
        match &outcome {
            RunOutcome::Completed { snapshot, .. } => {
                assert_eq!(snapshot.available, vec![2]);
                assert!(snapshot.allocated.iter().flatten().all(|&a| a == 0));
            }
            other => panic!("expected completion, got {other:?}"),
        }
        assert_eq!(outcome.label(), "completed");

        let finished = sink.matching(|e| matches!(e, ActivityEvent::TaskFinished { error: None, .. }));
        assert_eq!(finished.len(), 2);
        let dumps = sink.matching(|e| matches!(e, ActivityEvent::StateDump { .. }));
        assert_eq!(dumps.len(), 2);
        assert!(matches!(
            sink.events().last(),
            Some(ActivityEvent::RunFinished { .. })
        ));
    }

    #[test]
    fn detection_only_run_reports_deadlock() {
        // Each task grabs one unit then wants a second: both end up stuck.
        let task = TaskConfig {
            max_demand: vec![2],
            script: vec![
                Step::request("A", 1),
                Step::pause(30),
                Step::request("A", 1),
                Step::release("A", 2),
            ],
        };
        let config = single_resource_config(ProtocolMode::Detection, vec![task.clone(), task]);
        let outcome =
            run_scenario(&config, Arc::new(RecordingSink::new()), &RunOptions::default()).unwrap();
        match outcome {
            RunOutcome::Deadlocked { report, .. } => {
                assert_eq!(report.tasks, vec![TaskId(0), TaskId(1)]);
            }
            other => panic!("expected deadlock, got {other:?}"),
        }
    }

    #[test]
    fn preset_interrupt_ends_run() {
        let task = TaskConfig {
            max_demand: vec![1],
            script: vec![Step::pause(200)],
        };
        let config = single_resource_config(ProtocolMode::Avoidance, vec![task]);
        let options = RunOptions {
            jitter_ms: 0,
            interrupt: Some(Arc::new(AtomicBool::new(true))),
        };
        let outcome = run_scenario(&config, Arc::new(RecordingSink::new()), &options).unwrap();
        assert_eq!(outcome.label(), "interrupted");
    }

    #[test]
    fn invalid_config_is_rejected_before_start() {
        let mut config = Config::default();
        config.tasks.clear();
        let sink = Arc::new(RecordingSink::new());
        let err = run_scenario(&config, sink.clone(), &RunOptions::default()).unwrap_err();
        assert!(matches!(err, BankerError::InvalidConfig { .. }));
        assert!(sink.events().is_empty());
    }
}
