//! Activity logging: the write-only collaborator the arbiter, watchdog and
//! runner report status lines to.
//!
//! Architecture: a dedicated logger thread owns the console writer and the
//! optional `JsonlWriter`. Producers send `ActivityEvent`s over a bounded
//! crossbeam channel with `try_send()`, so a worker holding the ledger lock
//! is never blocked by logging back-pressure.

#![allow(missing_docs)]

use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::Mutex;

use crate::core::errors::{BankerError, Result};
use crate::ledger::{LedgerSnapshot, TaskId};
use crate::logger::jsonl::{EventType, JsonlWriter, LogEntry, Severity};

// ──────────────────── channel capacity ────────────────────

const CHANNEL_CAPACITY: usize = 1024;

// ──────────────────── events ────────────────────

/// Everything the simulator reports. Resource fields carry display labels.
#[derive(Debug, Clone, PartialEq)]
pub enum ActivityEvent {
    RunStarted {
        mode: String,
        config_hash: String,
        tasks: usize,
    },
    StateDump {
        label: String,
        snapshot: LedgerSnapshot,
    },
    TaskStarted {
        task: TaskId,
    },
    TaskFinished {
        task: TaskId,
        error: Option<String>,
    },
    RequestEvaluated {
        task: TaskId,
        resource: String,
        amount: u32,
        safe: bool,
    },
    RequestWaiting {
        task: TaskId,
        resource: String,
        amount: u32,
        bounded: bool,
    },
    WaitTimedOut {
        task: TaskId,
        resource: String,
        amount: u32,
    },
    Granted {
        task: TaskId,
        resource: String,
        amount: u32,
        waits: u32,
    },
    Released {
        task: TaskId,
        resource: String,
        amount: u32,
    },
    DeadlockCheck {
        poll: u64,
        deadlocked: bool,
    },
    DeadlockDetected {
        tasks: Vec<TaskId>,
    },
    WatchdogStopped {
        polls: u64,
    },
    RunFinished {
        outcome: String,
        elapsed_ms: u64,
    },
    Warning {
        message: String,
    },
    /// Sentinel asking the logger thread to flush and exit.
    Shutdown,
}

impl ActivityEvent {
    /// The worker task the event belongs to, if any.
    #[must_use]
    pub const fn task(&self) -> Option<TaskId> {
        match self {
            Self::TaskStarted { task }
            | Self::TaskFinished { task, .. }
            | Self::RequestEvaluated { task, .. }
            | Self::RequestWaiting { task, .. }
            | Self::WaitTimedOut { task, .. }
            | Self::Granted { task, .. }
            | Self::Released { task, .. } => Some(*task),
            _ => None,
        }
    }

    /// Human-readable status line. `None` for events that print nothing.
    #[must_use]
    pub fn status_line(&self) -> Option<String> {
        let line = match self {
            Self::RunStarted { mode, tasks, .. } => {
                format!("run started: {tasks} tasks, mode {mode}")
            }
            Self::StateDump { label, snapshot } => {
                format!("{label} resource state:\n{}", snapshot.render().trim_end())
            }
            Self::TaskStarted { task } => format!("{task}: started"),
            Self::TaskFinished { task, error: None } => format!("{task}: exited normally"),
            Self::TaskFinished {
                task,
                error: Some(e),
            } => format!("{task}: exited abnormally: {e}"),
            Self::RequestEvaluated {
                task,
                resource,
                amount,
                safe,
            } => format!(
                "{task}: is \"allocate({resource}, {amount})\" safe? : {}",
                if *safe { "yes" } else { "no" }
            ),
            Self::RequestWaiting {
                task,
                resource,
                amount,
                ..
            } => format!("{task}: waiting to allocate({resource}, {amount})"),
            Self::WaitTimedOut {
                task,
                resource,
                amount,
            } => format!("{task}: still waiting to allocate({resource}, {amount})"),
            Self::Granted {
                task,
                resource,
                amount,
                ..
            } => format!("{task}: allocate({resource}, {amount})"),
            Self::Released {
                task,
                resource,
                amount,
            } => format!("{task}: release({resource}, {amount})"),
            Self::DeadlockCheck { deadlocked, .. } => format!(
                "watchdog: deadlock detected? : {}",
                if *deadlocked { "yes" } else { "no" }
            ),
            Self::DeadlockDetected { tasks } => {
                format!("watchdog: Deadlock detected! blocked: {}", join_tasks(tasks))
            }
            Self::WatchdogStopped { polls } => format!("watchdog: stopped after {polls} polls"),
            Self::RunFinished {
                outcome,
                elapsed_ms,
            } => format!("run finished: {outcome} after {elapsed_ms} ms"),
            Self::Warning { message } => format!("warning: {message}"),
            Self::Shutdown => return None,
        };
        Some(line)
    }
}

fn join_tasks(tasks: &[TaskId]) -> String {
    tasks
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

// ──────────────────── sinks ────────────────────

/// Write-only receiver of activity events.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn record(&self, _event: ActivityEvent) {}
}

/// Keeps every event in memory; used by tests and embedders that inspect
/// the activity stream after a run.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<ActivityEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn events(&self) -> Vec<ActivityEvent> {
        self.events.lock().clone()
    }

    /// Events satisfying `pred`.
    pub fn matching(&self, pred: impl Fn(&ActivityEvent) -> bool) -> Vec<ActivityEvent> {
        self.events.lock().iter().filter(|e| pred(e)).cloned().collect()
    }
}

impl ActivitySink for RecordingSink {
    fn record(&self, event: ActivityEvent) {
        self.events.lock().push(event);
    }
}

// ──────────────────── channel handle ────────────────────

/// Thread-safe, cheaply-cloneable handle feeding the logger thread.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// Send an event to the logger thread. Non-blocking; a full channel
    /// drops the event and bumps the dropped counter.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Ask the logger thread to flush and exit. Blocks until the sentinel
    /// is queued so it is never lost to back-pressure.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

impl ActivitySink for ActivityLoggerHandle {
    fn record(&self, event: ActivityEvent) {
        self.send(event);
    }
}

// ──────────────────── configuration ────────────────────

/// Decorates a console line, e.g. with a per-task color.
pub type LineDecorator = fn(Option<TaskId>, &str) -> String;

pub struct ActivityLoggerConfig {
    /// Print status lines to stdout.
    pub console: bool,
    /// Also write JSONL entries here.
    pub jsonl_path: Option<PathBuf>,
    pub channel_capacity: usize,
    pub decorator: Option<LineDecorator>,
}

impl Default for ActivityLoggerConfig {
    fn default() -> Self {
        Self {
            console: true,
            jsonl_path: None,
            channel_capacity: CHANNEL_CAPACITY,
            decorator: None,
        }
    }
}

// ──────────────────── spawn ────────────────────

/// Spawn the logger thread and return a handle to it.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let join = thread::Builder::new()
        .name("banker-logger".to_string())
        .spawn(move || logger_thread_main(&rx, &config, &dropped))
        .map_err(|e| BankerError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(
    rx: &Receiver<ActivityEvent>,
    config: &ActivityLoggerConfig,
    dropped: &AtomicU64,
) {
    let mut jsonl = config.jsonl_path.as_ref().map(JsonlWriter::open);

    while let Ok(event) = rx.recv() {
        let d = dropped.swap(0, Ordering::Relaxed);
        if d > 0 {
            let warning = ActivityEvent::Warning {
                message: format!("{d} log events dropped due to back-pressure"),
            };
            emit(&warning, config, jsonl.as_mut());
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        emit(&event, config, jsonl.as_mut());
    }

    if let Some(writer) = jsonl.as_mut() {
        writer.flush();
    }
    let _ = io::stdout().flush();
}

fn emit(event: &ActivityEvent, config: &ActivityLoggerConfig, jsonl: Option<&mut JsonlWriter>) {
    if config.console
        && let Some(line) = event.status_line()
    {
        let line = match config.decorator {
            Some(decorate) => decorate(event.task(), &line),
            None => line,
        };
        let mut out = io::stdout().lock();
        let _ = writeln!(out, "{line}");
    }
    if let Some(writer) = jsonl {
        writer.write_entry(&event_to_log_entry(event));
    }
}

// ──────────────────── event conversion ────────────────────

#[allow(clippy::too_many_lines)]
fn event_to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::RunStarted {
            mode,
            config_hash,
            tasks,
        } => {
            let mut e = LogEntry::new(EventType::RunStart, Severity::Info);
            e.details = Some(format!("mode={mode} tasks={tasks} config_hash={config_hash}"));
            e
        }
        ActivityEvent::StateDump { label, snapshot } => {
            let mut e = LogEntry::new(EventType::StateDump, Severity::Info);
            e.details = Some(label.clone());
            e.snapshot = Some(snapshot.clone());
            e
        }
        ActivityEvent::TaskStarted { task } => {
            let mut e = LogEntry::new(EventType::TaskStart, Severity::Info);
            e.task = Some(task.to_string());
            e
        }
        ActivityEvent::TaskFinished { task, error } => {
            let severity = if error.is_some() {
                Severity::Critical
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::TaskFinish, severity);
            e.task = Some(task.to_string());
            e.outcome = Some(if error.is_some() { "failed" } else { "ok" }.to_string());
            e.details.clone_from(error);
            e
        }
        ActivityEvent::RequestEvaluated {
            task,
            resource,
            amount,
            safe,
        } => {
            let mut e = request_entry(EventType::RequestEvaluated, *task, resource, *amount);
            e.outcome = Some(if *safe { "safe" } else { "unsafe" }.to_string());
            e
        }
        ActivityEvent::RequestWaiting {
            task,
            resource,
            amount,
            bounded,
        } => {
            let mut e = request_entry(EventType::RequestWait, *task, resource, *amount);
            e.outcome = Some(if *bounded { "timed_wait" } else { "wait" }.to_string());
            e
        }
        ActivityEvent::WaitTimedOut {
            task,
            resource,
            amount,
        } => {
            let mut e = request_entry(EventType::WaitTimeout, *task, resource, *amount);
            e.severity = Severity::Warning;
            e.outcome = Some("still_waiting".to_string());
            e
        }
        ActivityEvent::Granted {
            task,
            resource,
            amount,
            waits,
        } => {
            let mut e = request_entry(EventType::Grant, *task, resource, *amount);
            e.outcome = Some("granted".to_string());
            e.waits = Some(*waits);
            e
        }
        ActivityEvent::Released {
            task,
            resource,
            amount,
        } => {
            let mut e = request_entry(EventType::Release, *task, resource, *amount);
            e.outcome = Some("released".to_string());
            e
        }
        ActivityEvent::DeadlockCheck { poll, deadlocked } => {
            let mut e = LogEntry::new(EventType::DeadlockCheck, Severity::Info);
            e.task = Some("watchdog".to_string());
            e.outcome = Some(if *deadlocked { "deadlocked" } else { "clear" }.to_string());
            e.details = Some(format!("poll={poll}"));
            e
        }
        ActivityEvent::DeadlockDetected { tasks } => {
            let mut e = LogEntry::new(EventType::DeadlockDetected, Severity::Critical);
            e.task = Some("watchdog".to_string());
            e.outcome = Some("deadlocked".to_string());
            e.details = Some(join_tasks(tasks));
            e
        }
        ActivityEvent::WatchdogStopped { polls } => {
            let mut e = LogEntry::new(EventType::WatchdogStop, Severity::Info);
            e.task = Some("watchdog".to_string());
            e.details = Some(format!("polls={polls}"));
            e
        }
        ActivityEvent::RunFinished {
            outcome,
            elapsed_ms,
        } => {
            let mut e = LogEntry::new(EventType::RunFinish, Severity::Info);
            e.outcome = Some(outcome.clone());
            e.details = Some(format!("elapsed_ms={elapsed_ms}"));
            e
        }
        ActivityEvent::Warning { message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Warning);
            e.details = Some(message.clone());
            e
        }
        ActivityEvent::Shutdown => LogEntry::new(EventType::RunFinish, Severity::Info),
    }
}

fn request_entry(event: EventType, task: TaskId, resource: &str, amount: u32) -> LogEntry {
    let mut e = LogEntry::new(event, Severity::Info);
    e.task = Some(task.to_string());
    e.resource = Some(resource.to_string());
    e.amount = Some(amount);
    e
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_lines_carry_task_action_resource_amount() {
        let granted = ActivityEvent::Granted {
            task: TaskId(1),
            resource: "A".to_string(),
            amount: 2,
            waits: 0,
        };
        assert_eq!(granted.status_line().unwrap(), "T2: allocate(A, 2)");
        assert_eq!(granted.task(), Some(TaskId(1)));

        let evaluated = ActivityEvent::RequestEvaluated {
            task: TaskId(0),
            resource: "D".to_string(),
            amount: 2,
            safe: false,
        };
        assert_eq!(
            evaluated.status_line().unwrap(),
            "T1: is \"allocate(D, 2)\" safe? : no"
        );

        let detected = ActivityEvent::DeadlockDetected {
            tasks: vec![TaskId(0), TaskId(2)],
        };
        assert!(detected.status_line().unwrap().contains("T1, T3"));
        assert_eq!(detected.task(), None);
        assert!(ActivityEvent::Shutdown.status_line().is_none());
    }

    #[test]
    fn recording_sink_keeps_order() {
        let sink = RecordingSink::new();
        sink.record(ActivityEvent::TaskStarted { task: TaskId(0) });
        sink.record(ActivityEvent::TaskStarted { task: TaskId(1) });
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].task(), Some(TaskId(1)));
        assert_eq!(
            sink.matching(|e| e.task() == Some(TaskId(0))).len(),
            1
        );
    }

    #[test]
    fn log_entry_conversion_fills_request_fields() {
        let entry = event_to_log_entry(&ActivityEvent::WaitTimedOut {
            task: TaskId(3),
            resource: "B".to_string(),
            amount: 1,
        });
        assert_eq!(entry.event, EventType::WaitTimeout);
        assert_eq!(entry.severity, Severity::Warning);
        assert_eq!(entry.task.as_deref(), Some("T4"));
        assert_eq!(entry.resource.as_deref(), Some("B"));
        assert_eq!(entry.amount, Some(1));
    }

    #[test]
    fn logger_thread_writes_jsonl_and_exits_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("activity.jsonl");
        let (handle, join) = spawn_logger(ActivityLoggerConfig {
            console: false,
            jsonl_path: Some(path.clone()),
            ..ActivityLoggerConfig::default()
        })
        .unwrap();

        handle.record(ActivityEvent::Released {
            task: TaskId(2),
            resource: "A".to_string(),
            amount: 3,
        });
        handle.record(ActivityEvent::DeadlockCheck {
            poll: 1,
            deadlocked: false,
        });
        handle.shutdown();
        join.join().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["event"], "release");
        assert_eq!(lines[0]["task"], "T3");
        assert_eq!(lines[1]["outcome"], "clear");
        assert_eq!(handle.dropped_events(), 0);
    }

    #[test]
    fn full_channel_drops_and_counts_instead_of_blocking() {
        let (tx, rx) = bounded(1);
        let handle = ActivityLoggerHandle {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        };
        for poll in 1..=3 {
            handle.record(ActivityEvent::DeadlockCheck {
                poll,
                deadlocked: false,
            });
        }
        assert_eq!(handle.dropped_events(), 2);
        assert!(matches!(
            rx.try_recv(),
            Ok(ActivityEvent::DeadlockCheck { poll: 1, .. })
        ));
        assert!(rx.try_recv().is_err());
    }
}
