//! Library-level scenarios with real worker threads: the reference request
//! sequence, blocking on unsafe requests, watchdog detection, and repeated
//! jittered runs that must never hang.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use banker_sim::core::config::{Config, ResourcesConfig, TaskConfig};
use banker_sim::ledger::{ResourceId, ResourceLedger, TaskId};
use banker_sim::logger::activity::{
    ActivityEvent, ActivityLoggerConfig, RecordingSink, spawn_logger,
};
use banker_sim::protocol::{ArbiterOptions, ProtocolMode, ResourceArbiter};
use banker_sim::scenario::{RunOptions, RunOutcome, Step, run_scenario};
use banker_sim::watchdog::{ActiveFlag, Watchdog, WatchdogOutcome};

const A: ResourceId = ResourceId(0);
const B: ResourceId = ResourceId(1);
const C: ResourceId = ResourceId(2);
const D: ResourceId = ResourceId(3);
const T1: TaskId = TaskId(0);
const T2: TaskId = TaskId(1);
const T3: TaskId = TaskId(2);
const T4: TaskId = TaskId(3);

fn reference_arbiter(mode: ProtocolMode) -> (Arc<ResourceArbiter>, Arc<RecordingSink>) {
    let sink = Arc::new(RecordingSink::new());
    let ledger = ResourceLedger::from_config(&Config::default()).expect("reference ledger");
    let options = ArbiterOptions {
        mode,
        ..ArbiterOptions::default()
    };
    (
        Arc::new(ResourceArbiter::new(ledger, options, sink.clone())),
        sink,
    )
}

fn wait_until(what: &str, pred: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while !pred() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}

fn is_pending(arbiter: &ResourceArbiter, task: TaskId, resource: ResourceId) -> bool {
    arbiter.inspect(|_, pending| pending[task.index()][resource.index()] > 0)
}

#[test]
fn reference_sequence_grants_safely_and_never_deadlocks() {
    let (arbiter, _) = reference_arbiter(ProtocolMode::Both);

    arbiter.request(T2, A, 2).expect("T2 A2");
    arbiter.request(T2, B, 3).expect("T2 B3");

    // T2 holds every unit of B, so T4 waits for it.
    let t4 = {
        let arbiter = Arc::clone(&arbiter);
        thread::spawn(move || arbiter.request(T4, B, 2))
    };
    wait_until("T4 to wait for B", || is_pending(&arbiter, T4, B));
    assert!(!arbiter.detect().is_deadlocked());

    arbiter.release(T2, A, 2).expect("T2 releases A");
    arbiter.release(T2, B, 3).expect("T2 releases B");
    let report = t4.join().expect("T4 thread").expect("T4 B2");
    assert!(report.waits >= 1);

    arbiter.request(T4, C, 3).expect("T4 C3");
    arbiter.request(T1, A, 1).expect("T1 A1");
    arbiter.request(T1, D, 2).expect("T1 D2");

    arbiter.inspect(|ledger, pending| {
        ledger.check_invariants().expect("invariants");
        assert_eq!(ledger.available(), &[2, 1, 0, 1]);
        assert!(pending.iter().flatten().all(|&p| p == 0));
    });
    assert!(!arbiter.detect().is_deadlocked());
}

#[test]
fn unsafe_request_waits_for_the_holder_to_release() {
    let (arbiter, sink) = reference_arbiter(ProtocolMode::Avoidance);
    arbiter.request(T2, A, 2).expect("T2 A2");

    let t3 = {
        let arbiter = Arc::clone(&arbiter);
        thread::spawn(move || arbiter.request(T3, A, 1))
    };
    wait_until("T3 to wait for A", || is_pending(&arbiter, T3, A));

    // Nothing has moved while T3 waits.
    let snapshot = arbiter.snapshot();
    assert_eq!(snapshot.available, vec![1, 3, 3, 3]);
    assert_eq!(snapshot.waiting_tasks(), vec![T3]);

    arbiter.release(T2, A, 2).expect("T2 releases A");
    t3.join().expect("T3 thread").expect("T3 A1");
    assert_eq!(arbiter.snapshot().allocated[T3.index()], vec![1, 0, 0, 0]);

    let first_verdict = sink
        .events()
        .into_iter()
        .find_map(|e| match e {
            ActivityEvent::RequestEvaluated { task, safe, .. } if task == T3 => Some(safe),
            _ => None,
        });
    assert_eq!(first_verdict, Some(false));
}

#[test]
fn detection_only_mode_lets_the_watchdog_find_the_deadlock() {
    let (arbiter, _) = reference_arbiter(ProtocolMode::Detection);
    arbiter.request(T2, A, 2).expect("T2 A2");
    arbiter.request(T3, A, 1).expect("T3 A1 granted without avoidance");

    let flag = Arc::new(ActiveFlag::new(true));
    let watchdog = Watchdog::new(
        Arc::clone(&arbiter),
        Arc::clone(&flag),
        Duration::from_millis(10),
        Arc::new(RecordingSink::new()),
    )
    .spawn()
    .expect("spawn watchdog");

    match watchdog.join().expect("watchdog thread") {
        WatchdogOutcome::Deadlocked(report) => {
            assert_eq!(report.tasks, vec![T1, T2, T3]);
        }
        other => panic!("expected deadlock, got {other:?}"),
    }
}

#[test]
fn reference_scenario_runs_to_completion() {
    let mut config = Config::default();
    config.watchdog.poll_interval_ms = 10;
    config.logging.console = false;
    let sink = Arc::new(RecordingSink::new());

    let outcome = run_scenario(&config, sink.clone(), &RunOptions::default()).expect("run");
    match outcome {
        RunOutcome::Completed { snapshot, .. } => {
            assert_eq!(snapshot.available, snapshot.total);
            assert_eq!(snapshot.remaining_need, snapshot.max_demand);
        }
        other => panic!("expected completion, got {other:?}"),
    }
    assert!(
        sink.matching(|e| matches!(e, ActivityEvent::DeadlockDetected { .. }))
            .is_empty()
    );
    assert_eq!(
        sink.matching(|e| matches!(e, ActivityEvent::TaskFinished { error: None, .. }))
            .len(),
        4
    );
}

#[test]
fn crossed_claims_without_avoidance_end_in_deadlock() {
    // Each task takes one kind and then wants the other.
    let script = |first: &str, second: &str| {
        vec![
            Step::request(first, 1),
            Step::pause(30),
            Step::request(second, 1),
            Step::release(first, 1),
            Step::release(second, 1),
        ]
    };
    let mut config = Config {
        resources: ResourcesConfig {
            labels: vec!["X".to_string(), "Y".to_string()],
            total: vec![1, 1],
        },
        tasks: vec![
            TaskConfig {
                max_demand: vec![1, 1],
                script: script("X", "Y"),
            },
            TaskConfig {
                max_demand: vec![1, 1],
                script: script("Y", "X"),
            },
        ],
        ..Config::default()
    };
    config.protocol.mode = ProtocolMode::Detection;
    config.watchdog.poll_interval_ms = 10;

    let outcome =
        run_scenario(&config, Arc::new(RecordingSink::new()), &RunOptions::default()).expect("run");
    match outcome {
        RunOutcome::Deadlocked { report, .. } => {
            assert_eq!(report.tasks, vec![T1, T2]);
            assert_eq!(report.snapshot.available, vec![0, 0]);
        }
        other => panic!("expected deadlock, got {other:?}"),
    }
}

#[test]
fn same_claims_with_avoidance_complete() {
    // Releasing in reverse order hands X straight to the waiting task.
    let script = |first: &str, second: &str| {
        vec![
            Step::request(first, 1),
            Step::pause(10),
            Step::request(second, 1),
            Step::release(second, 1),
            Step::release(first, 1),
        ]
    };
    let mut config = Config {
        resources: ResourcesConfig {
            labels: vec!["X".to_string(), "Y".to_string()],
            total: vec![1, 1],
        },
        tasks: vec![
            TaskConfig {
                max_demand: vec![1, 1],
                script: script("X", "Y"),
            },
            TaskConfig {
                max_demand: vec![1, 1],
                script: script("X", "Y"),
            },
        ],
        ..Config::default()
    };
    config.protocol.mode = ProtocolMode::Both;
    config.watchdog.poll_interval_ms = 10;

    let outcome =
        run_scenario(&config, Arc::new(RecordingSink::new()), &RunOptions::default()).expect("run");
    assert_eq!(outcome.label(), "completed");
}

#[test]
fn run_writes_jsonl_activity_log() {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("logs").join("run.jsonl");

    let mut config = Config::default();
    config.logging.console = false;
    config.watchdog.poll_interval_ms = 10;

    let (logger, join) = spawn_logger(ActivityLoggerConfig {
        console: false,
        jsonl_path: Some(path.clone()),
        ..ActivityLoggerConfig::default()
    })
    .expect("spawn logger");
    let outcome = run_scenario(&config, Arc::new(logger.clone()), &RunOptions::default())
        .expect("run");
    logger.shutdown();
    join.join().expect("logger thread");
    assert_eq!(outcome.label(), "completed");

    let contents = std::fs::read_to_string(&path).expect("read jsonl");
    let events: Vec<serde_json::Value> = contents
        .lines()
        .map(|l| serde_json::from_str(l).expect("json line"))
        .collect();
    assert_eq!(events.first().map(|e| e["event"].clone()), Some("run_start".into()));
    assert_eq!(events.last().map(|e| e["event"].clone()), Some("run_finish".into()));
    assert!(events.iter().any(|e| e["event"] == "grant" && e["task"] == "T2"));
    assert!(
        events
            .iter()
            .any(|e| e["event"] == "state_dump" && e["snapshot"]["total"] == serde_json::json!([3, 3, 3, 3]))
    );
}

#[test]
fn jittered_reference_runs_never_hang() {
    // Short first waits leave most blocked requests parked without a
    // deadline; only releases can get them going again.
    for mode in [ProtocolMode::Both, ProtocolMode::Avoidance] {
        for round in 0..10 {
            let mut config = Config::default();
            config.protocol.mode = mode;
            config.protocol.first_wait_timeout_ms = 50;
            config.watchdog.poll_interval_ms = 10;
            config.logging.console = false;
            let options = RunOptions {
                jitter_ms: 20,
                interrupt: None,
            };

            let (tx, rx) = crossbeam_channel::bounded(1);
            thread::spawn(move || {
                let outcome = run_scenario(&config, Arc::new(RecordingSink::new()), &options);
                let _ = tx.send(outcome.map(|o| o.label()));
            });
            let label = rx
                .recv_timeout(Duration::from_secs(10))
                .unwrap_or_else(|_| panic!("{mode} run {round} hung"))
                .expect("run");
            assert_eq!(label, "completed", "{mode} run {round}");
        }
    }
}
