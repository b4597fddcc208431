//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use banker_sim::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{BankerError, Result};

// Ledger
pub use crate::ledger::{LedgerSnapshot, ResourceId, ResourceLedger, TaskId};

// Analysis
pub use crate::analysis::{
    DeadlockStatus, SafetyVerdict, UnsafeReason, check_availability, check_request, detect,
};

// Protocol
pub use crate::protocol::{ArbiterOptions, GrantReport, ProtocolMode, ResourceArbiter};

// Logging
pub use crate::logger::activity::{
    ActivityEvent, ActivityLoggerHandle, ActivitySink, NullSink, RecordingSink,
};

// Watchdog
pub use crate::watchdog::{ActiveFlag, DeadlockReport, Watchdog, WatchdogOutcome};

// Scenario
pub use crate::scenario::{RunOptions, RunOutcome, Step, run_scenario};
