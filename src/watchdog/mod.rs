//! Deadlock watchdog: a thread that periodically runs the detector against
//! the live ledger while its active flag is set.

pub mod flag;
pub mod loop_main;
#[cfg(feature = "daemon")]
pub mod signals;

pub use flag::ActiveFlag;
pub use loop_main::{DeadlockReport, Watchdog, WatchdogOutcome};
#[cfg(feature = "daemon")]
pub use signals::SignalHandler;
