#![forbid(unsafe_code)]

//! banker_sim: a Banker's Algorithm resource arbiter with a deadlock
//! watchdog, driven by scripted worker threads.
//!
//! Layers, leaves first:
//! 1. **Ledger**: Total, Available, Allocated, MaxDemand and RemainingNeed,
//!    changed only through `grant` and `reclaim`
//! 2. **Analysis**: one reducibility kernel shared by the safety check and
//!    the deadlock detector
//! 3. **Protocol**: the arbiter: a single lock, a release channel per
//!    resource kind, and a wait-until-safe request loop
//! 4. **Watchdog**: periodic deadlock detection under its own active flag
//!
//! # Library usage
//!
//! Use the [`prelude`] for convenient access to the most common types:
//!
//! ```rust,no_run
//! use banker_sim::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use banker_sim::core::config::Config;
//! use banker_sim::scenario::{RunOptions, run_scenario};
//! ```

pub mod prelude;

pub mod analysis;
pub mod core;
pub mod ledger;
pub mod logger;
pub mod protocol;
pub mod scenario;
pub mod watchdog;
