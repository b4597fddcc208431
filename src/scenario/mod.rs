//! Scripted workers and the runner that drives them against one arbiter.

pub mod runner;
pub mod script;

pub use runner::{RunOptions, RunOutcome, run_scenario};
pub use script::{Step, reference_scripts};
