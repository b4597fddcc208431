//! Allocation/release protocol: one lock over the ledger, a release channel
//! per resource kind, and a wait-until-safe loop for requests.

pub mod arbiter;
pub mod signals;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

pub use arbiter::{ArbiterOptions, ArbiterState, GrantReport, ResourceArbiter};
pub use signals::{CondvarSignals, ReleaseSignal, WakeReason};

/// Which of the two algorithms are active for a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtocolMode {
    /// Grant only requests that keep the state safe; no watchdog.
    Avoidance,
    /// Grant whatever is physically available; the watchdog reports deadlock.
    Detection,
    /// Safety-checked grants and a watchdog.
    Both,
}

impl ProtocolMode {
    /// Whether requests go through the safety check.
    #[must_use]
    pub const fn avoids(self) -> bool {
        matches!(self, Self::Avoidance | Self::Both)
    }

    /// Whether a watchdog should run.
    #[must_use]
    pub const fn detects(self) -> bool {
        matches!(self, Self::Detection | Self::Both)
    }

    /// Lowercase name, as accepted in config files and `--mode`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Avoidance => "avoidance",
            Self::Detection => "detection",
            Self::Both => "both",
        }
    }
}

impl fmt::Display for ProtocolMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProtocolMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "avoidance" => Ok(Self::Avoidance),
            "detection" => Ok(Self::Detection),
            "both" => Ok(Self::Both),
            other => Err(format!(
                "unknown protocol mode {other:?} (expected avoidance, detection or both)"
            )),
        }
    }
}
