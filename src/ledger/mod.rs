//! Resource ledger: the Total/Available/Allocated/MaxDemand/RemainingNeed
//! bookkeeping shared by every task, plus identifiers and snapshots.

pub mod snapshot;
pub mod state;

use std::fmt;

use serde::{Deserialize, Serialize};

pub use snapshot::LedgerSnapshot;
pub use state::ResourceLedger;

/// Upper bound on distinct resource kinds a ledger may track.
pub const MAX_RESOURCE_KINDS: usize = 4;

/// Index of a worker task. Displayed one-based (`T1`, `T2`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

impl TaskId {
    /// Zero-based index into the ledger rows.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0 + 1)
    }
}

/// Index of a resource kind. Human-facing output uses the ledger's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceId(pub usize);

impl ResourceId {
    /// Zero-based index into the ledger columns.
    #[must_use]
    pub const fn index(self) -> usize {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_ids_display_one_based() {
        assert_eq!(TaskId(0).to_string(), "T1");
        assert_eq!(TaskId(3).to_string(), "T4");
    }

    #[test]
    fn ids_serialize_as_plain_indices() {
        assert_eq!(serde_json::to_string(&TaskId(2)).unwrap(), "2");
        assert_eq!(serde_json::to_string(&ResourceId(1)).unwrap(), "1");
    }
}
