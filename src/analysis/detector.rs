//! Deadlock detection on the ledger as it currently stands.

#![allow(missing_docs)]

use serde::Serialize;

use crate::analysis::reduction::{CurrentState, reduce};
use crate::ledger::{ResourceLedger, TaskId};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeadlockStatus {
    /// Every task can still finish; `order` is one way they could.
    Clear { order: Vec<TaskId> },
    /// These tasks can never obtain their remaining need.
    Deadlocked { tasks: Vec<TaskId> },
}

impl DeadlockStatus {
    #[must_use]
    pub const fn is_deadlocked(&self) -> bool {
        matches!(self, Self::Deadlocked { .. })
    }
}

/// Reduce the real ledger with no hypothetical load added.
#[must_use]
pub fn detect(ledger: &ResourceLedger) -> DeadlockStatus {
    let reduction = reduce(&CurrentState(ledger), ledger.available().to_vec());
    if reduction.is_complete() {
        DeadlockStatus::Clear {
            order: reduction.order,
        }
    } else {
        DeadlockStatus::Deadlocked {
            tasks: reduction.stuck,
        }
    }
}
