//! Point-in-time copy of the ledger for diagnostics and state dumps.

#![allow(missing_docs)]

use std::fmt::{self, Write as _};

use serde::{Deserialize, Serialize};

use crate::ledger::TaskId;

/// Serializable copy of every ledger vector and matrix, plus the amounts
/// blocked requests are waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    pub labels: Vec<String>,
    pub total: Vec<u32>,
    pub available: Vec<u32>,
    pub max_demand: Vec<Vec<u32>>,
    pub allocated: Vec<Vec<u32>>,
    pub remaining_need: Vec<Vec<u32>>,
    pub pending: Vec<Vec<u32>>,
}

impl LedgerSnapshot {
    /// Tasks with a non-zero pending request, in index order.
    #[must_use]
    pub fn waiting_tasks(&self) -> Vec<TaskId> {
        self.pending
            .iter()
            .enumerate()
            .filter(|(_, row)| row.iter().any(|&p| p > 0))
            .map(|(t, _)| TaskId(t))
            .collect()
    }

    /// Multi-line table rendering used by the state dumps.
    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        let header: String = self.labels.iter().map(|l| format!("{l:>4}")).collect();

        let _ = writeln!(out, "{:<16}{header}", "");
        push_vector(&mut out, "total", &self.total);
        push_vector(&mut out, "available", &self.available);

        for (title, matrix) in [
            ("max demand", &self.max_demand),
            ("allocated", &self.allocated),
            ("remaining need", &self.remaining_need),
        ] {
            let _ = writeln!(out, "{title}:");
            for (t, row) in matrix.iter().enumerate() {
                push_vector(&mut out, &format!("  {}", TaskId(t)), row);
            }
        }

        let waiting = self.waiting_tasks();
        if !waiting.is_empty() {
            let _ = writeln!(out, "pending:");
            for task in waiting {
                push_vector(&mut out, &format!("  {task}"), &self.pending[task.0]);
            }
        }
        out
    }
}

impl fmt::Display for LedgerSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render())
    }
}

fn push_vector(out: &mut String, name: &str, values: &[u32]) {
    let cells: String = values.iter().map(|v| format!("{v:>4}")).collect();
    let _ = writeln!(out, "{name:<16}{cells}");
}
