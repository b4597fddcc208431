//! Safety check for a prospective grant.

#![allow(missing_docs)]

use serde::Serialize;

use crate::analysis::reduction::{TentativeGrant, reduce};
use crate::ledger::{ResourceId, ResourceLedger, TaskId};

/// Why a request cannot be granted right now.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UnsafeReason {
    /// Fewer units are free than requested.
    Unavailable { requested: u32, available: u32 },
    /// Granting would leave these tasks with no finishing order.
    NoSafeSequence { stuck: Vec<TaskId> },
}

/// Outcome of evaluating one request against a ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "verdict", rename_all = "snake_case")]
pub enum SafetyVerdict {
    /// Grantable. `order` is a finishing order that proves it; it is empty
    /// when only physical availability was checked.
    Safe { order: Vec<TaskId> },
    Unsafe { reason: UnsafeReason },
}

impl SafetyVerdict {
    #[must_use]
    pub const fn is_safe(&self) -> bool {
        matches!(self, Self::Safe { .. })
    }

    /// Short word used in status lines.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Safe { .. } => "yes",
            Self::Unsafe { .. } => "no",
        }
    }
}

fn physically_unavailable(
    ledger: &ResourceLedger,
    resource: ResourceId,
    amount: u32,
) -> Option<SafetyVerdict> {
    let available = ledger.available()[resource.0];
    (amount > available).then_some(SafetyVerdict::Unsafe {
        reason: UnsafeReason::Unavailable {
            requested: amount,
            available,
        },
    })
}

/// Would granting `amount` units of `resource` to `task` leave a safe state?
///
/// Ids must already be validated against the ledger. The real ledger is only
/// read; the grant is simulated on a private work vector.
#[must_use]
pub fn check_request(
    ledger: &ResourceLedger,
    task: TaskId,
    resource: ResourceId,
    amount: u32,
) -> SafetyVerdict {
    if let Some(verdict) = physically_unavailable(ledger, resource, amount) {
        return verdict;
    }

    let mut work = ledger.available().to_vec();
    work[resource.0] -= amount;

    let view = TentativeGrant {
        ledger,
        task,
        resource,
        amount,
    };
    let reduction = reduce(&view, work);
    if reduction.is_complete() {
        SafetyVerdict::Safe {
            order: reduction.order,
        }
    } else {
        SafetyVerdict::Unsafe {
            reason: UnsafeReason::NoSafeSequence {
                stuck: reduction.stuck,
            },
        }
    }
}

/// Availability-only check used when avoidance is switched off: optimistic
/// about safety, but a grant can never overdraw Available.
#[must_use]
pub fn check_availability(
    ledger: &ResourceLedger,
    resource: ResourceId,
    amount: u32,
) -> SafetyVerdict {
    physically_unavailable(ledger, resource, amount)
        .unwrap_or(SafetyVerdict::Safe { order: Vec::new() })
}
