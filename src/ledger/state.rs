//! The owned ledger and its two mutation primitives.
//!
//! `grant` and `reclaim` move units between Available, Allocated and
//! RemainingNeed as one step: every precondition is checked before the first
//! field is touched, so a rejected call leaves the ledger exactly as it was.
//! Neither primitive re-derives safety; that is the arbiter's job.

#![allow(missing_docs)]

use std::collections::HashSet;

use crate::core::config::Config;
use crate::core::errors::{BankerError, Result};
use crate::ledger::snapshot::LedgerSnapshot;
use crate::ledger::{MAX_RESOURCE_KINDS, ResourceId, TaskId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLedger {
    labels: Vec<String>,
    total: Vec<u32>,
    available: Vec<u32>,
    max_demand: Vec<Vec<u32>>,
    allocated: Vec<Vec<u32>>,
    remaining_need: Vec<Vec<u32>>,
}

impl ResourceLedger {
    /// Build a fresh ledger: Available = Total, nothing allocated,
    /// RemainingNeed = MaxDemand.
    pub fn new(labels: Vec<String>, total: Vec<u32>, max_demand: Vec<Vec<u32>>) -> Result<Self> {
        validate_shape(&labels, &total, &max_demand)?;

        let kinds = total.len();
        let tasks = max_demand.len();
        Ok(Self {
            labels,
            available: total.clone(),
            total,
            remaining_need: max_demand.clone(),
            max_demand,
            allocated: vec![vec![0; kinds]; tasks],
        })
    }

    /// Build the starting ledger a configuration describes.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(
            config.resources.labels.clone(),
            config.resources.total.clone(),
            config.max_demand_matrix(),
        )
    }

    #[must_use]
    pub fn task_count(&self) -> usize {
        self.max_demand.len()
    }

    #[must_use]
    pub fn resource_count(&self) -> usize {
        self.total.len()
    }

    /// Iterate over every task id in index order.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + use<> {
        (0..self.task_count()).map(TaskId)
    }

    #[must_use]
    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    /// Display label of a resource kind, `"?"` when out of range.
    #[must_use]
    pub fn label(&self, resource: ResourceId) -> &str {
        self.labels.get(resource.0).map_or("?", String::as_str)
    }

    /// Look a resource kind up by its label (exact match).
    pub fn resolve_resource(&self, label: &str) -> Result<ResourceId> {
        self.labels
            .iter()
            .position(|l| l == label)
            .map(ResourceId)
            .ok_or_else(|| BankerError::UnknownResource {
                resource: label.to_string(),
                count: self.resource_count(),
            })
    }

    pub fn check_task(&self, task: TaskId) -> Result<()> {
        if task.0 < self.task_count() {
            Ok(())
        } else {
            Err(BankerError::UnknownTask {
                index: task.0,
                count: self.task_count(),
            })
        }
    }

    pub fn check_resource(&self, resource: ResourceId) -> Result<()> {
        if resource.0 < self.resource_count() {
            Ok(())
        } else {
            Err(BankerError::UnknownResource {
                resource: format!("#{}", resource.0),
                count: self.resource_count(),
            })
        }
    }

    #[must_use]
    pub fn total(&self) -> &[u32] {
        &self.total
    }

    #[must_use]
    pub fn available(&self) -> &[u32] {
        &self.available
    }

    #[must_use]
    pub fn max_demand(&self, task: TaskId) -> &[u32] {
        &self.max_demand[task.0]
    }

    #[must_use]
    pub fn allocated(&self, task: TaskId) -> &[u32] {
        &self.allocated[task.0]
    }

    #[must_use]
    pub fn remaining_need(&self, task: TaskId) -> &[u32] {
        &self.remaining_need[task.0]
    }

    /// Move `amount` units of `resource` from Available to `task`.
    pub fn grant(&mut self, task: TaskId, resource: ResourceId, amount: u32) -> Result<()> {
        self.check_task(task)?;
        self.check_resource(resource)?;
        let (t, r) = (task.0, resource.0);

        let available = self.available[r];
        if amount > available {
            return Err(BankerError::invariant(format!(
                "grant of {amount} {} to {task} exceeds available {available}",
                self.label(resource)
            )));
        }
        let need = self.remaining_need[t][r];
        if amount > need {
            return Err(BankerError::invariant(format!(
                "grant of {amount} {} to {task} exceeds remaining need {need}",
                self.label(resource)
            )));
        }

        self.available[r] = available - amount;
        self.remaining_need[t][r] = need - amount;
        self.allocated[t][r] += amount;
        Ok(())
    }

    /// Return `amount` units of `resource` held by `task` to Available.
    pub fn reclaim(&mut self, task: TaskId, resource: ResourceId, amount: u32) -> Result<()> {
        self.check_task(task)?;
        self.check_resource(resource)?;
        let (t, r) = (task.0, resource.0);

        let held = self.allocated[t][r];
        if amount > held {
            return Err(BankerError::invariant(format!(
                "{task} released {amount} {} but holds only {held}",
                self.label(resource)
            )));
        }

        self.allocated[t][r] = held - amount;
        self.remaining_need[t][r] += amount;
        self.available[r] += amount;
        Ok(())
    }

    /// Re-verify both conservation equations over the whole ledger.
    pub fn check_invariants(&self) -> Result<()> {
        for r in 0..self.resource_count() {
            let held: u64 = self.allocated.iter().map(|row| u64::from(row[r])).sum();
            let accounted = u64::from(self.available[r]) + held;
            if accounted != u64::from(self.total[r]) {
                return Err(BankerError::invariant(format!(
                    "{}: available {} + allocated {held} != total {}",
                    self.labels[r], self.available[r], self.total[r]
                )));
            }
        }
        for t in 0..self.task_count() {
            for r in 0..self.resource_count() {
                let sum = u64::from(self.allocated[t][r]) + u64::from(self.remaining_need[t][r]);
                if sum != u64::from(self.max_demand[t][r]) {
                    return Err(BankerError::invariant(format!(
                        "{} {}: allocated {} + remaining {} != max {}",
                        TaskId(t),
                        self.labels[r],
                        self.allocated[t][r],
                        self.remaining_need[t][r],
                        self.max_demand[t][r]
                    )));
                }
            }
        }
        Ok(())
    }

    /// Copy of the ledger state. `pending` carries the arbiter's blocked
    /// request amounts; `None` records zeros.
    #[must_use]
    pub fn snapshot(&self, pending: Option<&[Vec<u32>]>) -> LedgerSnapshot {
        LedgerSnapshot {
            labels: self.labels.clone(),
            total: self.total.clone(),
            available: self.available.clone(),
            max_demand: self.max_demand.clone(),
            allocated: self.allocated.clone(),
            remaining_need: self.remaining_need.clone(),
            pending: pending.map_or_else(
                || vec![vec![0; self.resource_count()]; self.task_count()],
                <[Vec<u32>]>::to_vec,
            ),
        }
    }
}

fn validate_shape(labels: &[String], total: &[u32], max_demand: &[Vec<u32>]) -> Result<()> {
    let kinds = total.len();
    if kinds == 0 || kinds > MAX_RESOURCE_KINDS {
        return Err(BankerError::InvalidConfig {
            details: format!(
                "resource kind count must be in 1..={MAX_RESOURCE_KINDS}, got {kinds}"
            ),
        });
    }
    if labels.len() != kinds {
        return Err(BankerError::InvalidConfig {
            details: format!(
                "{} resource labels for {kinds} resource kinds",
                labels.len()
            ),
        });
    }
    let mut seen = HashSet::new();
    for label in labels {
        if label.trim().is_empty() {
            return Err(BankerError::InvalidConfig {
                details: "resource labels must be non-empty".to_string(),
            });
        }
        if !seen.insert(label.as_str()) {
            return Err(BankerError::InvalidConfig {
                details: format!("duplicate resource label {label:?}"),
            });
        }
    }
    if max_demand.is_empty() {
        return Err(BankerError::InvalidConfig {
            details: "at least one task is required".to_string(),
        });
    }
    for (t, row) in max_demand.iter().enumerate() {
        if row.len() != kinds {
            return Err(BankerError::InvalidConfig {
                details: format!(
                    "max demand of {} has {} entries, expected {kinds}",
                    TaskId(t),
                    row.len()
                ),
            });
        }
        for (r, (&max, &tot)) in row.iter().zip(total).enumerate() {
            if max > tot {
                return Err(BankerError::InvalidConfig {
                    details: format!(
                        "max demand of {} for {} is {max}, exceeds total {tot}",
                        TaskId(t),
                        labels[r]
                    ),
                });
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn reference_ledger() -> ResourceLedger {
        ResourceLedger::new(
            ["A", "B", "C", "D"].map(String::from).to_vec(),
            vec![3, 3, 3, 3],
            vec![
                vec![1, 1, 1, 2],
                vec![3, 3, 0, 0],
                vec![3, 0, 0, 0],
                vec![0, 3, 3, 0],
            ],
        )
        .expect("reference ledger is valid")
    }

    #[test]
    fn fresh_ledger_starts_full() {
        let ledger = reference_ledger();
        assert_eq!(ledger.available(), ledger.total());
        for task in ledger.tasks() {
            assert!(ledger.allocated(task).iter().all(|&a| a == 0));
            assert_eq!(ledger.remaining_need(task), ledger.max_demand(task));
        }
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn grant_and_reclaim_move_units_together() {
        let mut ledger = reference_ledger();
        ledger.grant(TaskId(1), ResourceId(0), 2).unwrap();
        assert_eq!(ledger.available(), &[1, 3, 3, 3]);
        assert_eq!(ledger.allocated(TaskId(1)), &[2, 0, 0, 0]);
        assert_eq!(ledger.remaining_need(TaskId(1)), &[1, 3, 0, 0]);

        ledger.reclaim(TaskId(1), ResourceId(0), 2).unwrap();
        assert_eq!(ledger.available(), &[3, 3, 3, 3]);
        assert_eq!(ledger.remaining_need(TaskId(1)), &[3, 3, 0, 0]);
        ledger.check_invariants().unwrap();
    }

    #[test]
    fn overdrawn_grant_is_rejected_without_mutation() {
        let mut ledger = reference_ledger();
        ledger.grant(TaskId(2), ResourceId(0), 3).unwrap();
        let before = ledger.clone();
        let err = ledger.grant(TaskId(1), ResourceId(0), 1).unwrap_err();
        assert_eq!(err.code(), "BKR-2004");
        assert_eq!(ledger, before);
    }

    #[test]
    fn grant_beyond_remaining_need_is_rejected() {
        let mut ledger = reference_ledger();
        let err = ledger.grant(TaskId(0), ResourceId(0), 2).unwrap_err();
        assert!(err.to_string().contains("remaining need"));
        assert_eq!(ledger.available(), &[3, 3, 3, 3]);
    }

    #[test]
    fn reclaim_more_than_held_is_rejected() {
        let mut ledger = reference_ledger();
        ledger.grant(TaskId(3), ResourceId(1), 1).unwrap();
        let err = ledger.reclaim(TaskId(3), ResourceId(1), 2).unwrap_err();
        assert!(err.to_string().contains("holds only 1"));
        assert_eq!(ledger.allocated(TaskId(3)), &[0, 1, 0, 0]);
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut ledger = reference_ledger();
        assert!(matches!(
            ledger.grant(TaskId(4), ResourceId(0), 1),
            Err(BankerError::UnknownTask { index: 4, count: 4 })
        ));
        assert!(matches!(
            ledger.reclaim(TaskId(0), ResourceId(7), 1),
            Err(BankerError::UnknownResource { .. })
        ));
        assert!(ledger.resolve_resource("E").is_err());
        assert_eq!(ledger.resolve_resource("C").unwrap(), ResourceId(2));
    }

    #[test]
    fn max_demand_above_total_is_invalid() {
        let err = ResourceLedger::new(
            vec!["A".to_string()],
            vec![2],
            vec![vec![1], vec![3]],
        )
        .unwrap_err();
        assert!(err.to_string().contains("exceeds total"));
    }

    #[test]
    fn shape_errors_are_invalid_config() {
        let five = ["A", "B", "C", "D", "E"].map(String::from).to_vec();
        assert!(ResourceLedger::new(five, vec![1; 5], vec![vec![0; 5]]).is_err());
        assert!(ResourceLedger::new(vec![], vec![], vec![vec![]]).is_err());
        assert!(
            ResourceLedger::new(
                vec!["A".to_string(), "A".to_string()],
                vec![1, 1],
                vec![vec![0, 0]]
            )
            .is_err()
        );
        assert!(ResourceLedger::new(vec!["A".to_string()], vec![1], vec![]).is_err());
        assert!(ResourceLedger::new(vec!["A".to_string()], vec![1], vec![vec![0, 0]]).is_err());
    }

    #[test]
    fn default_config_builds_reference_ledger() {
        let ledger = ResourceLedger::from_config(&Config::default()).unwrap();
        assert_eq!(ledger, reference_ledger());
    }

    #[test]
    fn snapshot_defaults_pending_to_zero() {
        let ledger = reference_ledger();
        let snap = ledger.snapshot(None);
        assert_eq!(snap.pending, vec![vec![0; 4]; 4]);
        assert_eq!(snap.total, vec![3, 3, 3, 3]);
    }

    #[derive(Debug, Clone)]
    enum Op {
        Grant(usize, usize, u32),
        Reclaim(usize, usize, u32),
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..4, 0usize..4, 0u32..4).prop_map(|(t, r, a)| Op::Grant(t, r, a)),
            (0usize..4, 0usize..4, 0u32..4).prop_map(|(t, r, a)| Op::Reclaim(t, r, a)),
        ]
    }

    proptest! {
        #[test]
        fn conservation_holds_after_every_operation(ops in prop::collection::vec(op_strategy(), 0..64)) {
            let mut ledger = reference_ledger();
            for op in ops {
                let before = ledger.clone();
                let result = match op {
                    Op::Grant(t, r, a) => ledger.grant(TaskId(t), ResourceId(r), a),
                    Op::Reclaim(t, r, a) => ledger.reclaim(TaskId(t), ResourceId(r), a),
                };
                if result.is_err() {
                    prop_assert_eq!(&ledger, &before);
                }
                prop_assert!(ledger.check_invariants().is_ok());
            }
        }
    }
}
