//! The reducibility kernel shared by the safety check and the deadlock detector.
//!
//! Starting from a work vector, repeatedly finish any unfinished task whose
//! need fits entrywise in the work vector, adding that task's contribution
//! back into it. The pass order is task-index ascending; it only changes
//! which finishing order is reported, never whether one exists.

#![allow(missing_docs)]

use crate::ledger::{ResourceId, ResourceLedger, TaskId};

/// Per-task view the kernel reduces over.
pub trait ReductionInput {
    fn task_count(&self) -> usize;
    fn resource_count(&self) -> usize;
    /// Units of `resource` the task must still obtain before it can finish.
    fn need(&self, task: usize, resource: usize) -> u32;
    /// Units of `resource` the task hands back once it finishes.
    fn contribution(&self, task: usize, resource: usize) -> u32;
}

/// Result of one reduction: the order tasks finished in and who never did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reduction {
    pub order: Vec<TaskId>,
    pub stuck: Vec<TaskId>,
}

impl Reduction {
    /// Every task finished.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.stuck.is_empty()
    }
}

/// Run the reduction seeded with `work`.
pub fn reduce(input: &impl ReductionInput, mut work: Vec<u32>) -> Reduction {
    let tasks = input.task_count();
    let kinds = input.resource_count();
    debug_assert_eq!(work.len(), kinds);

    let mut finished = vec![false; tasks];
    let mut order = Vec::with_capacity(tasks);

    loop {
        let mut progressed = false;
        for t in 0..tasks {
            if finished[t] {
                continue;
            }
            if (0..kinds).all(|r| input.need(t, r) <= work[r]) {
                for (r, slot) in work.iter_mut().enumerate() {
                    *slot = slot.saturating_add(input.contribution(t, r));
                }
                finished[t] = true;
                order.push(TaskId(t));
                progressed = true;
            }
        }
        if !progressed || order.len() == tasks {
            break;
        }
    }

    let stuck = finished
        .iter()
        .enumerate()
        .filter(|(_, done)| !**done)
        .map(|(t, _)| TaskId(t))
        .collect();
    Reduction { order, stuck }
}

/// The ledger as it stands: real remaining needs, real allocations.
#[derive(Debug, Clone, Copy)]
pub struct CurrentState<'a>(pub &'a ResourceLedger);

impl ReductionInput for CurrentState<'_> {
    fn task_count(&self) -> usize {
        self.0.task_count()
    }

    fn resource_count(&self) -> usize {
        self.0.resource_count()
    }

    fn need(&self, task: usize, resource: usize) -> u32 {
        self.0.remaining_need(TaskId(task))[resource]
    }

    fn contribution(&self, task: usize, resource: usize) -> u32 {
        self.0.allocated(TaskId(task))[resource]
    }
}

/// The ledger with one request provisionally moved into the requester's
/// allocation. The real ledger is never written.
#[derive(Debug, Clone, Copy)]
pub struct TentativeGrant<'a> {
    pub ledger: &'a ResourceLedger,
    pub task: TaskId,
    pub resource: ResourceId,
    pub amount: u32,
}

impl TentativeGrant<'_> {
    fn is_target(&self, task: usize, resource: usize) -> bool {
        task == self.task.0 && resource == self.resource.0
    }
}

impl ReductionInput for TentativeGrant<'_> {
    fn task_count(&self) -> usize {
        self.ledger.task_count()
    }

    fn resource_count(&self) -> usize {
        self.ledger.resource_count()
    }

    fn need(&self, task: usize, resource: usize) -> u32 {
        let need = self.ledger.remaining_need(TaskId(task))[resource];
        if self.is_target(task, resource) {
            need.saturating_sub(self.amount)
        } else {
            need
        }
    }

    fn contribution(&self, task: usize, resource: usize) -> u32 {
        let held = self.ledger.allocated(TaskId(task))[resource];
        if self.is_target(task, resource) {
            held.saturating_add(self.amount)
        } else {
            held
        }
    }
}
