//! Per-task worker scripts.

#![allow(missing_docs)]

use std::fmt;

use serde::{Deserialize, Serialize};

/// One action of a worker script. Resources are named by label so scripts
/// stay readable in TOML:
///
/// ```toml
/// script = [
///     { op = "pause", ms = 10 },
///     { op = "request", resource = "A", amount = 2 },
///     { op = "release", resource = "A", amount = 2 },
/// ]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Request { resource: String, amount: u32 },
    Release { resource: String, amount: u32 },
    Pause { ms: u64 },
}

impl Step {
    #[must_use]
    pub fn request(resource: &str, amount: u32) -> Self {
        Self::Request {
            resource: resource.to_string(),
            amount,
        }
    }

    #[must_use]
    pub fn release(resource: &str, amount: u32) -> Self {
        Self::Release {
            resource: resource.to_string(),
            amount,
        }
    }

    #[must_use]
    pub const fn pause(ms: u64) -> Self {
        Self::Pause { ms }
    }

    /// Resource label the step touches, if any.
    #[must_use]
    pub fn resource(&self) -> Option<&str> {
        match self {
            Self::Request { resource, .. } | Self::Release { resource, .. } => Some(resource),
            Self::Pause { .. } => None,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Request { resource, amount } => write!(f, "allocate({resource}, {amount})"),
            Self::Release { resource, amount } => write!(f, "release({resource}, {amount})"),
            Self::Pause { ms } => write!(f, "pause({ms} ms)"),
        }
    }
}

/// Units of `label` held after each step that touches it, as
/// `(step index, held)` pairs.
///
/// A negative count means the script has released more than it acquired up
/// to that step.
pub fn running_holding<'a>(
    script: &'a [Step],
    label: &'a str,
) -> impl Iterator<Item = (usize, i64)> + 'a {
    script
        .iter()
        .enumerate()
        .scan(0_i64, move |held, (index, step)| {
            let touched = match step {
                Step::Request { resource, amount } if resource == label => {
                    *held += i64::from(*amount);
                    true
                }
                Step::Release { resource, amount } if resource == label => {
                    *held -= i64::from(*amount);
                    true
                }
                _ => false,
            };
            Some(touched.then_some((index, *held)))
        })
        .flatten()
}

// ──────────────────── reference scripts ────────────────────

/// Scripts of the four reference workers, 10 ms and 50 ms pauses included.
#[must_use]
pub fn reference_scripts() -> Vec<Vec<Step>> {
    vec![
        vec![
            Step::pause(10),
            Step::request("A", 1),
            Step::request("D", 2),
            Step::pause(10),
            Step::release("A", 1),
            Step::request("B", 1),
            Step::pause(10),
            Step::request("C", 1),
            Step::pause(50),
            Step::release("B", 1),
            Step::pause(10),
            Step::release("C", 1),
            Step::release("D", 2),
        ],
        vec![
            Step::pause(10),
            Step::request("A", 2),
            Step::request("B", 3),
            Step::pause(10),
            Step::request("A", 1),
            Step::pause(50),
            Step::release("A", 3),
            Step::pause(10),
            Step::release("B", 3),
        ],
        vec![
            Step::pause(10),
            Step::request("A", 3),
            Step::pause(50),
            Step::release("A", 3),
        ],
        vec![
            Step::pause(10),
            Step::request("B", 2),
            Step::request("C", 3),
            Step::pause(10),
            Step::request("B", 1),
            Step::pause(50),
            Step::release("B", 3),
            Step::pause(10),
            Step::release("C", 3),
        ],
    ]
}
