//! Pure algorithms over a ledger: the reducibility kernel, the Banker's
//! safety check built on it, and the deadlock detector built on it.

pub mod detector;
pub mod reduction;
pub mod safety;

pub use detector::{DeadlockStatus, detect};
pub use reduction::{Reduction, ReductionInput, reduce};
pub use safety::{SafetyVerdict, UnsafeReason, check_availability, check_request};
