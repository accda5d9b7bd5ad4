//! Supervision and accounting core
//!
//! The supervisor runs the child; the accountant reads cgroup counters after
//! it exits. The two never depend on each other.

pub mod accountant;
pub mod supervisor;
pub mod types;

pub use accountant::Accountant;
pub use supervisor::Supervisor;
pub use types::SupervisionResult;
