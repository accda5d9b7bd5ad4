//! cgrun: run a command, relay signals to it, cap its CPU time and record
//! the cgroup counters it leaves behind.
//!
//! # Architecture
//!
//! ## Kernel Primitives ([`kernel`])
//! - [`kernel::signal`]: Signal masking and forwarding to the child
//! - [`kernel::rlimit`]: `RLIMIT_CPU` installation
//! - [`kernel::wait`]: Non-reaping exit wait and rusage collection
//! - [`kernel::cgroup`]: Mount point discovery and v1/v2 counter readers
//!
//! ## Core ([`core`])
//! - [`core::supervisor`]: Spawn, relay, wait, reap
//! - [`core::accountant`]: All-or-nothing stats collection
//!
//! ## Verdict ([`verdict`])
//! - [`verdict::budget`]: Tells a budget kill apart from an ordinary failure
//!
//! ## Observability ([`observability`])
//! - [`observability::diagnostics`]: Tagged, timestamped operator diagnostics
//!
//! ## Configuration ([`config`])
//! - [`config::types`]: Run configuration, exit codes and errors
//! - [`config::validator`]: Startup validation
//!
//! ## Utilities ([`utils`])
//! - [`utils::output`]: Atomic stats report writer
//!
//! # Design Principles
//!
//! 1. **The child's exit code is the wrapper's exit code** unless the caller
//!    opts into a distinct budget code
//! 2. **Kernel as truth** - CPU time from `wait4`, counters from cgroupfs
//! 3. **No partial reports** - accounting either writes everything or nothing
//! 4. **Accounting never changes the outcome** - its failures are diagnostics

// Kernel Primitives
pub mod kernel;

// Supervision and accounting
pub mod core;

// Budget verdict
pub mod verdict;

// Observability
pub mod observability;

// Configuration
pub mod config;

// Utilities
pub mod utils;

// CLI entrypoint wiring for the cgrun binary.
pub mod cli;

// Re-export commonly used types for convenience
pub use config::types::*;
pub use crate::core::{Accountant, SupervisionResult, Supervisor};
pub use observability::diagnostics::{DiagnosticKind, Diagnostics};
pub use verdict::budget::{is_budget_exceeded, BudgetVerdict};
