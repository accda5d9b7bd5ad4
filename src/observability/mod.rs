//! Observability
//!
//! Tagged, timestamped diagnostics for the operator.

pub mod diagnostics;
