//! Utilities
//!
//! Stats report output.

pub mod output;
