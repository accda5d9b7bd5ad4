//! Post-exit classification
//!
//! Pure functions over the supervision result.

pub mod budget;
