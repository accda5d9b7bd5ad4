//! Configuration
//!
//! Run configuration types, error taxonomy and startup validation.

pub mod types;
pub mod validator;
