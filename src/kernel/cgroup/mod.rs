//! Cgroup resource accounting
//!
//! Mount point discovery and counter readers for v1 and v2 hierarchies.

pub mod backend;
pub mod mountinfo;
pub mod stats;
pub mod v1;
pub mod v2;

// Re-export commonly used items
pub use backend::{CgroupStatsReader, MountpointMap, MountpointResolver, StatsReader};
pub use mountinfo::MountInfoResolver;
pub use stats::StatsReport;
