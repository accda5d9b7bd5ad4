/// Core types shared by the supervisor, the budget enforcer and the accountant
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Exit code used when the child finished cleanly.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code for abnormal child termination or an internal failure.
pub const EXIT_FAILURE: i32 = 1;
/// Exit code when no command was supplied.
pub const EXIT_USAGE: i32 = 2;
/// Exit code for a budget-exceeded child when `--budget-exit-code` is enabled.
pub const EXIT_BUDGET_EXCEEDED: i32 = 111;

/// Default destination of the stats report
pub const DEFAULT_OUTPUT_PATH: &str = "/golem/stats/cgroups_stats.json";
/// Default subsystems to account
pub const DEFAULT_SUBSYSTEMS: &str = "cpuacct,memory";
/// Mount table consulted to resolve cgroup mount points
pub const DEFAULT_MOUNTINFO_PATH: &str = "/proc/self/mountinfo";

/// CPU-time budget for the supervised process.
///
/// `Seconds(0)` is never constructed: zero is the "no limit" sentinel and maps
/// to [`CpuBudget::Unlimited`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum CpuBudget {
    #[default]
    Unlimited,
    Seconds(u64),
}

impl CpuBudget {
    pub fn from_secs(secs: u64) -> Self {
        if secs == 0 {
            CpuBudget::Unlimited
        } else {
            CpuBudget::Seconds(secs)
        }
    }

    pub fn as_secs(&self) -> Option<u64> {
        match self {
            CpuBudget::Unlimited => None,
            CpuBudget::Seconds(secs) => Some(*secs),
        }
    }
}

impl fmt::Display for CpuBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CpuBudget::Unlimited => write!(f, "unlimited"),
            CpuBudget::Seconds(secs) => write!(f, "{}s", secs),
        }
    }
}

/// Set of cgroup subsystem names to account. Order is irrelevant, names unique.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemSet(BTreeSet<String>);

impl SubsystemSet {
    /// Parse a comma-separated list, dropping blanks and duplicates
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|name| !name.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One run of the wrapper, as parsed from the command line
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunConfig {
    /// Program followed by its arguments
    pub command: Vec<String>,
    /// CPU-time ceiling
    pub budget: CpuBudget,
    /// cgroup subsystems to include in the report
    pub subsystems: SubsystemSet,
    /// Where the stats report is written
    pub output_path: PathBuf,
    /// Mount table used for mount point discovery
    pub mountinfo_path: PathBuf,
    /// Surface a budget overrun as [`EXIT_BUDGET_EXCEEDED`] instead of only logging it
    pub budget_exit_code: bool,
    /// Skip cgroup accounting entirely when false
    pub collect_stats: bool,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            command: Vec::new(),
            budget: CpuBudget::Unlimited,
            subsystems: SubsystemSet::parse(DEFAULT_SUBSYSTEMS),
            output_path: PathBuf::from(DEFAULT_OUTPUT_PATH),
            mountinfo_path: PathBuf::from(DEFAULT_MOUNTINFO_PATH),
            budget_exit_code: false,
            collect_stats: true,
        }
    }
}

/// Custom error types for cgrun
#[derive(Error, Debug)]
pub enum CgrunError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to install CPU limit: {0}")]
    LimitInstall(String),

    #[error("Could not resolve mount point for subsystem '{subsystem}': {reason}")]
    MountpointResolution { subsystem: String, reason: String },

    #[error("Could not collect cgroup stats: {0}")]
    Collection(String),

    #[error("Could not write stats report: {0}")]
    ReportWrite(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Process error: {0}")]
    Process(String),
}

/// Result type alias for cgrun operations
pub type Result<T> = std::result::Result<T, CgrunError>;
