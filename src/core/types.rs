use crate::config::types::{EXIT_FAILURE, EXIT_SUCCESS};
use nix::sys::signal::Signal;
use nix::sys::wait::WaitStatus;
use std::time::Duration;

/// Outcome of one supervised run.
///
/// Produced once, after the child has been reaped, so the timing fields always
/// describe the child's complete lifetime.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SupervisionResult {
    /// 0 on clean exit, the child's own code otherwise, 1 when killed by a signal
    pub exit_code: i32,
    pub user_cpu_time: Duration,
    pub system_cpu_time: Duration,
    /// Terminating signal when the child died abnormally
    pub signal: Option<Signal>,
    /// Number of signals forwarded to the child while it ran
    pub relayed_signals: u64,
}

impl SupervisionResult {
    /// Total user + system CPU time
    pub fn cpu_time(&self) -> Duration {
        self.user_cpu_time + self.system_cpu_time
    }

    pub fn success(&self) -> bool {
        self.exit_code == EXIT_SUCCESS
    }
}

/// Collapse a wait status into the wrapper's exit code and optional signal.
///
/// Every non-code termination maps to [`EXIT_FAILURE`]; the signal itself is
/// kept separately.
pub fn exit_code_for(status: &WaitStatus) -> (i32, Option<Signal>) {
    match *status {
        WaitStatus::Exited(_, code) => (code, None),
        WaitStatus::Signaled(_, sig, _) => (EXIT_FAILURE, Some(sig)),
        _ => (EXIT_FAILURE, None),
    }
}
