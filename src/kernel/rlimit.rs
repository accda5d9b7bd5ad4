//! CPU-time ceiling via `RLIMIT_CPU`.
//!
//! The limit is installed on the supervisor itself before the child is
//! spawned; the child inherits it across fork/exec. Soft and hard limits are
//! equal, so once the child's CPU time reaches the ceiling the kernel kills
//! it with `SIGKILL` directly; no `SIGXCPU` warning comes first.

use crate::config::types::{CgrunError, CpuBudget, Result};
use nix::sys::resource::{setrlimit, Resource};

fn apply_rlimit_value(name: &str, resource: Resource, soft: u64, hard: u64) -> Result<()> {
    setrlimit(resource, soft as libc::rlim_t, hard as libc::rlim_t).map_err(|e| {
        CgrunError::LimitInstall(format!("Failed to apply {}={} (hard={}): {}", name, soft, hard, e))
    })
}

/// Install the CPU budget as a hard kernel ceiling on the calling process.
///
/// `Unlimited` is a no-op. Callers treat an error as non-fatal.
pub fn install_cpu_limit(budget: CpuBudget) -> Result<()> {
    let Some(secs) = budget.as_secs() else {
        log::debug!("No CPU budget configured, skipping RLIMIT_CPU");
        return Ok(());
    };

    apply_rlimit_value("RLIMIT_CPU", Resource::RLIMIT_CPU, secs, secs)?;
    log::info!("Installed RLIMIT_CPU soft=hard={}s", secs);
    Ok(())
}
