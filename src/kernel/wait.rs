//! Child exit notification and reaping.
//!
//! Waiting happens in two steps so the pid stays valid until the caller has
//! stopped everything that might still signal it: [`wait_exited`] blocks until
//! the child has exited without reaping it, and [`reap`] collects the status
//! together with the child's resource usage.

use crate::config::types::{CgrunError, Result};
use nix::errno::Errno;
use nix::sys::wait::WaitStatus;
use nix::unistd::Pid;
use std::time::Duration;

/// CPU time consumed by a reaped child, from `wait4(2)`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResourceUsage {
    pub user_time: Duration,
    pub system_time: Duration,
}

pub(crate) fn timeval_to_duration(tv: libc::timeval) -> Duration {
    let secs = tv.tv_sec.max(0) as u64;
    let micros = tv.tv_usec.clamp(0, 999_999) as u32;
    Duration::new(secs, micros * 1_000)
}

/// Block until `pid` has exited, leaving it unreaped. Retries on EINTR.
pub fn wait_exited(pid: Pid) -> Result<()> {
    loop {
        // SAFETY: siginfo_t is plain data; waitid only writes into it.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        let rc = unsafe {
            libc::waitid(
                libc::P_PID,
                pid.as_raw() as libc::id_t,
                &mut info,
                libc::WEXITED | libc::WNOWAIT,
            )
        };
        if rc == 0 {
            return Ok(());
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e => {
                return Err(CgrunError::Process(format!(
                    "waitid on pid {} failed: {}",
                    pid, e
                )))
            }
        }
    }
}

/// Reap `pid` and return its wait status and resource usage
pub fn reap(pid: Pid) -> Result<(WaitStatus, ResourceUsage)> {
    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain data; wait4 only writes into it.
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };

    loop {
        let rc = unsafe { libc::wait4(pid.as_raw(), &mut status, 0, &mut usage) };
        if rc == pid.as_raw() {
            break;
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e => {
                return Err(CgrunError::Process(format!(
                    "wait4 on pid {} failed: {}",
                    pid, e
                )))
            }
        }
    }

    let wait_status = WaitStatus::from_raw(pid, status)
        .map_err(|e| CgrunError::Process(format!("Undecodable wait status {}: {}", status, e)))?;

    Ok((
        wait_status,
        ResourceUsage {
            user_time: timeval_to_duration(usage.ru_utime),
            system_time: timeval_to_duration(usage.ru_stime),
        },
    ))
}
