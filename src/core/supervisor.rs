use crate::config::types::{CgrunError, Result};
use crate::core::types::{exit_code_for, SupervisionResult};
use crate::kernel::signal::{ChildHandle, SignalMaskGuard, SignalRelay};
use crate::kernel::wait::{reap, wait_exited};
use crate::observability::diagnostics::{DiagnosticKind, Diagnostics};
use nix::unistd::Pid;
use std::process::Command;

/// Runs one command to completion while relaying signals to it.
pub struct Supervisor<'a> {
    diagnostics: &'a Diagnostics,
}

impl<'a> Supervisor<'a> {
    pub fn new(diagnostics: &'a Diagnostics) -> Self {
        Self { diagnostics }
    }

    /// Spawn `command[0]` with `command[1..]` as arguments, inheriting the
    /// standard streams, and block until it has fully exited.
    ///
    /// Signals received meanwhile are forwarded to the child. A spawn failure
    /// is reported as [`CgrunError::Spawn`] and never as a normal exit.
    pub fn run(&self, command: &[String]) -> Result<SupervisionResult> {
        let (program, args) = command
            .split_first()
            .ok_or_else(|| CgrunError::Config("empty command".to_string()))?;

        // Blocked before spawning so nothing slips through between spawn and
        // relay start. The child starts with an empty mask.
        let mask = SignalMaskGuard::block().map_err(CgrunError::Process)?;

        let child = match Command::new(program).args(args).spawn() {
            Ok(child) => child,
            Err(source) => {
                self.diagnostics
                    .emit(DiagnosticKind::SpawnFailed, format!("{}: {}", program, source));
                return Err(CgrunError::Spawn {
                    program: program.clone(),
                    source,
                });
            }
        };

        let pid = Pid::from_raw(child.id() as i32);
        log::debug!("Spawned {} as pid {}", program, pid);

        let handle = ChildHandle::new(pid);
        let relay = SignalRelay::start(handle.clone(), *mask.signals())
            .map_err(CgrunError::Process);

        let exited = wait_exited(pid);

        // The child is dead but unreaped: its pid cannot be recycled yet, so
        // the relay is stopped before the zombie goes away.
        handle.release();
        let relayed_signals = relay.map(SignalRelay::stop).unwrap_or_else(|e| {
            log::warn!("{}", e);
            0
        });
        exited?;

        let (status, usage) = reap(pid)?;
        let (exit_code, signal) = exit_code_for(&status);
        drop(child);

        if let Some(sig) = signal {
            log::info!("Child {} terminated by {}", pid, sig);
        }
        log::debug!(
            "Child {} exited with {} (user {:?}, system {:?}, {} signals relayed)",
            pid,
            exit_code,
            usage.user_time,
            usage.system_time,
            relayed_signals
        );

        Ok(SupervisionResult {
            exit_code,
            user_cpu_time: usage.user_time,
            system_cpu_time: usage.system_time,
            signal,
            relayed_signals,
        })
    }
}
