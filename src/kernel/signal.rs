/// Signal relay for the supervised child
///
/// The supervising thread blocks every relayable signal, real-time ones
/// included, so they stay pending at process level until the relay thread
/// collects them with `sigwaitinfo(2)` and forwards them to the child. No
/// handler runs in signal context, so nothing here has to be
/// async-signal-safe.
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use log::{debug, info, warn};
use nix::errno::Errno;
use nix::sys::pthread::pthread_kill;
use nix::sys::signal::{self, SigSet, SigmaskHow, Signal};
use nix::unistd::Pid;
use std::os::unix::thread::JoinHandleExt;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Sent by the supervisor to the relay thread itself to end its wait. Told
/// apart from an external `SIGUSR1` by its origin: thread-directed, from our
/// own pid.
const WAKE_SIGNAL: Signal = Signal::SIGUSR1;

/// Signals that are never relayed: uncatchable ones, our own child
/// notifications, and synchronous faults that must keep their default action.
const NON_RELAYABLE: [Signal; 9] = [
    Signal::SIGKILL,
    Signal::SIGSTOP,
    Signal::SIGCHLD,
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGFPE,
    Signal::SIGILL,
    Signal::SIGTRAP,
    Signal::SIGSYS,
];

/// Every signal the supervisor forwards to its child
pub fn relayable_signals() -> SigSet {
    let mut set = SigSet::empty();
    for sig in Signal::iterator() {
        if !NON_RELAYABLE.contains(&sig) {
            set.add(sig);
        }
    }

    // nix has no names for SIGRTMIN..=SIGRTMAX, so they go in raw
    let mut raw = *set.as_ref();
    for signo in libc::SIGRTMIN()..=libc::SIGRTMAX() {
        // SAFETY: `raw` is an initialized sigset and `signo` a valid signal number.
        unsafe { libc::sigaddset(&mut raw, signo) };
    }
    // SAFETY: `raw` was initialized by SigSet::empty and only grown by sigaddset.
    unsafe { SigSet::from_sigset_t_unchecked(raw) }
}

/// Human-readable signal name, `SIGRTMIN+n` for real-time signals
pub fn signal_name(signo: libc::c_int) -> String {
    match Signal::try_from(signo) {
        Ok(sig) => sig.as_str().to_string(),
        Err(_) if signo >= libc::SIGRTMIN() => format!("SIGRTMIN+{}", signo - libc::SIGRTMIN()),
        Err(_) => format!("signal {}", signo),
    }
}

/// Blocks the relayable signals on the calling thread.
///
/// Threads spawned while the guard is alive inherit the mask. On drop, any
/// relayable signal still pending is consumed and discarded before the
/// previous mask is restored, so signals arriving after the child exited never
/// take their default action on the supervisor.
pub struct SignalMaskGuard {
    blocked: SigSet,
    previous: SigSet,
}

impl SignalMaskGuard {
    pub fn block() -> Result<Self, String> {
        let blocked = relayable_signals();
        let mut previous = SigSet::empty();

        signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&blocked), Some(&mut previous))
            .map_err(|e| format!("Failed to block signals: {}", e))?;

        Ok(Self { blocked, previous })
    }

    pub fn signals(&self) -> &SigSet {
        &self.blocked
    }
}

impl Drop for SignalMaskGuard {
    fn drop(&mut self) {
        while let Some(signo) = wait_for_signal(&self.blocked, Duration::ZERO) {
            debug!("Discarding {} received after the child exited", signal_name(signo));
        }
        let _ = signal::pthread_sigmask(SigmaskHow::SIG_SETMASK, Some(&self.previous), None);
    }
}

/// Wait up to `timeout` for one signal from `set` to become pending and
/// consume it. Returns `None` on timeout.
pub fn wait_for_signal(set: &SigSet, timeout: Duration) -> Option<libc::c_int> {
    let ts = libc::timespec {
        tv_sec: timeout.as_secs() as libc::time_t,
        tv_nsec: timeout.subsec_nanos() as libc::c_long,
    };

    loop {
        // SAFETY: `set` is a valid initialized sigset, `info` may be null and
        // `ts` outlives the call.
        let rc = unsafe { libc::sigtimedwait(set.as_ref(), std::ptr::null_mut(), &ts) };
        if rc >= 0 {
            return Some(rc);
        }
        match Errno::last() {
            Errno::EINTR => continue,
            _ => return None,
        }
    }
}

/// A signal consumed by the relay, with its origin
struct PendingSignal {
    signo: libc::c_int,
    code: libc::c_int,
    sender: libc::pid_t,
}

impl PendingSignal {
    fn is_wake(&self) -> bool {
        self.signo == WAKE_SIGNAL as libc::c_int
            && self.code == libc::SI_TKILL
            && self.sender == std::process::id() as libc::pid_t
    }
}

/// Block until one signal from `set` is pending and consume it
fn next_signal(set: &SigSet) -> Result<PendingSignal, Errno> {
    loop {
        // SAFETY: siginfo_t is plain data; sigwaitinfo only writes into it.
        let mut info: libc::siginfo_t = unsafe { std::mem::zeroed() };
        // SAFETY: `set` is a valid initialized sigset and `info` outlives the call.
        let rc = unsafe { libc::sigwaitinfo(set.as_ref(), &mut info) };
        if rc >= 0 {
            return Ok(PendingSignal {
                signo: rc,
                code: info.si_code,
                // SAFETY: the kill union member is valid for every signal
                // consumed here; for other origins it reads as an unrelated pid.
                sender: unsafe { info.si_pid() },
            });
        }
        match Errno::last() {
            Errno::EINTR => continue,
            e => return Err(e),
        }
    }
}

/// Concurrency-safe handle to the supervised child's pid.
///
/// The supervisor releases the handle after the child has exited but before
/// it is reaped, so the relay can never signal a recycled pid.
#[derive(Clone, Debug)]
pub struct ChildHandle {
    pid: Arc<Mutex<Option<Pid>>>,
}

impl ChildHandle {
    pub fn new(pid: Pid) -> Self {
        Self {
            pid: Arc::new(Mutex::new(Some(pid))),
        }
    }

    /// Forward signal number `signo` to the child unmodified. Returns false
    /// when the child is gone.
    pub fn signal(&self, signo: libc::c_int) -> bool {
        let guard = match self.pid.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let Some(pid) = *guard else {
            return false;
        };

        // Raw kill: real-time signals have no nix `Signal` value
        // SAFETY: kill has no memory-safety preconditions.
        match Errno::result(unsafe { libc::kill(pid.as_raw(), signo) }) {
            Ok(_) => true,
            Err(Errno::ESRCH) => false,
            Err(e) => {
                warn!("Failed to relay {} to pid {}: {}", signal_name(signo), pid, e);
                false
            }
        }
    }

    /// Stop accepting signals for the child.
    pub fn release(&self) {
        let mut guard = match self.pid.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = None;
    }
}

/// Worker thread forwarding blocked signals to the child.
///
/// The thread sleeps in `sigwaitinfo` without a timeout, so an idle relay
/// burns no CPU time against the supervisor's own `RLIMIT_CPU`.
pub struct SignalRelay {
    shutdown_tx: Sender<()>,
    thread: Option<JoinHandle<u64>>,
}

impl SignalRelay {
    /// Start relaying `signals` to `child`. The calling thread must already
    /// have `signals` blocked (see [`SignalMaskGuard`]).
    pub fn start(child: ChildHandle, signals: SigSet) -> Result<Self, String> {
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);
        let (ready_tx, ready_rx) = crossbeam_channel::bounded(0);

        let thread = thread::Builder::new()
            .name("cgrun-signal-relay".to_string())
            .spawn(move || relay_loop(child, signals, shutdown_rx, ready_tx))
            .map_err(|e| format!("Failed to start signal relay: {}", e))?;

        // The wake signal must be blocked on the relay thread before anyone
        // may send it.
        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self {
                shutdown_tx,
                thread: Some(thread),
            }),
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err("Signal relay exited during startup".to_string())
            }
        }
    }

    /// Stop the relay thread and return how many signals it forwarded
    pub fn stop(mut self) -> u64 {
        self.shutdown()
    }

    fn shutdown(&mut self) -> u64 {
        let Some(thread) = self.thread.take() else {
            return 0;
        };

        let _ = self.shutdown_tx.try_send(());
        if let Err(e) = pthread_kill(thread.as_pthread_t(), WAKE_SIGNAL) {
            warn!("Failed to wake signal relay: {}", e);
        }
        thread.join().unwrap_or(0)
    }
}

impl Drop for SignalRelay {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn relay_loop(
    child: ChildHandle,
    signals: SigSet,
    shutdown_rx: Receiver<()>,
    ready_tx: Sender<Result<(), String>>,
) -> u64 {
    let mut waited = signals;
    waited.add(WAKE_SIGNAL);
    if let Err(e) = signal::pthread_sigmask(SigmaskHow::SIG_BLOCK, Some(&waited), None) {
        let _ = ready_tx.send(Err(format!("Failed to block signals on relay thread: {}", e)));
        return 0;
    }
    if ready_tx.send(Ok(())).is_err() {
        return 0;
    }

    let mut relayed = 0u64;
    loop {
        let pending = match next_signal(&waited) {
            Ok(pending) => pending,
            Err(e) => {
                warn!("Signal relay stopped: {}", e);
                break;
            }
        };

        if pending.is_wake() {
            match shutdown_rx.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => continue,
            }
        }

        let name = signal_name(pending.signo);
        if child.signal(pending.signo) {
            relayed += 1;
            info!("Relayed {} to child", name);
        } else {
            debug!("Dropped {}: child already exited", name);
        }
    }

    relayed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relayable_signals() {
        let set = relayable_signals();
        assert!(set.contains(Signal::SIGTERM));
        assert!(set.contains(Signal::SIGINT));
        assert!(set.contains(Signal::SIGHUP));
        assert!(set.contains(Signal::SIGUSR1));
        assert!(set.contains(Signal::SIGXCPU));
        assert!(!set.contains(Signal::SIGKILL));
        assert!(!set.contains(Signal::SIGSTOP));
        assert!(!set.contains(Signal::SIGCHLD));
        assert!(!set.contains(Signal::SIGSEGV));
    }

    #[test]
    fn test_realtime_signals_are_relayable() {
        let set = relayable_signals();
        for signo in [libc::SIGRTMIN(), libc::SIGRTMIN() + 1, libc::SIGRTMAX()] {
            // SAFETY: `set` is an initialized sigset.
            assert_eq!(unsafe { libc::sigismember(set.as_ref(), signo) }, 1, "signal {}", signo);
        }
    }

    #[test]
    fn test_signal_name() {
        assert_eq!(signal_name(libc::SIGTERM), "SIGTERM");
        assert_eq!(signal_name(libc::SIGRTMIN() + 1), "SIGRTMIN+1");
    }

    #[test]
    fn test_released_handle_is_noop() {
        let handle = ChildHandle::new(Pid::from_raw(i32::MAX));
        handle.release();
        assert!(!handle.signal(libc::SIGTERM));
    }

    #[test]
    fn test_signal_to_missing_pid_is_noop() {
        // pid_max never reaches i32::MAX, so this pid cannot exist
        let handle = ChildHandle::new(Pid::from_raw(i32::MAX));
        assert!(!handle.signal(libc::SIGTERM));
    }

    #[test]
    fn test_wait_for_signal_times_out() {
        let mut set = SigSet::empty();
        set.add(Signal::SIGUSR2);
        assert_eq!(wait_for_signal(&set, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_relay_stops_on_request() {
        let handle = ChildHandle::new(Pid::from_raw(i32::MAX));
        let mut set = SigSet::empty();
        set.add(Signal::SIGUSR2);
        let relay = SignalRelay::start(handle, set).unwrap();
        assert_eq!(relay.stop(), 0);
    }

    #[test]
    fn test_relay_idles_without_cpu() {
        let handle = ChildHandle::new(Pid::from_raw(i32::MAX));
        let mut set = SigSet::empty();
        set.add(Signal::SIGUSR2);
        let relay = SignalRelay::start(handle, set).unwrap();
        let thread_id = relay.thread.as_ref().unwrap().as_pthread_t();

        let mut clock: libc::clockid_t = 0;
        // SAFETY: `thread_id` names a live thread and `clock` outlives the call.
        assert_eq!(unsafe { libc::pthread_getcpuclockid(thread_id, &mut clock) }, 0);
        let cpu_time = || {
            let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
            // SAFETY: `ts` outlives the call.
            unsafe { libc::clock_gettime(clock, &mut ts) };
            Duration::new(ts.tv_sec as u64, ts.tv_nsec as u32)
        };

        let before = cpu_time();
        thread::sleep(Duration::from_millis(500));
        let idle = cpu_time() - before;
        relay.stop();

        // A polling loop wakes several times in this window
        assert!(idle < Duration::from_millis(5), "relay used {:?} while idle", idle);
    }
}
