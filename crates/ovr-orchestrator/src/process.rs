// process.rs — Thin libc wrappers for probing, signalling, and reaping.
//
// Nothing here caches state; each call asks the kernel. A pid of 0 or
// one that does not fit in pid_t is treated as "no such process" so a
// zeroed record can never signal our own process group.

use std::io;
use std::thread;
use std::time::{Duration, Instant};

/// What a signal-0 probe says about a pid.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Probe {
    /// The process exists and we may signal it.
    Alive,
    /// The process exists but belongs to someone else (EPERM).
    NotPermitted,
    /// No such process (ESRCH).
    Gone,
}

/// Result of a non-blocking wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// Our child, and it has exited (now reaped).
    Exited,
    /// Our child, still running.
    Running,
    /// Not our child; waitpid cannot answer.
    NotChild,
}

/// Termination strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Graceful,
    Forceful,
}

impl Signal {
    fn raw(self) -> libc::c_int {
        match self {
            Signal::Graceful => libc::SIGTERM,
            Signal::Forceful => libc::SIGKILL,
        }
    }
}

fn to_pid(pid: u32) -> Option<libc::pid_t> {
    libc::pid_t::try_from(pid).ok().filter(|p| *p > 0)
}

/// Signal-0 existence check.
pub fn probe(pid: u32) -> Probe {
    let Some(raw) = to_pid(pid) else {
        return Probe::Gone;
    };
    // Safety: signal 0 performs permission and existence checks only.
    let rc = unsafe { libc::kill(raw, 0) };
    if rc == 0 {
        return Probe::Alive;
    }
    match io::Error::last_os_error().raw_os_error() {
        Some(libc::ESRCH) => Probe::Gone,
        Some(libc::EPERM) => Probe::NotPermitted,
        // Anything else: assume it exists rather than drop a live record.
        _ => Probe::NotPermitted,
    }
}

/// Send a termination signal. ESRCH comes back as an error whose
/// `raw_os_error()` is `Some(libc::ESRCH)`.
pub fn send_signal(pid: u32, signal: Signal) -> io::Result<()> {
    let Some(raw) = to_pid(pid) else {
        return Err(io::Error::from_raw_os_error(libc::ESRCH));
    };
    // Safety: plain kill(2) on a positive pid.
    let rc = unsafe { libc::kill(raw, signal.raw()) };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

/// `waitpid(pid, WNOHANG)`.
pub fn try_wait(pid: u32) -> WaitStatus {
    let Some(raw) = to_pid(pid) else {
        return WaitStatus::NotChild;
    };
    let mut status: libc::c_int = 0;
    // Safety: non-blocking wait on a single pid.
    let rc = unsafe { libc::waitpid(raw, &mut status, libc::WNOHANG) };
    match rc {
        0 => WaitStatus::Running,
        r if r == raw => WaitStatus::Exited,
        _ => WaitStatus::NotChild,
    }
}

/// True once the process no longer runs.
///
/// Children are reaped through waitpid (a zombie still answers signal 0).
/// For anything else the signal-0 probe decides.
pub fn has_exited(pid: u32) -> bool {
    match try_wait(pid) {
        WaitStatus::Exited => true,
        WaitStatus::Running => false,
        WaitStatus::NotChild => probe(pid) == Probe::Gone,
    }
}

/// Block until a child exits. Non-children are polled until they vanish
/// or `timeout` passes. Returns whether the process is gone.
pub fn wait_gone(pid: u32, timeout: Duration) -> bool {
    if let Some(raw) = to_pid(pid) {
        let mut status: libc::c_int = 0;
        // Safety: blocking wait, only reached after SIGKILL.
        let rc = unsafe { libc::waitpid(raw, &mut status, 0) };
        if rc == raw {
            return true;
        }
    }
    let deadline = Instant::now() + timeout;
    loop {
        if probe(pid) == Probe::Gone {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(10));
    }
}

/// SIGTERM, wait `grace`, then SIGKILL if still present.
///
/// Returns `Ok(false)` when the process was already gone, `Ok(true)` when
/// it was terminated by us.
pub fn terminate(pid: u32, grace: Duration) -> io::Result<bool> {
    match send_signal(pid, Signal::Graceful) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Ok(false),
        Err(e) => return Err(e),
    }

    let deadline = Instant::now() + grace;
    loop {
        if has_exited(pid) {
            tracing::debug!(pid, "process exited after SIGTERM");
            return Ok(true);
        }
        if Instant::now() >= deadline {
            break;
        }
        thread::sleep(Duration::from_millis(10).min(grace));
    }

    tracing::info!(pid, "process ignored SIGTERM, escalating to SIGKILL");
    match send_signal(pid, Signal::Forceful) {
        Ok(()) => {}
        Err(e) if e.raw_os_error() == Some(libc::ESRCH) => return Ok(true),
        Err(e) => return Err(e),
    }
    wait_gone(pid, Duration::from_secs(2));
    Ok(true)
}
