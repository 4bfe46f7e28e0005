//! OS process control for the interpreter
//!
//! sclang is spawned as the leader of its own process group so the audio
//! server it starts can be killed with it.

use parking_lot::{Condvar, Mutex};
use std::process::Child;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

// Unix-specific process control using libc
#[cfg(unix)]
mod unix_process {
    use libc::{c_int, pid_t, ESRCH};

    /// Group ids outside 2..=pid_t::MAX would address other targets once negated
    fn group_target(pgid: u32) -> Option<pid_t> {
        pid_t::try_from(pgid).ok().filter(|&p| p > 1).map(|p| -p)
    }

    /// Send a signal to a process group (negative PID targets the group)
    pub fn kill_process_group(pgid: u32, signal: c_int) -> Result<(), &'static str> {
        let target = group_target(pgid).ok_or("Invalid process group")?;
        // Safety: kill() is a plain syscall with no memory safety concerns
        let rc = unsafe { libc::kill(target, signal) };
        if rc == 0 {
            Ok(())
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            match errno {
                libc::ESRCH => Err("No such process group"),
                libc::EPERM => Err("Permission denied"),
                libc::EINVAL => Err("Invalid signal"),
                _ => Err("Unknown error"),
            }
        }
    }

    /// Signal 0 checks for existence; EPERM still means alive
    pub fn process_group_alive(pgid: u32) -> bool {
        let Some(target) = group_target(pgid) else {
            return false;
        };
        // Safety: kill() with signal 0 only checks existence
        let rc = unsafe { libc::kill(target, 0) };
        if rc == 0 {
            true
        } else {
            let errno = std::io::Error::last_os_error().raw_os_error().unwrap_or(0);
            errno != ESRCH
        }
    }

    pub const SIGKILL: c_int = libc::SIGKILL;
}

/// SIGKILL a whole process group. Missing groups are not an error.
#[cfg(unix)]
pub fn force_kill_group(pgid: u32) {
    match unix_process::kill_process_group(pgid, unix_process::SIGKILL) {
        Ok(()) => debug!(pgid, "Sent SIGKILL to process group"),
        Err("No such process group") => debug!(pgid, "Process group already exited"),
        Err(e) => warn!(pgid, error = e, "SIGKILL failed"),
    }
}

#[cfg(not(unix))]
pub fn force_kill_group(pid: u32) {
    warn!(pid, "Process groups unsupported on this platform; only the child can be killed");
}

/// Whether any process in the group is still alive
#[cfg(unix)]
pub fn process_group_alive(pgid: u32) -> bool {
    unix_process::process_group_alive(pgid)
}

#[cfg(not(unix))]
pub fn process_group_alive(_pgid: u32) -> bool {
    false
}

/// Exit status published once by the waiter thread after reaping
#[derive(Debug, Default)]
pub(crate) struct ExitLatch {
    /// `Some(code)` once reaped; the code is `None` when killed by a signal
    status: Mutex<Option<Option<i32>>>,
    cond: Condvar,
}

impl ExitLatch {
    pub(crate) fn set(&self, code: Option<i32>) {
        let mut status = self.status.lock();
        if status.is_none() {
            *status = Some(code);
            self.cond.notify_all();
        }
    }

    pub(crate) fn get(&self) -> Option<Option<i32>> {
        *self.status.lock()
    }

    /// Block until the process has been reaped or `timeout` elapses
    pub(crate) fn wait(&self, timeout: Duration) -> Option<Option<i32>> {
        let deadline = Instant::now() + timeout;
        let mut status = self.status.lock();
        while status.is_none() {
            if self.cond.wait_until(&mut status, deadline).timed_out() {
                break;
            }
        }
        *status
    }
}

/// Owns the spawned child; its PID doubles as the process group id
///
/// Dropping a handle whose process is still running force-kills the group.
#[derive(Debug)]
pub struct ProcessHandle {
    pid: u32,
    child: Arc<Mutex<Child>>,
    exit: Arc<ExitLatch>,
}

impl ProcessHandle {
    pub(crate) fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Arc::new(Mutex::new(child)),
            exit: Arc::new(ExitLatch::default()),
        }
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub(crate) fn child(&self) -> Arc<Mutex<Child>> {
        Arc::clone(&self.child)
    }

    pub(crate) fn exit_latch(&self) -> Arc<ExitLatch> {
        Arc::clone(&self.exit)
    }

    /// Exit code once reaped; `Some(None)` means killed by a signal
    pub fn exit_status(&self) -> Option<Option<i32>> {
        self.exit.get()
    }

    pub fn has_exited(&self) -> bool {
        self.exit.get().is_some()
    }

    pub fn wait_exit(&self, timeout: Duration) -> Option<Option<i32>> {
        self.exit.wait(timeout)
    }

    /// SIGKILL the process group (or the child alone off Unix)
    pub fn force_kill(&self) {
        if self.has_exited() {
            // Leader is gone; sweep whatever it left in the group
            if process_group_alive(self.pid) {
                force_kill_group(self.pid);
            }
            return;
        }
        force_kill_group(self.pid);
        #[cfg(not(unix))]
        if let Err(e) = self.child.lock().kill() {
            warn!(pid = self.pid, error = %e, "Child kill failed");
        }
    }
}

impl Drop for ProcessHandle {
    fn drop(&mut self) {
        if !self.has_exited() {
            debug!(pid = self.pid, "ProcessHandle dropped while running, killing group");
            self.force_kill();
        }
    }
}
