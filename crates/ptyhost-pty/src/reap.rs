//! Child reaping and exit status decoding

use std::fmt;

use nix::errno::Errno;
use nix::sys::wait::{waitpid, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, warn};

/// A forked child that has not been reaped yet.
///
/// Not `Copy` or `Clone`: [`wait`] consumes it, so each child is reaped at
/// most once and a recycled pid is never waited on by mistake.
#[derive(Debug, PartialEq, Eq)]
pub struct ChildPid(Pid);

impl ChildPid {
    pub(crate) fn new(pid: Pid) -> Self {
        Self(pid)
    }

    /// Adopt a raw pid handed over by a host. The caller vouches that it is
    /// an unreaped child of this process and that no other handle exists.
    pub fn from_raw(pid: libc::pid_t) -> Self {
        Self(Pid::from_raw(pid))
    }

    pub fn pid(&self) -> Pid {
        self.0
    }

    pub fn as_raw(&self) -> libc::pid_t {
        self.0.as_raw()
    }
}

impl fmt::Display for ChildPid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How a child ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Normal termination with an exit code in `0..=255`
    Exited(i32),
    /// Killed by the given signal number
    Signaled(i32),
    /// Any other wait outcome; decodes as 0
    Other,
}

impl ExitStatus {
    /// Single-integer encoding: the exit code, or the negated signal number.
    pub fn code(&self) -> i32 {
        match *self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(signal) => -signal,
            ExitStatus::Other => 0,
        }
    }

    pub fn success(&self) -> bool {
        matches!(self, ExitStatus::Exited(0))
    }

    /// Shell-style status for a host process to exit with: the code, or
    /// `128 + signal`.
    pub fn shell_code(&self) -> i32 {
        match *self {
            ExitStatus::Signaled(signal) => 128 + signal,
            other => other.code(),
        }
    }
}

impl From<WaitStatus> for ExitStatus {
    fn from(status: WaitStatus) -> Self {
        match status {
            WaitStatus::Exited(_, code) => ExitStatus::Exited(code),
            WaitStatus::Signaled(_, signal, _) => ExitStatus::Signaled(signal as i32),
            _ => ExitStatus::Other,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exited with code {code}"),
            ExitStatus::Signaled(signal) => write!(f, "killed by signal {signal}"),
            ExitStatus::Other => write!(f, "terminated"),
        }
    }
}

/// Block until `child` terminates and decode how it ended.
///
/// Blocks indefinitely, so run it on a thread or blocking task of its own.
/// Interrupted waits are retried. Any other `waitpid` failure (e.g. the pid
/// was never our child) is logged and decodes as [`ExitStatus::Other`].
pub fn wait(child: ChildPid) -> ExitStatus {
    loop {
        match waitpid(child.pid(), None) {
            Ok(status) => {
                let status = ExitStatus::from(status);
                debug!(pid = %child, %status, "reaped child");
                return status;
            }
            Err(Errno::EINTR) => continue,
            Err(e) => {
                warn!(pid = %child, error = %e, "waitpid failed");
                return ExitStatus::Other;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;

    #[test]
    fn test_exit_status_encoding() {
        assert_eq!(ExitStatus::Exited(0).code(), 0);
        assert_eq!(ExitStatus::Exited(7).code(), 7);
        assert_eq!(ExitStatus::Exited(255).code(), 255);
        assert_eq!(ExitStatus::Signaled(9).code(), -9);
        assert_eq!(ExitStatus::Other.code(), 0);
    }

    #[test]
    fn test_shell_code() {
        assert_eq!(ExitStatus::Exited(3).shell_code(), 3);
        assert_eq!(ExitStatus::Signaled(15).shell_code(), 143);
    }

    #[test]
    fn test_from_wait_status() {
        let pid = Pid::from_raw(1234);
        assert_eq!(
            ExitStatus::from(WaitStatus::Exited(pid, 42)),
            ExitStatus::Exited(42)
        );
        assert_eq!(
            ExitStatus::from(WaitStatus::Signaled(pid, Signal::SIGKILL, false)),
            ExitStatus::Signaled(9)
        );
        assert_eq!(
            ExitStatus::from(WaitStatus::Stopped(pid, Signal::SIGSTOP)),
            ExitStatus::Other
        );
        assert_eq!(ExitStatus::from(WaitStatus::StillAlive), ExitStatus::Other);
    }

    #[test]
    fn test_success() {
        assert!(ExitStatus::Exited(0).success());
        assert!(!ExitStatus::Exited(1).success());
        assert!(!ExitStatus::Signaled(2).success());
    }

    #[test]
    fn test_wait_on_non_child_decodes_as_other() {
        // pid 1 is never a child of the test process
        assert_eq!(wait(ChildPid::from_raw(1)), ExitStatus::Other);
    }
}
