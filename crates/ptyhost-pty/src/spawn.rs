//! Fork/exec of a child process onto a pty slave
//!
//! The parent returns as soon as `fork` does. The child runs a fixed,
//! syscall-only sequence up to `exec`: it shares no locks with the host's
//! other threads (they do not exist on its side of the fork), so anything
//! that might take one, the allocator included, is off limits there.

use std::ffi::CStr;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, OwnedFd, RawFd};

use nix::errno::Errno;
use nix::sys::signal::{signal, sigprocmask, SigHandler, SigSet, SigmaskHow, Signal};
use nix::unistd::{fork, ForkResult, Pid};
use tracing::info;

use crate::command::{CommandSpec, ExecImage};
use crate::fds;
use crate::pty::{self, PtyPair};
use crate::reap::ChildPid;
use crate::size::TerminalSize;
use crate::SpawnError;

/// Status of a child whose `exec` failed.
pub const EXEC_FAILURE_STATUS: i32 = 1;

/// Status of a child that could not open its slave device.
pub const SLAVE_OPEN_FAILURE_STATUS: i32 = 255;

extern "C" {
    static mut environ: *const *const libc::c_char;
}

/// A running child and the master side of its terminal.
///
/// `master` is valid until dropped; `child` until passed to
/// [`crate::reap::wait`].
#[derive(Debug)]
pub struct Session {
    pub master: OwnedFd,
    pub child: ChildPid,
}

impl Session {
    pub fn pid(&self) -> Pid {
        self.child.pid()
    }

    pub fn master_fd(&self) -> BorrowedFd<'_> {
        self.master.as_fd()
    }

    pub fn resize(&self, size: TerminalSize) {
        pty::resize(self.master.as_raw_fd(), size);
    }

    pub fn ensure_utf8(&self) {
        pty::ensure_utf8(self.master.as_raw_fd());
    }
}

/// Start `spec` on a new pty of the given size.
///
/// Errors cover marshalling, pty allocation and `fork` only. A failing
/// `chdir` (tolerated, reported on the pty) or `exec` (child exits with
/// [`EXEC_FAILURE_STATUS`]) surfaces later through the reaped exit status.
pub fn spawn(spec: &CommandSpec, size: TerminalSize) -> Result<Session, SpawnError> {
    let image = spec.to_exec_image()?;
    let PtyPair { master, slave_name } = pty::allocate(size)?;

    // SAFETY: the child branch never returns and only issues raw syscalls
    // on memory prepared before the fork.
    match unsafe { fork() }.map_err(SpawnError::ForkFailed)? {
        ForkResult::Parent { child } => {
            info!(
                pid = %child,
                master = master.as_raw_fd(),
                program = %spec.program().display(),
                "spawned pty child"
            );
            Ok(Session {
                master,
                child: ChildPid::new(child),
            })
        }
        ForkResult::Child => unsafe { exec_child(&image, master.as_raw_fd(), &slave_name) },
    }
}

/// Child side of [`spawn`].
///
/// # Safety
///
/// Must only run in a freshly forked child.
unsafe fn exec_child(image: &ExecImage, master: RawFd, slave_name: &CStr) -> ! {
    // The child has no channel to report failures of these two; carry on.
    // Signals masked by host threads stay masked across fork and exec.
    let _ = sigprocmask(SigmaskHow::SIG_UNBLOCK, Some(&SigSet::all()), None);
    // The Rust runtime ignores SIGPIPE and an ignored disposition survives exec.
    let _ = signal(Signal::SIGPIPE, SigHandler::SigDfl);

    libc::close(master);
    libc::setsid();

    // First tty opened by a session leader becomes its controlling terminal.
    let slave = libc::open(slave_name.as_ptr(), libc::O_RDWR);
    if slave < 0 {
        libc::_exit(SLAVE_OPEN_FAILURE_STATUS);
    }
    libc::ioctl(slave, libc::TIOCSCTTY as _, 0);

    libc::dup2(slave, libc::STDIN_FILENO);
    libc::dup2(slave, libc::STDOUT_FILENO);
    libc::dup2(slave, libc::STDERR_FILENO);

    fds::close_inherited();

    environ = image.envp_ptr();

    if libc::chdir(image.cwd().as_ptr()) != 0 {
        report(image.chdir_context(), Errno::last());
    }

    libc::execvp(image.program().as_ptr(), image.argv_ptr());

    report(image.exec_context(), Errno::last());
    libc::_exit(EXEC_FAILURE_STATUS);
}

/// `perror` without stdio: `<context>: <description>\n` straight to fd 2.
fn report(context: &[u8], errno: Errno) {
    write_stderr(context);
    write_stderr(b": ");
    write_stderr(errno.desc().as_bytes());
    write_stderr(b"\n");
}

fn write_stderr(bytes: &[u8]) {
    unsafe {
        libc::write(libc::STDERR_FILENO, bytes.as_ptr().cast(), bytes.len());
    }
}
