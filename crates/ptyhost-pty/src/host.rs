//! Raw-integer boundary for terminal hosts
//!
//! Hosts that keep sessions as a plain `(fd, pid)` pair (for example a
//! foreign-function layer) call these instead of the typed API. Ownership of
//! the returned descriptor and pid passes to the host: it must `close` the
//! descriptor exactly once and `wait` on the pid exactly once.

use std::ffi::OsStr;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::Path;

use crate::command::CommandSpec;
use crate::reap::{self, ChildPid};
use crate::size::TerminalSize;
use crate::spawn::Session;
use crate::{fds, pty, SpawnError};

/// Spawn `path` with the full argument vector `argv` (including `argv[0]`),
/// exactly the `KEY=VALUE` entries in `env`, in `cwd`.
///
/// Returns `(master_fd, pid)`.
#[allow(clippy::too_many_arguments)]
pub fn spawn<A, E>(
    path: impl AsRef<Path>,
    argv: &[A],
    env: &[E],
    cwd: impl AsRef<Path>,
    rows: i32,
    cols: i32,
    cell_width: i32,
    cell_height: i32,
) -> Result<(RawFd, i32), SpawnError>
where
    A: AsRef<OsStr>,
    E: AsRef<OsStr>,
{
    let spec = CommandSpec::new(path).with_argv(argv).envs(env).cwd(cwd);
    let size = TerminalSize::from_host(rows, cols, cell_width, cell_height);
    let Session { master, child } = crate::spawn::spawn(&spec, size)?;
    Ok((master.into_raw_fd(), child.as_raw()))
}

pub fn resize(fd: RawFd, rows: i32, cols: i32, cell_width: i32, cell_height: i32) {
    pty::resize(fd, TerminalSize::from_host(rows, cols, cell_width, cell_height));
}

pub fn ensure_utf8(fd: RawFd) {
    pty::ensure_utf8(fd);
}

/// Block until `pid` terminates; exit code, or negated signal number.
pub fn wait(pid: i32) -> i32 {
    reap::wait(ChildPid::from_raw(pid)).code()
}

pub fn close(fd: RawFd) {
    fds::close(fd);
}
