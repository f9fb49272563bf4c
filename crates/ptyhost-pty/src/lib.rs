//! Pseudo-terminal process bridge for Ptyhost
//!
//! Allocates a pty pair, forks a child onto the slave side, and manages the
//! child's lifetime: window geometry, UTF-8 input mode, reaping and
//! descriptor cleanup.
//!
//! Failures before or during `fork` are returned synchronously as a
//! [`SpawnError`]. Everything that goes wrong in the child after `fork`
//! (a bad working directory, a missing executable) is only visible through
//! the [`ExitStatus`] obtained from [`reap::wait`].

pub mod command;
pub mod fds;
pub mod host;
pub mod pty;
pub mod reap;
pub mod session;
pub mod size;
pub mod spawn;

pub use command::{CommandSpec, ExecImage};
pub use pty::{AsyncPtyMaster, PtyPair};
pub use reap::{ChildPid, ExitStatus};
pub use session::{PtySession, SessionEvent};
pub use size::TerminalSize;
pub use spawn::{spawn, Session};

use nix::errno::Errno;
use thiserror::Error;

/// Failures while allocating or driving a pty master.
#[derive(Error, Debug)]
pub enum PtyError {
    #[error("Failed to open pty master: {0}")]
    Open(#[source] Errno),

    #[error("grantpt failed: {0}")]
    Grant(#[source] Errno),

    #[error("unlockpt failed: {0}")]
    Unlock(#[source] Errno),

    #[error("Failed to get slave pty name: {0}")]
    SlaveName(#[source] Errno),

    #[error("termios error: {0}")]
    Termios(#[source] Errno),

    #[error("Failed to set window size: {0}")]
    WindowSize(#[source] std::io::Error),

    #[error("PTY I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Synchronous failures of [`spawn`].
///
/// Nothing that happens in the child after `fork` is reported here.
#[derive(Error, Debug)]
pub enum SpawnError {
    #[error("Failed to allocate PTY: {0}")]
    PtyOpenFailed(#[from] PtyError),

    #[error("Fork failed: {0}")]
    ForkFailed(#[source] Errno),

    #[error("{what} contains an interior NUL byte (entry {index})")]
    InvalidArgument { what: &'static str, index: usize },
}
