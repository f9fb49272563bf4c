//! Pty master allocation and master-side controls
//!
//! Covers opening and configuring a new master/slave pair, window geometry
//! and the UTF-8 input flag. The raw-descriptor forms (`resize`,
//! `ensure_utf8`) are best-effort and never fail the caller.

use std::ffi::CString;
use std::io;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, FromRawFd, IntoRawFd, OwnedFd, RawFd};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, FdFlag, OFlag};
use nix::pty::{grantpt, posix_openpt, unlockpt, PtyMaster};
use nix::sys::termios::{self, InputFlags, SetArg};
use tokio::io::unix::AsyncFd;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tracing::{debug, warn};

use crate::size::TerminalSize;
use crate::PtyError;

/// A freshly allocated pty: the master descriptor and the slave's device path.
#[derive(Debug)]
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave_name: CString,
}

/// Open and configure a new pty pair.
///
/// The master is close-on-exec, has `IUTF8` set and `IXON`/`IXOFF` cleared,
/// and already carries `size` so the child sees the right geometry on its
/// first read. Only open/grant/unlock/name failures are errors; termios and
/// window-size failures are logged.
pub fn allocate(size: TerminalSize) -> Result<PtyPair, PtyError> {
    let master = open_master()?;
    grantpt(&master).map_err(PtyError::Grant)?;
    unlockpt(&master).map_err(PtyError::Unlock)?;
    let slave_name = slave_name(&master)?;

    // SAFETY: the descriptor comes straight out of `PtyMaster`, which gives up ownership.
    let master = unsafe { OwnedFd::from_raw_fd(master.into_raw_fd()) };

    if let Err(e) = configure_master(master.as_fd()) {
        warn!(error = %e, "failed to configure pty termios");
    }
    if let Err(e) = set_window_size(&master, size) {
        warn!(error = %e, "failed to set initial pty window size");
    }

    debug!(
        fd = master.as_raw_fd(),
        slave = %slave_name.to_string_lossy(),
        rows = size.rows,
        cols = size.cols,
        "allocated pty"
    );
    Ok(PtyPair { master, slave_name })
}

fn open_master() -> Result<PtyMaster, PtyError> {
    let mut flags = OFlag::O_RDWR | OFlag::O_NOCTTY;
    // macOS rejects any extra flag in posix_openpt
    if cfg!(any(target_os = "linux", target_os = "android")) {
        flags |= OFlag::O_CLOEXEC;
    }
    let master = posix_openpt(flags).map_err(PtyError::Open)?;
    fcntl(master.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)).map_err(PtyError::Open)?;
    Ok(master)
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn slave_name(master: &PtyMaster) -> Result<CString, PtyError> {
    let name = nix::pty::ptsname_r(master).map_err(PtyError::SlaveName)?;
    CString::new(name).map_err(|_| PtyError::SlaveName(Errno::EINVAL))
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn slave_name(master: &PtyMaster) -> Result<CString, PtyError> {
    // SAFETY: no other thread in this crate calls ptsname concurrently.
    let name = unsafe { nix::pty::ptsname(master) }.map_err(PtyError::SlaveName)?;
    CString::new(name).map_err(|_| PtyError::SlaveName(Errno::EINVAL))
}

fn configure_master(fd: BorrowedFd<'_>) -> Result<(), PtyError> {
    let mut tios = termios::tcgetattr(fd).map_err(PtyError::Termios)?;
    tios.input_flags |= InputFlags::IUTF8;
    tios.input_flags &= !(InputFlags::IXON | InputFlags::IXOFF);
    termios::tcsetattr(fd, SetArg::TCSANOW, &tios).map_err(PtyError::Termios)
}

/// Apply `size` to the kernel's window-size state of `fd`.
pub fn set_window_size<Fd: AsFd>(fd: Fd, size: TerminalSize) -> Result<(), PtyError> {
    ioctl_set_winsize(fd.as_fd().as_raw_fd(), &size.to_winsize()).map_err(PtyError::WindowSize)
}

/// Read back the kernel's window-size state of `fd`.
pub fn window_size<Fd: AsFd>(fd: Fd) -> Result<libc::winsize, PtyError> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    let ret = unsafe { libc::ioctl(fd.as_fd().as_raw_fd(), libc::TIOCGWINSZ, &mut ws as *mut _) };
    if ret < 0 {
        return Err(PtyError::WindowSize(io::Error::last_os_error()));
    }
    Ok(ws)
}

/// Resize the terminal behind `fd`, ignoring failures such as a closed
/// descriptor. Safe to repeat and to race with I/O on the same descriptor.
pub fn resize(fd: RawFd, size: TerminalSize) {
    match ioctl_set_winsize(fd, &size.to_winsize()) {
        Ok(()) => debug!(fd, rows = size.rows, cols = size.cols, "resized pty"),
        Err(e) => debug!(fd, error = %e, "ignoring failed resize"),
    }
}

fn ioctl_set_winsize(fd: RawFd, ws: &libc::winsize) -> io::Result<()> {
    let ret = unsafe { libc::ioctl(fd, libc::TIOCSWINSZ, ws as *const _) };
    if ret < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

/// Set `IUTF8` on `fd` if it is not already set.
///
/// Returns whether the flags were changed. The read and the write are two
/// separate calls, so a concurrent termios writer can still interleave.
pub fn set_utf8_mode<Fd: AsFd>(fd: Fd) -> Result<bool, PtyError> {
    let fd = fd.as_fd();
    let mut tios = termios::tcgetattr(fd).map_err(PtyError::Termios)?;
    if tios.input_flags.contains(InputFlags::IUTF8) {
        return Ok(false);
    }
    tios.input_flags |= InputFlags::IUTF8;
    termios::tcsetattr(fd, SetArg::TCSANOW, &tios).map_err(PtyError::Termios)?;
    Ok(true)
}

pub fn is_utf8_mode<Fd: AsFd>(fd: Fd) -> Result<bool, PtyError> {
    let tios = termios::tcgetattr(fd).map_err(PtyError::Termios)?;
    Ok(tios.input_flags.contains(InputFlags::IUTF8))
}

/// Best-effort [`set_utf8_mode`] on a raw descriptor; invalid descriptors are a no-op.
pub fn ensure_utf8(fd: RawFd) {
    if fcntl(fd, FcntlArg::F_GETFD).is_err() {
        debug!(fd, "ignoring utf8 mode request on invalid descriptor");
        return;
    }
    // SAFETY: F_GETFD just confirmed the descriptor is open.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    match set_utf8_mode(borrowed) {
        Ok(changed) => debug!(fd, changed, "ensured utf8 mode"),
        Err(e) => debug!(fd, error = %e, "ignoring failed utf8 mode update"),
    }
}

/// Async wrapper for a pty master
///
/// Holds its own non-blocking duplicate of the master, registered with the
/// tokio reactor. Dropping it closes that duplicate, even while a read is
/// pending.
pub struct AsyncPtyMaster {
    inner: AsyncFd<OwnedFd>,
}

impl AsyncPtyMaster {
    /// Wrap a duplicate of `master`; the original stays with the caller.
    ///
    /// `O_NONBLOCK` lives on the open file description, so the caller's
    /// descriptor becomes non-blocking too. Must be called from within a
    /// tokio runtime.
    pub fn from_fd(master: &OwnedFd) -> io::Result<Self> {
        let dup = master.try_clone()?;
        set_nonblocking(dup.as_fd())?;
        Ok(Self {
            inner: AsyncFd::new(dup)?,
        })
    }
}

fn set_nonblocking(fd: BorrowedFd<'_>) -> io::Result<()> {
    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)?;
    let flags = OFlag::from_bits_truncate(flags) | OFlag::O_NONBLOCK;
    fcntl(fd.as_raw_fd(), FcntlArg::F_SETFL(flags))?;
    Ok(())
}

impl AsyncRead for AsyncPtyMaster {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            let mut guard = ready!(self.inner.poll_read_ready(cx))?;
            let unfilled = buf.initialize_unfilled();
            match guard.try_io(|inner| {
                nix::unistd::read(inner.as_raw_fd(), unfilled).map_err(io::Error::from)
            }) {
                Ok(Ok(n)) => {
                    buf.advance(n);
                    return Poll::Ready(Ok(()));
                }
                Ok(Err(e)) => return Poll::Ready(Err(e)),
                Err(_would_block) => continue,
            }
        }
    }
}

impl AsyncWrite for AsyncPtyMaster {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        loop {
            let mut guard = ready!(self.inner.poll_write_ready(cx))?;
            match guard.try_io(|inner| {
                nix::unistd::write(inner.get_ref(), buf).map_err(io::Error::from)
            }) {
                Ok(result) => return Poll::Ready(result),
                Err(_would_block) => continue,
            }
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}
