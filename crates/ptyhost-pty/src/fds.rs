//! Descriptor-table scanning and closing
//!
//! [`close_inherited`] runs in a freshly forked child, so it only issues raw
//! syscalls and works out of a stack buffer. No heap, no locks.

use std::os::unix::io::RawFd;

use tracing::debug;

/// Close `fd`, ignoring any error.
///
/// Call at most once per descriptor: once closed, the number may be handed
/// out again to an unrelated open elsewhere in the process.
pub fn close(fd: RawFd) {
    if let Err(e) = nix::unistd::close(fd) {
        debug!(fd, error = %e, "close failed");
    }
}

/// Close every open descriptor above stderr, as listed by the kernel.
///
/// # Safety
///
/// Only sound in a single-threaded process about to `exec`, i.e. the child
/// side of `fork`. Any `OwnedFd` or `File` still alive in the address space
/// ends up pointing at a closed number.
#[cfg(any(target_os = "linux", target_os = "android"))]
pub unsafe fn close_inherited() {
    let dir = libc::open(
        b"/proc/self/fd\0".as_ptr().cast(),
        libc::O_RDONLY | libc::O_DIRECTORY | libc::O_CLOEXEC,
    );
    if dir < 0 {
        return;
    }

    let mut buf = [0u8; 2048];
    loop {
        let n = libc::syscall(libc::SYS_getdents64, dir, buf.as_mut_ptr(), buf.len());
        if n <= 0 {
            break;
        }
        for name in DirentNames::new(&buf[..n as usize]) {
            match parse_fd(name) {
                Some(fd) if fd > libc::STDERR_FILENO && fd != dir => {
                    libc::close(fd);
                }
                _ => {}
            }
        }
    }
    libc::close(dir);
}

/// Close every descriptor above stderr up to the descriptor limit.
///
/// # Safety
///
/// Same contract as the Linux variant.
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub unsafe fn close_inherited() {
    // No /proc here to enumerate the table.
    let max = match libc::sysconf(libc::_SC_OPEN_MAX) {
        n if n > 0 => n as RawFd,
        _ => 1024,
    };
    for fd in (libc::STDERR_FILENO + 1)..max {
        libc::close(fd);
    }
}

/// Iterates the entry names in a buffer filled by `getdents64`.
///
/// Record layout: `d_ino: u64`, `d_off: i64`, `d_reclen: u16`,
/// `d_type: u8`, then the NUL-terminated name padded out to `d_reclen`.
pub struct DirentNames<'a> {
    buf: &'a [u8],
    offset: usize,
}

const DIRENT_RECLEN_OFFSET: usize = 16;
const DIRENT_NAME_OFFSET: usize = 19;

impl<'a> DirentNames<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, offset: 0 }
    }
}

impl<'a> Iterator for DirentNames<'a> {
    type Item = &'a [u8];

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.buf.get(self.offset..)?;
        if record.len() <= DIRENT_NAME_OFFSET {
            return None;
        }
        let reclen = u16::from_ne_bytes([
            record[DIRENT_RECLEN_OFFSET],
            record[DIRENT_RECLEN_OFFSET + 1],
        ]) as usize;
        if reclen <= DIRENT_NAME_OFFSET || reclen > record.len() {
            return None;
        }
        self.offset += reclen;

        let name = &record[DIRENT_NAME_OFFSET..reclen];
        let end = name.iter().position(|&b| b == 0).unwrap_or(name.len());
        Some(&name[..end])
    }
}

/// Parse a decimal descriptor number; `.`, `..` and anything else yield `None`.
pub fn parse_fd(name: &[u8]) -> Option<RawFd> {
    if name.is_empty() {
        return None;
    }
    let mut fd: RawFd = 0;
    for &b in name {
        if !b.is_ascii_digit() {
            return None;
        }
        fd = fd.checked_mul(10)?.checked_add(RawFd::from(b - b'0'))?;
    }
    Some(fd)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str) -> Vec<u8> {
        let unpadded = DIRENT_NAME_OFFSET + name.len() + 1;
        let reclen = (unpadded + 7) & !7;
        let mut rec = vec![0u8; reclen];
        rec[0..8].copy_from_slice(&42u64.to_ne_bytes());
        rec[DIRENT_RECLEN_OFFSET..DIRENT_RECLEN_OFFSET + 2]
            .copy_from_slice(&(reclen as u16).to_ne_bytes());
        rec[DIRENT_NAME_OFFSET..DIRENT_NAME_OFFSET + name.len()].copy_from_slice(name.as_bytes());
        rec
    }

    #[test]
    fn test_dirent_names() {
        let mut buf = Vec::new();
        for name in [".", "..", "0", "17", "1024"] {
            buf.extend(record(name));
        }
        let names: Vec<&[u8]> = DirentNames::new(&buf).collect();
        assert_eq!(
            names,
            vec![&b"."[..], &b".."[..], &b"0"[..], &b"17"[..], &b"1024"[..]]
        );
    }

    #[test]
    fn test_dirent_truncated_record_stops() {
        let mut buf = record("5");
        buf.truncate(DIRENT_NAME_OFFSET + 1);
        // reclen points past the end of the buffer
        assert_eq!(DirentNames::new(&buf).count(), 0);
    }

    #[test]
    fn test_parse_fd() {
        assert_eq!(parse_fd(b"0"), Some(0));
        assert_eq!(parse_fd(b"255"), Some(255));
        assert_eq!(parse_fd(b"."), None);
        assert_eq!(parse_fd(b".."), None);
        assert_eq!(parse_fd(b""), None);
        assert_eq!(parse_fd(b"12a"), None);
        assert_eq!(parse_fd(b"99999999999"), None);
    }

    #[test]
    fn test_close_invalid_is_silent() {
        close(-1);
        close(RawFd::MAX);
    }
}
