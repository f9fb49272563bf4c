use std::fs::File;
use std::io::{self, Read};
use std::os::unix::io::OwnedFd;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Collects everything a child writes to its terminal, read from a
/// duplicate of the master on a background thread.
pub struct OutputCollector {
    rx: mpsc::Receiver<Vec<u8>>,
    output: Vec<u8>,
    closed: bool,
}

/// Start collecting output from `master`.
pub fn collect_output(master: &OwnedFd) -> io::Result<OutputCollector> {
    let mut file = File::from(master.try_clone()?);
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match file.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                // EIO once the slave hangs up
                Err(_) => break,
            }
        }
    });

    Ok(OutputCollector {
        rx,
        output: Vec::new(),
        closed: false,
    })
}

impl OutputCollector {
    /// Wait until the output contains `needle`. Returns false on timeout or
    /// hang-up without a match.
    pub fn wait_for(&mut self, needle: &str, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.text().contains(needle) {
                return true;
            }
            if self.closed || !self.pump_until(deadline) {
                return self.text().contains(needle);
            }
        }
    }

    /// Read until the slave hangs up or `timeout` elapses, then return
    /// everything seen.
    pub fn finish(mut self, timeout: Duration) -> String {
        let deadline = Instant::now() + timeout;
        while !self.closed && self.pump_until(deadline) {}
        self.text()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.output).into_owned()
    }

    fn pump_until(&mut self, deadline: Instant) -> bool {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self.rx.recv_timeout(remaining) {
            Ok(chunk) => {
                self.output.extend_from_slice(&chunk);
                true
            }
            Err(mpsc::RecvTimeoutError::Timeout) => false,
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                self.closed = true;
                false
            }
        }
    }
}
