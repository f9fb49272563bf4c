//! Async session management
//!
//! Wraps a spawned [`Session`] for tokio hosts: output and termination arrive
//! as [`SessionEvent`]s, the reaper runs on a blocking task of its own.

use crate::{
    pty::{self, AsyncPtyMaster},
    reap::{self, ExitStatus},
    spawn::{self, Session},
    CommandSpec, PtyError, SpawnError, TerminalSize,
};
use nix::unistd::Pid;
use std::os::unix::io::{AsRawFd, OwnedFd};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Events that can occur in a PTY session
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// Bytes the child wrote to its terminal
    Output(Vec<u8>),

    /// The slave side hung up; no more output will arrive
    Closed,

    /// The child was reaped
    Exited(ExitStatus),

    /// Reading the master failed
    Error(String),
}

/// A pty session driven from a tokio runtime
pub struct PtySession {
    master: OwnedFd,

    pid: Pid,

    /// Taken by `start`
    child: Option<reap::ChildPid>,

    /// Event sender
    event_tx: mpsc::UnboundedSender<SessionEvent>,

    /// Shutdown signal
    shutdown_tx: watch::Sender<bool>,

    /// Write side of the master (set after start)
    writer: Option<Arc<Mutex<AsyncPtyMaster>>>,

    tasks: Vec<JoinHandle<()>>,
}

impl PtySession {
    /// Spawn `spec` on a new pty. Nothing is read or reaped until [`start`].
    ///
    /// [`start`]: PtySession::start
    pub fn spawn(
        spec: &CommandSpec,
        size: TerminalSize,
    ) -> Result<(Self, mpsc::UnboundedReceiver<SessionEvent>), SpawnError> {
        let Session { master, child } = spawn::spawn(spec, size)?;
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _shutdown_rx) = watch::channel(false);

        let session = Self {
            master,
            pid: child.pid(),
            child: Some(child),
            event_tx,
            shutdown_tx,
            writer: None,
            tasks: Vec::new(),
        };

        Ok((session, event_rx))
    }

    /// Start the reader task and the reaper task.
    ///
    /// Must be called from within a tokio runtime. A second call is a no-op.
    pub fn start(&mut self) -> Result<(), PtyError> {
        let Some(child) = self.child.take() else {
            return Ok(());
        };

        let reader = AsyncPtyMaster::from_fd(&self.master)?;
        self.writer = Some(Arc::new(Mutex::new(AsyncPtyMaster::from_fd(&self.master)?)));

        let read_tx = self.event_tx.clone();
        let mut shutdown_rx = self.shutdown_tx.subscribe();
        let read_task = tokio::spawn(async move {
            let mut reader = reader;
            let mut buffer = vec![0u8; 4096];

            loop {
                tokio::select! {
                    result = reader.read(&mut buffer) => {
                        match result {
                            Ok(0) => {
                                debug!("PTY closed");
                                let _ = read_tx.send(SessionEvent::Closed);
                                break;
                            }
                            Ok(n) => {
                                if read_tx.send(SessionEvent::Output(buffer[..n].to_vec())).is_err() {
                                    break;
                                }
                            }
                            // Linux reports a hung-up slave as EIO
                            Err(e) if e.raw_os_error() == Some(libc::EIO) => {
                                debug!("PTY slave hung up");
                                let _ = read_tx.send(SessionEvent::Closed);
                                break;
                            }
                            Err(e) => {
                                error!("PTY read error: {}", e);
                                let _ = read_tx.send(SessionEvent::Error(e.to_string()));
                                break;
                            }
                        }
                    }

                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            debug!("Session shutdown requested");
                            break;
                        }
                    }
                }
            }
        });

        let exit_tx = self.event_tx.clone();
        let wait_task = tokio::spawn(async move {
            match tokio::task::spawn_blocking(move || reap::wait(child)).await {
                Ok(status) => {
                    let _ = exit_tx.send(SessionEvent::Exited(status));
                }
                Err(e) => error!("reaper task failed: {}", e),
            }
        });

        self.tasks.push(read_task);
        self.tasks.push(wait_task);
        Ok(())
    }

    /// Send input to the PTY
    pub async fn write_input(&self, data: &[u8]) -> Result<(), PtyError> {
        if let Some(writer) = &self.writer {
            let mut writer = writer.lock().await;
            writer.write_all(data).await?;
            writer.flush().await?;
        }
        Ok(())
    }

    /// Resize the terminal; failures are ignored
    pub fn resize(&self, size: TerminalSize) {
        pty::resize(self.master.as_raw_fd(), size);
    }

    pub fn ensure_utf8(&self) {
        pty::ensure_utf8(self.master.as_raw_fd());
    }

    pub fn window_size(&self) -> Result<libc::winsize, PtyError> {
        pty::window_size(&self.master)
    }

    /// Pid of the child. Only meaningful until `Exited` has been received.
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// Stop the reader loop. The reaper keeps running until the child exits.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop reading and close every master descriptor this session holds.
    ///
    /// The reader task drops its duplicate as soon as it sees the shutdown;
    /// once the last descriptor is gone the child's terminal hangs up.
    /// The child of a session that was never started is reaped on a
    /// background thread.
    pub fn close(mut self) {
        self.shutdown();
        if let Some(child) = self.child.take() {
            std::thread::spawn(move || reap::wait(child));
        }
        debug!(pid = %self.pid, "closing session");
    }
}

impl Drop for PtySession {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
    }
}
