//! Byte relay between the user's terminal and a pty session

use anyhow::{Context, Result};
use ptyhost_pty::{ExitStatus, PtySession, SessionEvent};
use std::io::{IsTerminal, Read};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::cli::host_terminal_size;

/// How long output is still collected after the child has been reaped
pub const DRAIN_TIMEOUT: Duration = Duration::from_millis(200);

/// Terminal EOF character, sent when a non-terminal stdin runs dry
const EOF_CHAR: u8 = 0x04;

/// Relay until the child exits, then return its status.
pub async fn run(
    session: &PtySession,
    mut events: mpsc::UnboundedReceiver<SessionEvent>,
) -> Result<ExitStatus> {
    let mut stdout = tokio::io::stdout();
    let mut input_rx = spawn_stdin_reader();
    let mut winch = signal(SignalKind::window_change()).context("Failed to watch SIGWINCH")?;
    let interactive = std::io::stdin().is_terminal();

    let mut stdin_open = true;
    let mut closed = false;
    let status = loop {
        tokio::select! {
            input = input_rx.recv(), if stdin_open => match input {
                Some(bytes) => {
                    trace!(len = bytes.len(), "stdin");
                    // The slave may already be gone; the exit status still follows
                    if let Err(e) = session.write_input(&bytes).await {
                        debug!("pty write failed: {}", e);
                        stdin_open = false;
                    }
                }
                None => {
                    debug!("stdin closed");
                    if !interactive {
                        if let Err(e) = session.write_input(&[EOF_CHAR]).await {
                            debug!("pty write failed: {}", e);
                        }
                    }
                    stdin_open = false;
                }
            },

            event = events.recv() => match event {
                Some(SessionEvent::Output(bytes)) => write_output(&mut stdout, &bytes).await?,
                Some(SessionEvent::Exited(status)) => break status,
                Some(SessionEvent::Closed) => closed = true,
                Some(SessionEvent::Error(e)) => {
                    warn!("pty read failed: {}", e);
                    closed = true;
                }
                None => {
                    warn!("session ended without an exit status");
                    break ExitStatus::Other;
                }
            },

            _ = winch.recv() => {
                let size = host_terminal_size();
                debug!(rows = size.rows, cols = size.cols, "window changed");
                session.resize(size);
            }
        }
    };

    if !closed {
        drain(&mut events, &mut stdout).await?;
    }
    Ok(status)
}

/// Copy what is left in the pty until it hangs up or [`DRAIN_TIMEOUT`] passes.
pub async fn drain<W>(events: &mut mpsc::UnboundedReceiver<SessionEvent>, out: &mut W) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let drained = tokio::time::timeout(DRAIN_TIMEOUT, async {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Output(bytes) => write_output(out, &bytes).await?,
                SessionEvent::Closed | SessionEvent::Error(_) => break,
                SessionEvent::Exited(_) => {}
            }
        }
        Ok::<_, anyhow::Error>(())
    })
    .await;

    match drained {
        Ok(result) => result,
        Err(_) => {
            debug!("output drain timed out");
            Ok(())
        }
    }
}

async fn write_output<W>(out: &mut W, bytes: &[u8]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    out.write_all(bytes).await.context("Failed to write to stdout")?;
    out.flush().await.context("Failed to flush stdout")?;
    Ok(())
}

/// Read stdin on a blocking thread. The channel closes on EOF or error.
fn spawn_stdin_reader() -> mpsc::Receiver<Vec<u8>> {
    let (tx, rx) = mpsc::channel(64);
    tokio::task::spawn_blocking(move || {
        let mut stdin = std::io::stdin().lock();
        let mut buffer = [0u8; 4096];
        loop {
            match stdin.read(&mut buffer) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.blocking_send(buffer[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    debug!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });
    rx
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_stops_at_hangup() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::Output(b"tail ".to_vec())).unwrap();
        tx.send(SessionEvent::Output(b"end".to_vec())).unwrap();
        tx.send(SessionEvent::Closed).unwrap();
        tx.send(SessionEvent::Output(b"after".to_vec())).unwrap();

        let mut out = Vec::new();
        drain(&mut rx, &mut out).await.unwrap();
        assert_eq!(out, b"tail end");
    }

    #[tokio::test]
    async fn test_drain_gives_up_after_timeout() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(SessionEvent::Output(b"partial".to_vec())).unwrap();

        let mut out = Vec::new();
        let started = std::time::Instant::now();
        drain(&mut rx, &mut out).await.unwrap();
        assert!(started.elapsed() >= DRAIN_TIMEOUT);
        assert_eq!(out, b"partial");
        drop(tx);
    }
}
