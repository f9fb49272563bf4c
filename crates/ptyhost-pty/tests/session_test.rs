//! Tests for async PTY session management

use ptyhost_pty::{CommandSpec, ExitStatus, PtySession, SessionEvent, TerminalSize};
use ptyhost_test_utils::{init_test_logging, sh};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// Drain events until the child is reaped and the slave has hung up.
async fn collect_until_exit(
    events: &mut UnboundedReceiver<SessionEvent>,
) -> (String, Option<ExitStatus>) {
    let mut output = Vec::new();
    let mut status = None;
    let mut closed = false;

    let _ = timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::Output(bytes) => output.extend_from_slice(&bytes),
                SessionEvent::Exited(s) => status = Some(s),
                SessionEvent::Closed | SessionEvent::Error(_) => closed = true,
            }
            if status.is_some() && closed {
                break;
            }
        }
    })
    .await;

    (String::from_utf8_lossy(&output).into_owned(), status)
}

#[tokio::test]
async fn test_session_reports_output_and_exit() {
    init_test_logging();
    let (mut session, mut events) =
        PtySession::spawn(&sh("echo session output; exit 5"), TerminalSize::default())
            .expect("Should create session");
    session.start().expect("Should start session");

    let (output, status) = collect_until_exit(&mut events).await;
    assert!(output.contains("session output"), "got: {output:?}");
    assert_eq!(status, Some(ExitStatus::Exited(5)));
}

#[tokio::test]
async fn test_session_write_input() {
    let (mut session, mut events) =
        PtySession::spawn(&CommandSpec::new("/bin/cat"), TerminalSize::default())
            .expect("Should create session");
    session.start().unwrap();

    session.write_input(b"ping from host\n").await.unwrap();

    let mut seen = String::new();
    let found = timeout(Duration::from_secs(3), async {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Output(bytes) = event {
                seen.push_str(&String::from_utf8_lossy(&bytes));
                // once from the echo, once from cat
                if seen.matches("ping from host").count() >= 2 {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(found, "cat should echo input back, got: {seen:?}");

    // EOF at the start of a line ends cat
    session.write_input(&[0x04]).await.unwrap();
    let (_, status) = collect_until_exit(&mut events).await;
    assert_eq!(status, Some(ExitStatus::Exited(0)));
}

#[tokio::test]
async fn test_session_resize() {
    let (mut session, mut events) =
        PtySession::spawn(&sh("sleep 1"), TerminalSize::new(24, 80)).unwrap();
    session.start().unwrap();

    session.resize(TerminalSize::new(40, 120).with_cell_size(8, 16));
    let ws = session.window_size().unwrap();
    assert_eq!((ws.ws_row, ws.ws_col), (40, 120));
    assert_eq!((ws.ws_xpixel, ws.ws_ypixel), (960, 640));

    // idempotent
    session.resize(TerminalSize::new(40, 120).with_cell_size(8, 16));
    assert_eq!(session.window_size().unwrap().ws_row, 40);

    session.ensure_utf8();
    let (_, status) = collect_until_exit(&mut events).await;
    assert_eq!(status, Some(ExitStatus::Exited(0)));
}

#[tokio::test]
async fn test_session_sigwinch_reaches_child() {
    let script = r#"trap 'stty size; exit 0' WINCH; echo ready; while :; do sleep 0.1; done"#;
    let (mut session, mut events) = PtySession::spawn(&sh(script), TerminalSize::new(24, 80))
        .expect("Should create session");
    session.start().unwrap();

    let mut seen = String::new();
    let ready = timeout(Duration::from_secs(3), async {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Output(bytes) = event {
                seen.push_str(&String::from_utf8_lossy(&bytes));
                if seen.contains("ready") {
                    return true;
                }
            }
        }
        false
    })
    .await
    .unwrap_or(false);
    assert!(ready, "child never became ready: {seen:?}");

    session.resize(TerminalSize::new(33, 99));
    let (output, status) = collect_until_exit(&mut events).await;
    assert!(output.contains("33 99"), "got: {output:?}");
    assert_eq!(status, Some(ExitStatus::Exited(0)));
}

#[tokio::test]
async fn test_spawn_failure_is_synchronous() {
    let result = PtySession::spawn(
        &CommandSpec::new("/bin/echo").arg("a\0b"),
        TerminalSize::default(),
    );
    assert!(result.is_err());
}

#[tokio::test]
async fn test_close_unstarted_session() {
    let (session, _events) =
        PtySession::spawn(&sh("exit 0"), TerminalSize::default()).unwrap();
    assert!(session.pid().as_raw() > 0);
    session.close();
}

#[tokio::test]
async fn test_start_twice_is_noop() {
    let (mut session, mut events) =
        PtySession::spawn(&sh("exit 2"), TerminalSize::default()).unwrap();
    session.start().unwrap();
    session.start().unwrap();

    let (_, status) = collect_until_exit(&mut events).await;
    assert_eq!(status, Some(ExitStatus::Exited(2)));
}

#[tokio::test]
async fn test_close_hangs_up_running_child() {
    let (mut session, mut events) =
        PtySession::spawn(&CommandSpec::new("/bin/cat"), TerminalSize::default()).unwrap();
    session.start().unwrap();
    session.write_input(b"still here\n").await.unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;

    session.close();

    // Closing the last master descriptor hangs up the terminal
    let status = timeout(Duration::from_secs(5), async {
        while let Some(event) = events.recv().await {
            if let SessionEvent::Exited(status) = event {
                return Some(status);
            }
        }
        None
    })
    .await
    .expect("child should exit after close");
    assert_eq!(status, Some(ExitStatus::Signaled(libc::SIGHUP)));
}
