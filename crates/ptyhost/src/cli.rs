//! Command-line arguments, logging setup and the top-level `run`

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use ptyhost_pty::{CommandSpec, PtySession, TerminalSize};
use std::ffi::OsString;
use std::os::unix::ffi::OsStrExt;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::relay;
use crate::terminal_guard::TerminalGuard;

/// Environment variable holding a full `tracing` filter directive
pub const LOG_ENV: &str = "PTYHOST_LOG";

const FALLBACK_SHELL: &str = "/bin/sh";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_directive(self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a program on a pseudo-terminal attached to this one")]
pub struct Args {
    /// Working directory of the program
    #[arg(long)]
    pub cwd: Option<PathBuf>,

    /// Extra environment entry, KEY=VALUE (repeatable)
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env_entry)]
    pub env: Vec<(String, String)>,

    /// Do not pass this process's environment on to the program
    #[arg(long)]
    pub clear_env: bool,

    /// Value of TERM in the program's environment
    #[arg(long, default_value = "xterm-256color")]
    pub term: String,

    /// Rows (default: current terminal)
    #[arg(long)]
    pub rows: Option<u16>,

    /// Columns (default: current terminal)
    #[arg(long)]
    pub cols: Option<u16>,

    /// Cell width in pixels (default: current terminal)
    #[arg(long)]
    pub cell_width: Option<u16>,

    /// Cell height in pixels (default: current terminal)
    #[arg(long)]
    pub cell_height: Option<u16>,

    /// Log level, overridden by PTYHOST_LOG
    #[arg(long, value_enum, default_value = "warn")]
    pub log_level: LogLevel,

    /// Write logs to this file; without it nothing is logged
    #[arg(long)]
    pub log_file: Option<PathBuf>,

    /// Program and its arguments (default: $SHELL)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<OsString>,
}

fn parse_env_entry(entry: &str) -> Result<(String, String), String> {
    match entry.split_once('=') {
        Some((key, _)) if key.is_empty() => Err(format!("empty variable name in '{entry}'")),
        Some((key, value)) => Ok((key.to_string(), value.to_string())),
        None => Err(format!("expected KEY=VALUE, got '{entry}'")),
    }
}

impl Args {
    /// Program to run plus its argument vector, `argv[0]` included
    pub fn command_line(&self) -> (OsString, Vec<OsString>) {
        match self.command.first() {
            Some(program) => (program.clone(), self.command.clone()),
            None => {
                let shell = std::env::var_os("SHELL")
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| OsString::from(FALLBACK_SHELL));
                (shell.clone(), vec![shell])
            }
        }
    }

    /// Environment of the program: the inherited one unless `--clear-env`,
    /// then `TERM`, then every `--env` entry. Later entries replace earlier
    /// ones with the same name.
    pub fn environment(&self) -> Vec<OsString> {
        self.command_spec().env_entries().to_vec()
    }

    pub fn command_spec(&self) -> CommandSpec {
        let (program, argv) = self.command_line();
        let mut spec = CommandSpec::new(program).with_argv(argv);
        if !self.clear_env {
            spec = spec.inherit_env();
        }
        spec = spec.set_env("TERM", &self.term);
        for (key, value) in &self.env {
            spec = spec.set_env(key, value);
        }
        match &self.cwd {
            Some(cwd) => spec.cwd(cwd),
            None => spec,
        }
    }

    /// Geometry for the new pty: explicit flags first, then the host
    /// terminal, then 24x80.
    pub fn terminal_size(&self) -> TerminalSize {
        let host = host_terminal_size();
        TerminalSize::new(
            self.rows.unwrap_or(host.rows),
            self.cols.unwrap_or(host.cols),
        )
        .with_cell_size(
            self.cell_width.unwrap_or(host.cell_width),
            self.cell_height.unwrap_or(host.cell_height),
        )
    }
}

/// Current geometry of the controlling terminal, if there is one
pub fn host_terminal_size() -> TerminalSize {
    if let Ok(ws) = crossterm::terminal::window_size() {
        if ws.rows > 0 && ws.columns > 0 {
            let (cell_width, cell_height) = if ws.width > 0 && ws.height > 0 {
                (ws.width / ws.columns, ws.height / ws.rows)
            } else {
                (0, 0)
            };
            return TerminalSize::new(ws.rows, ws.columns).with_cell_size(cell_width, cell_height);
        }
    }

    match crossterm::terminal::size() {
        Ok((cols, rows)) if rows > 0 && cols > 0 => TerminalSize::new(rows, cols),
        _ => TerminalSize::default(),
    }
}

/// Install the global subscriber. Logging only ever goes to a file, since
/// stdout and stderr belong to the program on the pty.
pub fn init_logging(args: &Args) -> Result<()> {
    let Some(path) = &args.log_file else {
        return Ok(());
    };

    let filter = EnvFilter::try_from_env(LOG_ENV)
        .unwrap_or_else(|_| EnvFilter::new(args.log_level.as_directive()));
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file: {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

/// Parse arguments, run the program and return the status to exit with.
pub async fn run() -> Result<i32> {
    let args = Args::parse();
    init_logging(&args)?;

    let spec = args.command_spec();
    if spec.program().as_os_str().as_bytes().is_empty() {
        bail!("no program to run");
    }
    let size = args.terminal_size();
    info!(
        program = %spec.program().display(),
        rows = size.rows,
        cols = size.cols,
        "starting"
    );

    let (mut session, events) = PtySession::spawn(&spec, size)
        .with_context(|| format!("Failed to start {}", spec.program().display()))?;
    session.start().context("Failed to start session tasks")?;

    let mut guard = TerminalGuard::acquire();
    if let Err(e) = guard.enable_raw_mode() {
        warn!("could not enter raw mode: {}", e);
    }

    let status = relay::run(&session, events).await;
    drop(guard);
    session.close();

    let status = status?;
    info!(%status, "program finished");
    Ok(status.shell_code())
}
