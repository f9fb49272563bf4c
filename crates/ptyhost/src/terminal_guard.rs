//! RAII guard for the user's terminal while it is in raw mode

use anyhow::Result;
use crossterm::terminal;
use std::io::IsTerminal;
use tracing::debug;

/// Puts stdin's terminal in raw mode and restores it when dropped.
///
/// When stdin is not a terminal the guard does nothing.
pub struct TerminalGuard {
    raw_mode_enabled: bool,
    // Raw mode is process-wide; keep the guard on the thread that set it
    _marker: std::marker::PhantomData<*const ()>,
}

impl TerminalGuard {
    pub fn acquire() -> Self {
        Self {
            raw_mode_enabled: false,
            _marker: std::marker::PhantomData,
        }
    }

    /// Enable raw mode if stdin is a terminal
    pub fn enable_raw_mode(&mut self) -> Result<()> {
        if self.raw_mode_enabled {
            return Ok(());
        }
        if !std::io::stdin().is_terminal() {
            debug!("stdin is not a terminal; leaving modes alone");
            return Ok(());
        }
        terminal::enable_raw_mode()?;
        self.raw_mode_enabled = true;
        Ok(())
    }

    pub fn disable_raw_mode(&mut self) -> Result<()> {
        if self.raw_mode_enabled {
            terminal::disable_raw_mode()?;
            self.raw_mode_enabled = false;
        }
        Ok(())
    }

    pub fn is_raw_mode(&self) -> bool {
        self.raw_mode_enabled
    }
}

impl Drop for TerminalGuard {
    fn drop(&mut self) {
        if self.raw_mode_enabled {
            let _ = terminal::disable_raw_mode();
        }
    }
}
