//! Command-line terminal host for Ptyhost
//!
//! Runs a program inside a pty attached to the user's terminal.

pub mod cli;
pub mod relay;
pub mod terminal_guard;
