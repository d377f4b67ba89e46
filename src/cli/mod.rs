//! CLI module for the Halyard release manager.
//!
//! This module provides the command-line interface for installing,
//! upgrading and rolling back releases.

mod commands;
mod output;

pub use commands::{Cli, Commands, LogFormat, OutputFormat, ValuesArgs};
pub use output::OutputFormatter;
