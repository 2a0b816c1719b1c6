//! CLI module for execrelay
//!
//! Provides command-line interface with the following subcommands:
//! - `run` - Run a command and print its captured output
//! - `stream` - Relay output live while the command runs
//! - `tty` - Run attached to the terminal
//! - `tokenize` - Show how a command line splits
//! - `script` - Run a PowerShell, Bash or Python script
//! - `config` - Show configuration

pub mod commands;

pub use commands::{Cli, Commands};
