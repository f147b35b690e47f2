//! Command-line interface definitions and helpers.
//!
//! This module contains CLI argument parsing, the interactive action
//! parser and the subcommand handlers.

mod args;
mod commands;
mod repl;

pub use args::{Args, Command, ConfigAction, SessionArgs};
pub use commands::{
    build_session, handle_config_action, list_devices, run_interactive, run_preview,
    CommandResult,
};
pub use repl::{ReplCommand, HELP};
