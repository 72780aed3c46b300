//! CLI argument parsing and command dispatch.
//!
//! - `args` - Command-line argument structures
//! - `handlers` - Shared run context and subcommand dispatch

pub mod args;
pub mod handlers;

pub use args::{Cli, Commands, LogLevel};
pub use handlers::{RunContext, dispatch_command};
