//! EPTA CLI library module.
//!
//! - `cli/` - argument parsing and command dispatch
//! - `sync_cmd` - runs a reconciliation and draws its progress
//! - `status_cmd` - prints the installation state and, on request, the plan
//! - `config_cmd` - shows or writes the engine configuration

pub mod cli;
pub mod config_cmd;
pub mod status_cmd;
pub mod sync_cmd;
