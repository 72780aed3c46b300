//! CLI argument structures and parsing.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::config_cmd::ConfigCli;
use crate::status_cmd::StatusCli;
use crate::sync_cmd::SyncCli;

/// Log verbosity level for CLI output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevel {
    /// Only show errors
    Error,
    /// Show warnings and errors (default)
    #[default]
    Warn,
    /// Show informational messages, warnings, and errors
    Info,
    /// Show debug messages and above
    Debug,
    /// Show all messages including trace-level details
    Trace,
}

impl LogLevel {
    /// Convert to tracing filter string.
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Parse from string (case-insensitive).
    pub fn from_str_loose(s: &str) -> Option<LogLevel> {
        match s.to_lowercase().as_str() {
            "error" => Some(LogLevel::Error),
            "warn" | "warning" => Some(LogLevel::Warn),
            "info" => Some(LogLevel::Info),
            "debug" => Some(LogLevel::Debug),
            "trace" => Some(LogLevel::Trace),
            _ => None,
        }
    }
}

/// EPTA - keeps the installed client content in step with the published release
#[derive(Debug, Parser)]
#[command(name = "epta")]
#[command(author, version)]
#[command(about = "Keep the EPTA client content up to date", long_about = None)]
pub struct Cli {
    /// Enable verbose output (same as --log-level debug)
    #[arg(long = "verbose", short = 'v', global = true)]
    pub verbose: bool,

    /// Enable trace-level logging for debugging
    #[arg(long = "trace", global = true)]
    pub trace: bool,

    /// Set log verbosity level (error, warn, info, debug, trace) [default: warn]
    #[arg(
        long = "log-level",
        short = 'L',
        value_enum,
        global = true,
        help_heading = "Debugging"
    )]
    pub log_level: Option<LogLevel>,

    /// Write logs to a file instead of stderr. Without a value the file goes
    /// to the EPTA logs directory.
    #[arg(
        long = "log-file",
        value_name = "PATH",
        num_args = 0..=1,
        global = true,
        help_heading = "Debugging"
    )]
    pub log_file: Option<Option<PathBuf>>,

    /// Engine configuration file (defaults to sync.json in the EPTA config dir)
    #[arg(long = "config", value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// State record (defaults to config.json in the EPTA config dir)
    #[arg(long = "state-file", value_name = "PATH", global = true)]
    pub state_file: Option<PathBuf>,

    /// Directory the content is installed into
    #[arg(
        long = "install-dir",
        value_name = "DIR",
        env = "EPTA_INSTALL_DIR",
        global = true
    )]
    pub install_dir: Option<PathBuf>,

    /// Release manifest endpoint
    #[arg(
        long = "release-url",
        value_name = "URL",
        env = "EPTA_RELEASE_URL",
        global = true
    )]
    pub release_url: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Level to log at: `--trace`, then `-v`, then an explicit
    /// `--log-level`, then `EPTA_LOG_LEVEL`, then warn.
    pub fn effective_log_level(&self, env_level: Option<&str>) -> LogLevel {
        if self.trace {
            LogLevel::Trace
        } else if self.verbose {
            LogLevel::Debug
        } else if let Some(level) = self.log_level {
            level
        } else {
            env_level
                .and_then(LogLevel::from_str_loose)
                .unwrap_or_default()
        }
    }
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Install or update the content to the latest release
    #[command(visible_alias = "update")]
    Sync(SyncCli),

    /// Show the installation state
    Status(StatusCli),

    /// Show or initialise the engine configuration
    Config(ConfigCli),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_loose_parse() {
        assert_eq!(LogLevel::from_str_loose("WARNING"), Some(LogLevel::Warn));
        assert_eq!(LogLevel::from_str_loose("Trace"), Some(LogLevel::Trace));
        assert_eq!(LogLevel::from_str_loose("loud"), None);
    }

    #[test]
    fn test_explicit_log_level_beats_environment() {
        let cli = Cli::try_parse_from(["epta", "--log-level", "error", "status"]).unwrap();
        assert_eq!(cli.effective_log_level(Some("debug")), LogLevel::Error);

        let cli = Cli::try_parse_from(["epta", "status"]).unwrap();
        assert_eq!(cli.effective_log_level(Some("debug")), LogLevel::Debug);
        assert_eq!(cli.effective_log_level(Some("loud")), LogLevel::Warn);
        assert_eq!(cli.effective_log_level(None), LogLevel::Warn);

        let cli = Cli::try_parse_from(["epta", "-L", "info", "--trace", "status"]).unwrap();
        assert_eq!(cli.effective_log_level(None), LogLevel::Trace);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "epta",
            "sync",
            "--install-dir",
            "/games/epta",
            "--release-url",
            "http://mirror/release.json",
            "-v",
        ])
        .unwrap();

        assert!(matches!(cli.command, Commands::Sync(_)));
        assert_eq!(cli.install_dir, Some(PathBuf::from("/games/epta")));
        assert_eq!(
            cli.release_url.as_deref(),
            Some("http://mirror/release.json")
        );
        assert!(cli.verbose);
    }

    #[test]
    fn test_log_file_optional_value() {
        let cli = Cli::try_parse_from(["epta", "--log-file", "/tmp/epta.log", "status"]).unwrap();
        assert_eq!(cli.log_file, Some(Some(PathBuf::from("/tmp/epta.log"))));

        let cli = Cli::try_parse_from(["epta", "status", "--log-file"]).unwrap();
        assert_eq!(cli.log_file, Some(None));
        assert!(matches!(cli.command, Commands::Status(_)));
    }

    #[test]
    fn test_status_check_flag() {
        let cli = Cli::try_parse_from(["epta", "status", "--check"]).unwrap();
        match cli.command {
            Commands::Status(status) => assert!(status.check),
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_subcommand_required() {
        assert!(Cli::try_parse_from(["epta"]).is_err());
    }
}
