//! EPTA CLI - Main entry point.
//!
//! Parses arguments, initialises logging and hands over to the subcommand.
//! Logs go to stderr so the progress line on stdout stays readable.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use epta_cli::cli::{Cli, LogLevel, dispatch_command};

const LOG_FILE_NAME: &str = "epta.log";

/// Keeps the non-blocking log writer flushing until the process exits.
struct LogFileGuard {
    _guard: tracing_appender::non_blocking::WorkerGuard,
}

/// `RUST_LOG` wins; otherwise the level applies to the EPTA crates and
/// dependencies only report errors.
fn env_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = level.as_filter_str();
        EnvFilter::new(format!(
            "error,epta_cli={level},epta_sync={level},epta_common={level}"
        ))
    })
}

fn resolve_log_file(requested: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(path) = requested {
        return Ok(path);
    }
    let dirs = epta_common::get_app_dirs()
        .context("Could not determine the logs directory; pass --log-file <PATH>")?;
    dirs.ensure_dirs()
        .with_context(|| format!("Failed to create {}", dirs.logs_dir.display()))?;
    Ok(dirs.logs_dir.join(LOG_FILE_NAME))
}

fn init_tracing(cli: &Cli) -> Result<Option<LogFileGuard>> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_level = std::env::var("EPTA_LOG_LEVEL").ok();
    let filter = env_filter(cli.effective_log_level(env_level.as_deref()));

    let Some(requested) = cli.log_file.clone() else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(None);
    };

    let path = resolve_log_file(requested)?;
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let file_name = path
        .file_name()
        .with_context(|| format!("Not a file path: {}", path.display()))?;

    let appender = tracing_appender::rolling::never(&dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(appender);

    let file_layer = tracing_subscriber::fmt::layer()
        .with_writer(non_blocking)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true);

    tracing_subscriber::registry()
        .with(filter)
        .with(file_layer)
        .init();

    Ok(Some(LogFileGuard { _guard: guard }))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let _log_guard = init_tracing(&cli)?;

    tracing::debug!("epta {}", epta_sync::CURRENT_VERSION);
    dispatch_command(cli).await
}
