//! Command dispatch.
//!
//! Global flags are resolved once into a [`RunContext`] and handed to the
//! subcommand.

use anyhow::{Context, Result};
use std::path::PathBuf;

use epta_sync::{StateStore, SyncConfig};

use super::args::{Cli, Commands};

/// Settings shared by every subcommand, after flags, environment and files
/// are combined.
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Effective engine configuration
    pub config: SyncConfig,
    /// Where the configuration is read from and written to
    pub config_path: Option<PathBuf>,
    pub store: StateStore,
    /// `--install-dir` / `EPTA_INSTALL_DIR`, when given
    pub install_dir: Option<PathBuf>,
}

impl RunContext {
    /// Resolve the context from parsed arguments.
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let config_path = cli.config.clone().or_else(|| {
            epta_common::get_app_dirs().map(|dirs| dirs.sync_config_file())
        });
        let mut config = match &config_path {
            Some(path) => SyncConfig::load_from(path),
            None => SyncConfig::default(),
        };
        if let Some(url) = &cli.release_url {
            config.release_url = url.clone();
        }

        let store = match &cli.state_file {
            Some(path) => StateStore::with_path(path),
            None => StateStore::default_location()
                .context("Could not determine the config directory; pass --state-file")?,
        };

        Ok(Self {
            config,
            config_path,
            store,
            install_dir: cli.install_dir.clone(),
        })
    }
}

/// Dispatch a CLI command to its handler.
pub async fn dispatch_command(cli: Cli) -> Result<()> {
    let ctx = RunContext::from_cli(&cli)?;
    tracing::debug!(
        "State record {}, release endpoint {}",
        ctx.store.path().display(),
        ctx.config.release_url
    );

    match cli.command {
        Commands::Sync(sync_cli) => sync_cli.run(ctx).await,
        Commands::Status(status_cli) => status_cli.run(ctx).await,
        Commands::Config(config_cli) => config_cli.run(ctx),
    }
}
