//! Config command: show or initialise the engine configuration.

use anyhow::{Context, Result, bail};
use clap::Parser;

use crate::cli::RunContext;

/// Config CLI command.
#[derive(Debug, Parser)]
pub struct ConfigCli {
    /// Write the effective configuration to the config file
    #[arg(long)]
    pub init: bool,

    /// Overwrite an existing config file
    #[arg(long, requires = "init")]
    pub force: bool,
}

impl ConfigCli {
    pub fn run(self, ctx: RunContext) -> Result<()> {
        if !self.init {
            println!("{}", serde_json::to_string_pretty(&ctx.config)?);
            return Ok(());
        }

        let Some(path) = ctx.config_path else {
            bail!("Could not determine the config directory; pass --config");
        };
        if path.exists() && !self.force {
            bail!(
                "{} already exists; use --force to overwrite it",
                path.display()
            );
        }
        ctx.config
            .save_to(&path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("Wrote {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use epta_sync::{StateStore, SyncConfig};

    fn context(dir: &std::path::Path) -> RunContext {
        RunContext {
            config: SyncConfig::default().with_base_url("http://mirror"),
            config_path: Some(dir.join("sync.json")),
            store: StateStore::with_path(dir.join("config.json")),
            install_dir: None,
        }
    }

    #[test]
    fn test_init_writes_then_refuses_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let init = || ConfigCli {
            init: true,
            force: false,
        };

        init().run(context(dir.path())).unwrap();
        let written = SyncConfig::load_from(&dir.path().join("sync.json"));
        assert_eq!(written.release_url, "http://mirror/release.json");

        assert!(init().run(context(dir.path())).is_err());
        ConfigCli {
            init: true,
            force: true,
        }
        .run(context(dir.path()))
        .unwrap();
    }
}
