//! Status command: show the installation state.

use anyhow::{Context, Result};
use clap::Parser;

use epta_sync::{InstallationState, ReconcilePlan, Reconciler};

use crate::cli::RunContext;

/// Status CLI command.
#[derive(Debug, Parser)]
pub struct StatusCli {
    /// Also fetch the release manifest and show what a sync would do
    #[arg(long)]
    pub check: bool,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

impl StatusCli {
    pub async fn run(self, ctx: RunContext) -> Result<()> {
        let mut state = ctx.store.load();
        if let Some(dir) = ctx.install_dir.clone() {
            state.install_dir = dir;
        }
        let marker = state.marker_present(&ctx.config.marker_path);

        let check = if self.check {
            let reconciler = Reconciler::new(ctx.config.clone())?;
            let manifest = reconciler
                .client()
                .fetch_release_manifest()
                .await
                .context("Failed to fetch the release manifest")?;
            let plan = reconciler.plan(&state, &manifest);
            Some((manifest.latest_version, plan))
        } else {
            None
        };

        if self.json {
            let mut report = serde_json::json!({
                "state_file": ctx.store.path(),
                "install_dir": state.install_dir,
                "last_version": state.last_version,
                "marker_present": marker,
                "settings": state.settings,
            });
            if let Some((latest, plan)) = &check {
                report["latest_version"] = latest.clone().into();
                report["plan"] = describe_plan(plan).into();
            }
            println!("{}", serde_json::to_string_pretty(&report)?);
            return Ok(());
        }

        print_state(&ctx, &state, marker);
        if let Some((latest, plan)) = &check {
            println!("Latest version:  {latest}");
            println!("Next sync:       {}", describe_plan(plan));
        }
        Ok(())
    }
}

fn print_state(ctx: &RunContext, state: &InstallationState, marker: bool) {
    println!("State file:      {}", ctx.store.path().display());
    println!("Install dir:     {}", state.install_dir.display());
    println!(
        "Last version:    {}",
        state.last_version.as_deref().unwrap_or("none")
    );
    println!(
        "Marker:          {} ({})",
        if marker { "present" } else { "missing" },
        ctx.config.marker_path.display()
    );
    if !state.settings.is_empty() {
        println!("Settings:");
        for (key, value) in &state.settings {
            println!("  {key} = {value}");
        }
    }
}

/// One-line description of what a sync would do.
pub fn describe_plan(plan: &ReconcilePlan) -> String {
    match plan {
        ReconcilePlan::UpToDate => "nothing, already up to date".to_string(),
        ReconcilePlan::FullInstall => "full install from the release archive".to_string(),
        ReconcilePlan::Unsupported { version } => {
            format!("none, {version} is no longer supported and needs a reinstall")
        }
        ReconcilePlan::DeltaUpdate { from } => format!("apply deltas from {from}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_plan() {
        assert_eq!(
            describe_plan(&ReconcilePlan::DeltaUpdate {
                from: "v1".to_string()
            }),
            "apply deltas from v1"
        );
        assert!(
            describe_plan(&ReconcilePlan::Unsupported {
                version: "v0".to_string()
            })
            .contains("reinstall")
        );
    }
}
