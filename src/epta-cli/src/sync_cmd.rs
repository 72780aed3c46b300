//! Sync command: install or update the content.

use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use tokio::sync::mpsc;

use epta_sync::{ProgressEvent, ProgressReporter, Reconciler};

use crate::cli::RunContext;

const PROGRESS_CAPACITY: usize = 64;
const BAR_WIDTH: usize = 20;

/// Sync CLI command.
#[derive(Debug, Parser)]
pub struct SyncCli {
    /// Do not draw progress
    #[arg(long, short = 'q')]
    pub quiet: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

impl SyncCli {
    pub async fn run(self, ctx: RunContext) -> Result<()> {
        let mut state = ctx.store.load();
        if let Some(dir) = ctx.install_dir {
            if dir != state.install_dir {
                state.install_dir = dir;
                ctx.store
                    .save(&state)
                    .context("Failed to save the install directory")?;
            }
        }

        let reconciler = Reconciler::new(ctx.config)?.with_store(ctx.store);
        let (progress, rx) = ProgressReporter::channel(PROGRESS_CAPACITY);
        let draw = !(self.quiet || self.json);
        let renderer = tokio::spawn(render_progress(rx, draw));

        // The reporter moves into the task, so the channel closes when it ends
        let worker = tokio::spawn(async move {
            let result = reconciler.reconcile(&mut state, &progress).await;
            (result, state)
        });
        let (result, state) = worker.await.context("Sync task panicked")?;
        let _ = renderer.await;

        if self.json {
            let (updated, message) = match &result {
                Ok(outcome) => (outcome.updated(), outcome.message()),
                Err(e) => (false, e.to_string()),
            };
            let report = serde_json::json!({
                "updated": updated,
                "message": message,
                "install_dir": state.install_dir,
                "last_version": state.last_version,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        let outcome = result.context("Sync failed")?;
        if !self.json {
            println!("{}", outcome.message());
        }
        Ok(())
    }
}

/// Draw progress events on a single terminal line until the channel closes.
async fn render_progress(mut rx: mpsc::Receiver<ProgressEvent>, draw: bool) {
    let mut stdout = std::io::stdout();
    let mut drawn = false;
    while let Some(event) = rx.recv().await {
        tracing::trace!("{} {}%", event.stage, event.percent);
        if !draw {
            continue;
        }
        let _ = write!(stdout, "\r{}", progress_line(&event));
        let _ = stdout.flush();
        drawn = true;
    }
    if drawn {
        println!();
    }
}

/// Fixed-width rendering of one event, so redraws overwrite cleanly.
pub fn progress_line(event: &ProgressEvent) -> String {
    let filled = usize::from(event.percent.min(100)) * BAR_WIDTH / 100;
    format!(
        "{:<20} [{}{}] {:>3}%",
        event.stage,
        "#".repeat(filled),
        "-".repeat(BAR_WIDTH - filled),
        event.percent
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(stage: &str, percent: u8) -> ProgressEvent {
        ProgressEvent {
            stage: stage.to_string(),
            percent,
        }
    }

    #[test]
    fn test_progress_line_widths_match() {
        let start = progress_line(&event("Downloading", 0));
        let end = progress_line(&event("Done", 100));
        assert_eq!(start.len(), end.len());
        assert!(start.ends_with("[--------------------]   0%"));
        assert!(end.ends_with("[####################] 100%"));
    }

    #[test]
    fn test_progress_line_half() {
        let line = progress_line(&event("Updating mods", 50));
        assert!(line.starts_with("Updating mods "));
        assert!(line.contains("[##########----------]"));
    }
}
