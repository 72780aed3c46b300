//! Applies a category delta directly to the live install tree.

use std::path::{Path, PathBuf};

use crate::api::DeltaManifest;
use crate::download::Fetcher;
use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressReporter, updating_stage};

/// What a delta changed on disk.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeltaReport {
    pub added: usize,
    /// Only entries that actually existed are counted
    pub removed: usize,
}

/// Apply `delta` to `install_dir`: removals first, then additions.
///
/// Every path is checked before the first change, so a delta naming an
/// unsafe path changes nothing. Removing an absent entry is not an error.
/// Additions are fetched straight to their final location, creating parent
/// directories as needed. Progress is reported per processed entry under the
/// `Updating <category>` stage.
pub async fn apply_delta(
    delta: &DeltaManifest,
    install_dir: &Path,
    fetcher: &Fetcher,
    progress: &ProgressReporter,
) -> SyncResult<DeltaReport> {
    let removals: Vec<PathBuf> = delta
        .remove_entries
        .iter()
        .map(|rel| epta_common::resolve_within(install_dir, rel))
        .collect::<Result<_, _>>()?;
    let additions: Vec<(PathBuf, &str)> = delta
        .add_entries
        .iter()
        .map(|entry| {
            epta_common::resolve_within(install_dir, &entry.relative_path)
                .map(|target| (target, entry.source_url.as_str()))
        })
        .collect::<Result<_, _>>()?;

    let total = (removals.len() + additions.len()) as u64;
    let mut tracker = progress.tracker(updating_stage(&delta.category), Some(total));
    let mut processed: u64 = 0;
    let mut report = DeltaReport::default();

    for target in &removals {
        if remove_if_present(target).await? {
            tracing::debug!("Removed {}", target.display());
            report.removed += 1;
        }
        processed += 1;
        tracker.update(processed).await;
    }

    for (target, url) in &additions {
        fetcher.fetch_quiet(url, target).await?;
        tracing::debug!("Added {}", target.display());
        report.added += 1;
        processed += 1;
        tracker.update(processed).await;
    }

    tracker.finish().await;
    tracing::info!(
        "Applied {} delta {} -> {}: {} added, {} removed",
        delta.category,
        delta.from_version,
        delta.to_version,
        report.added,
        report.removed
    );
    Ok(report)
}

/// Delete a file or directory tree. Returns whether anything was there.
async fn remove_if_present(path: &Path) -> SyncResult<bool> {
    let metadata = match tokio::fs::symlink_metadata(path).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(SyncError::io(path, e)),
    };

    let result = if metadata.is_dir() {
        tokio::fs::remove_dir_all(path).await
    } else {
        tokio::fs::remove_file(path).await
    };
    result.map_err(|e| SyncError::io(path, e))?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::RemoteEntry;
    use crate::config::SyncConfig;
    use crate::error::ErrorKind;
    use crate::progress::drain;
    use pretty_assertions::assert_eq;
    use std::fs;
    use tempfile::tempdir;

    fn delta(add: Vec<RemoteEntry>, remove: Vec<&str>) -> DeltaManifest {
        DeltaManifest {
            category: "mods".to_string(),
            from_version: "v1".to_string(),
            to_version: "v2".to_string(),
            add_entries: add,
            remove_entries: remove.into_iter().map(String::from).collect(),
        }
    }

    fn fetcher() -> Fetcher {
        Fetcher::new(&SyncConfig::default()).unwrap()
    }

    async fn serve(server: &wiremock::MockServer, path: &str, body: &str) {
        wiremock::Mock::given(wiremock::matchers::method("GET"))
            .and(wiremock::matchers::path(path))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_string(body))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_remove_then_add_same_path_keeps_new_content() {
        let server = wiremock::MockServer::start().await;
        serve(&server, "/files/mods/x.jar", "fresh").await;

        let dir = tempdir().unwrap();
        let install = dir.path();
        fs::create_dir_all(install.join("mods")).unwrap();
        fs::write(install.join("mods").join("x.jar"), "stale").unwrap();

        let delta = delta(
            vec![RemoteEntry {
                relative_path: "mods/x.jar".to_string(),
                source_url: format!("{}/files/mods/x.jar", server.uri()),
            }],
            vec!["mods/x.jar"],
        );

        let report = apply_delta(&delta, install, &fetcher(), &ProgressReporter::disabled())
            .await
            .unwrap();

        assert_eq!(report, DeltaReport { added: 1, removed: 1 });
        assert_eq!(
            fs::read_to_string(install.join("mods").join("x.jar")).unwrap(),
            "fresh"
        );
    }

    #[tokio::test]
    async fn test_removed_directory_replaced_by_file() {
        let server = wiremock::MockServer::start().await;
        serve(&server, "/files/mods/pack", "now a file").await;

        let dir = tempdir().unwrap();
        let install = dir.path();
        fs::create_dir_all(install.join("mods").join("pack").join("inner")).unwrap();
        fs::write(install.join("mods").join("pack").join("inner").join("a"), "a").unwrap();

        let delta = delta(
            vec![RemoteEntry {
                relative_path: "mods/pack".to_string(),
                source_url: format!("{}/files/mods/pack", server.uri()),
            }],
            vec!["mods/pack"],
        );

        apply_delta(&delta, install, &fetcher(), &ProgressReporter::disabled())
            .await
            .unwrap();
        assert!(install.join("mods").join("pack").is_file());
    }

    #[tokio::test]
    async fn test_absent_removals_are_skipped() {
        let dir = tempdir().unwrap();
        let delta = delta(vec![], vec!["mods/never-existed.jar"]);

        let (reporter, mut rx) = ProgressReporter::channel(16);
        let report = apply_delta(&delta, dir.path(), &fetcher(), &reporter)
            .await
            .unwrap();

        assert_eq!(report.removed, 0);
        let events = drain(&mut rx);
        assert_eq!(events.last().map(|e| e.percent), Some(100));
        assert!(events.iter().all(|e| e.stage == "Updating mods"));
    }

    #[tokio::test]
    async fn test_additions_create_parent_directories() {
        let server = wiremock::MockServer::start().await;
        serve(&server, "/files/config/deep/nested/a.toml", "a=1").await;

        let dir = tempdir().unwrap();
        let delta = DeltaManifest {
            category: "config".to_string(),
            ..delta(
                vec![RemoteEntry {
                    relative_path: "config/deep/nested/a.toml".to_string(),
                    source_url: format!("{}/files/config/deep/nested/a.toml", server.uri()),
                }],
                vec![],
            )
        };

        apply_delta(&delta, dir.path(), &fetcher(), &ProgressReporter::disabled())
            .await
            .unwrap();
        assert!(dir.path().join("config/deep/nested/a.toml").is_file());
    }

    #[tokio::test]
    async fn test_unsafe_path_changes_nothing() {
        let dir = tempdir().unwrap();
        let install = dir.path().join("install");
        fs::create_dir_all(install.join("mods")).unwrap();
        fs::write(install.join("mods").join("keep.jar"), "keep").unwrap();

        let delta = delta(
            vec![RemoteEntry {
                relative_path: "mods/../../escape.txt".to_string(),
                source_url: "http://127.0.0.1:9/never".to_string(),
            }],
            vec!["mods/keep.jar"],
        );

        let err = apply_delta(&delta, &install, &fetcher(), &ProgressReporter::disabled())
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::UnsafePath);
        assert!(install.join("mods").join("keep.jar").exists());
        assert!(!dir.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn test_failed_addition_is_error() {
        let server = wiremock::MockServer::start().await;
        let dir = tempdir().unwrap();
        let delta = delta(
            vec![RemoteEntry {
                relative_path: "mods/gone.jar".to_string(),
                source_url: format!("{}/files/mods/gone.jar", server.uri()),
            }],
            vec![],
        );

        let err = apply_delta(&delta, dir.path(), &fetcher(), &ProgressReporter::disabled())
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::DownloadFailed { .. }));
    }
}
