//! Reconciliation driver.
//!
//! Compares the local installation with the published release and converges
//! it by one of three flows: nothing to do, full install from an archive, or
//! per-category deltas.

use std::path::{Path, PathBuf};

use epta_common::{FileLockGuard, LockMode, try_acquire_lock};

use crate::api::{ReleaseClient, ReleaseManifest};
use crate::config::SyncConfig;
use crate::delta::apply_delta;
use crate::download::Fetcher;
use crate::error::{SyncError, SyncResult};
use crate::extract::extract;
use crate::merge::merge;
use crate::progress::{ProgressReporter, STAGE_DONE, STAGE_DOWNLOADING};
use crate::state::{InstallationState, StateStore};

/// Advisory lock held in the install dir while it is being changed.
pub const LOCK_FILE_NAME: &str = ".epta-sync.lock";

/// Prefix of the temporary directory a full-install archive is downloaded to.
pub const DOWNLOAD_PREFIX: &str = ".epta-download-";

/// Prefix of the temporary directory an archive is extracted to.
pub const STAGING_PREFIX: &str = ".epta-staging-";

/// What a reconciliation is going to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcilePlan {
    /// Installed version matches and the payload is present
    UpToDate,
    /// No usable local copy, bootstrap from the full archive
    FullInstall,
    /// Installed version is on the denylist; a reinstall is required
    Unsupported { version: String },
    /// Apply every category's delta since `from`
    DeltaUpdate { from: String },
}

/// Result of a successful reconciliation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    UpToDate {
        version: String,
    },
    Installed {
        version: String,
    },
    Updated {
        from: String,
        to: String,
        added: usize,
        removed: usize,
    },
}

impl ReconcileOutcome {
    /// Whether the install dir changed.
    pub fn updated(&self) -> bool {
        !matches!(self, Self::UpToDate { .. })
    }

    /// Human-readable summary for the host.
    pub fn message(&self) -> String {
        match self {
            Self::UpToDate { version } => format!("Already up to date ({version})"),
            Self::Installed { version } => format!("Installed {version}"),
            Self::Updated {
                from,
                to,
                added,
                removed,
            } => format!("Updated {from} -> {to} ({added} added, {removed} removed)"),
        }
    }
}

/// Runs reconciliations against one release endpoint configuration.
#[derive(Debug, Clone)]
pub struct Reconciler {
    config: SyncConfig,
    client: ReleaseClient,
    fetcher: Fetcher,
    store: Option<StateStore>,
}

impl Reconciler {
    /// Create a reconciler. The new version is not persisted unless a store
    /// is attached with [`with_store`](Self::with_store).
    pub fn new(config: SyncConfig) -> SyncResult<Self> {
        let client = ReleaseClient::new(&config)?;
        let fetcher = Fetcher::new(&config)?;
        Ok(Self {
            config,
            client,
            fetcher,
            store: None,
        })
    }

    /// Persist the state through `store` after every successful change.
    pub fn with_store(mut self, store: StateStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn client(&self) -> &ReleaseClient {
        &self.client
    }

    /// Decide what to do, without touching the network or the install dir
    /// beyond checking the marker file.
    pub fn plan(&self, state: &InstallationState, manifest: &ReleaseManifest) -> ReconcilePlan {
        let last = match &state.last_version {
            Some(last) if state.marker_present(&self.config.marker_path) => last,
            _ => return ReconcilePlan::FullInstall,
        };

        if *last == manifest.latest_version {
            ReconcilePlan::UpToDate
        } else if manifest.is_unsupported(last) {
            ReconcilePlan::Unsupported {
                version: last.clone(),
            }
        } else {
            ReconcilePlan::DeltaUpdate { from: last.clone() }
        }
    }

    /// Fetch the release manifest and converge `state.install_dir` to it.
    ///
    /// `state.last_version` is advanced, and persisted when a store is
    /// attached, only after every step succeeded. On error neither `state`
    /// nor the store is changed, although the install dir may hold a mix of
    /// old and new delta entries.
    pub async fn reconcile(
        &self,
        state: &mut InstallationState,
        progress: &ProgressReporter,
    ) -> SyncResult<ReconcileOutcome> {
        let manifest = self.client.fetch_release_manifest().await?;
        let plan = self.plan(state, &manifest);
        tracing::info!(
            "Installed {:?}, latest {}: {:?}",
            state.last_version,
            manifest.latest_version,
            plan
        );

        let outcome = match plan {
            ReconcilePlan::UpToDate => {
                progress.report(STAGE_DONE, 100).await;
                return Ok(ReconcileOutcome::UpToDate {
                    version: manifest.latest_version,
                });
            }
            ReconcilePlan::Unsupported { version } => {
                return Err(SyncError::UnsupportedVersion { version });
            }
            ReconcilePlan::FullInstall => {
                self.full_install(&state.install_dir, &manifest, progress)
                    .await?;
                ReconcileOutcome::Installed {
                    version: manifest.latest_version.clone(),
                }
            }
            ReconcilePlan::DeltaUpdate { from } => {
                let (added, removed) = self
                    .delta_update(&state.install_dir, &from, &manifest.latest_version, progress)
                    .await?;
                ReconcileOutcome::Updated {
                    from,
                    to: manifest.latest_version.clone(),
                    added,
                    removed,
                }
            }
        };

        let mut next = state.clone();
        next.last_version = Some(manifest.latest_version);
        if let Some(store) = &self.store {
            store.save(&next)?;
        }
        *state = next;

        progress.report(STAGE_DONE, 100).await;
        tracing::info!("{}", outcome.message());
        Ok(outcome)
    }

    async fn full_install(
        &self,
        install_dir: &Path,
        manifest: &ReleaseManifest,
        progress: &ProgressReporter,
    ) -> SyncResult<()> {
        let url = manifest
            .archive_url
            .as_deref()
            .ok_or(SyncError::MissingArchiveUrl)?;

        let _lock = lock_install_dir(install_dir)?;
        progress.report(STAGE_DOWNLOADING, 0).await;

        let download_dir = tempfile::Builder::new()
            .prefix(DOWNLOAD_PREFIX)
            .tempdir_in(install_dir)
            .map_err(|e| SyncError::io(install_dir, e))?;
        let archive = download_dir.path().join("payload");
        self.fetcher.fetch(url, &archive, progress).await?;

        let staging = tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .tempdir_in(install_dir)
            .map_err(|e| SyncError::io(install_dir, e))?;
        let payload_root = extract(&archive, staging.path(), progress).await?;

        // The archive is no longer needed once unpacked
        drop(download_dir);

        merge(&payload_root, install_dir, progress).await?;
        Ok(())
    }

    async fn delta_update(
        &self,
        install_dir: &Path,
        from: &str,
        to: &str,
        progress: &ProgressReporter,
    ) -> SyncResult<(usize, usize)> {
        for category in &self.config.categories {
            epta_common::validate_relative_path(category.target_dir())?;
        }

        let _lock = lock_install_dir(install_dir)?;
        let mut added = 0;
        let mut removed = 0;

        for category in &self.config.categories {
            let Some(delta) = self
                .client
                .fetch_delta_manifest(category, from, to)
                .await?
            else {
                continue;
            };
            if delta.is_empty() {
                tracing::info!("{} delta since {} is empty", category.name, from);
                continue;
            }
            let report = apply_delta(&delta, install_dir, &self.fetcher, progress).await?;
            added += report.added;
            removed += report.removed;
        }

        Ok((added, removed))
    }
}

/// Take the install-dir lock, creating the directory first.
fn lock_install_dir(install_dir: &Path) -> SyncResult<FileLockGuard> {
    std::fs::create_dir_all(install_dir).map_err(|e| SyncError::io(install_dir, e))?;
    let path = install_dir.join(LOCK_FILE_NAME);

    match try_acquire_lock(&path, LockMode::Exclusive) {
        Ok(Some(guard)) => Ok(guard),
        Ok(None) => Err(SyncError::ConcurrentUpdate {
            path: install_dir.to_path_buf(),
        }),
        Err(e) => Err(SyncError::LockFailed {
            path,
            message: e.to_string(),
        }),
    }
}

/// Host entry point using the configuration and state record at their
/// platform locations.
///
/// Never fails: errors are logged and folded into `(false, message)`.
pub async fn reconcile(
    install_dir: impl Into<PathBuf>,
    last_version: Option<String>,
    progress: ProgressReporter,
) -> (bool, String) {
    reconcile_with(
        SyncConfig::load(),
        StateStore::default_location(),
        install_dir,
        last_version,
        progress,
    )
    .await
}

/// [`reconcile`] with explicit configuration and state store.
///
/// Opaque settings already in the store are carried over, so saving the new
/// version does not drop them.
pub async fn reconcile_with(
    config: SyncConfig,
    store: Option<StateStore>,
    install_dir: impl Into<PathBuf>,
    last_version: Option<String>,
    progress: ProgressReporter,
) -> (bool, String) {
    let mut state = store.as_ref().map(StateStore::load).unwrap_or_default();
    state.install_dir = install_dir.into();
    state.last_version = last_version;

    let reconciler = match Reconciler::new(config) {
        Ok(reconciler) => reconciler,
        Err(e) => return (false, e.to_string()),
    };
    let reconciler = match store {
        Some(store) => reconciler.with_store(store),
        None => reconciler,
    };

    match reconciler.reconcile(&mut state, &progress).await {
        Ok(outcome) => (outcome.updated(), outcome.message()),
        Err(e) => {
            tracing::warn!("Reconciliation failed: {}", e);
            (false, e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use tempfile::tempdir;

    fn manifest(latest: &str, unsupported: &[&str]) -> ReleaseManifest {
        ReleaseManifest {
            latest_version: latest.to_string(),
            unsupported_versions: unsupported.iter().map(|s| s.to_string()).collect::<BTreeSet<_>>(),
            archive_url: Some("http://unused/full.zip".to_string()),
        }
    }

    fn installed(dir: &Path, version: Option<&str>, with_marker: bool) -> InstallationState {
        let config = SyncConfig::default();
        if with_marker {
            let marker = dir.join(&config.marker_path);
            std::fs::create_dir_all(marker.parent().unwrap()).unwrap();
            std::fs::write(marker, b"jar").unwrap();
        }
        let mut state = InstallationState::new(dir);
        state.last_version = version.map(String::from);
        state
    }

    fn reconciler() -> Reconciler {
        Reconciler::new(SyncConfig::default()).unwrap()
    }

    #[test]
    fn test_plan_no_version_is_full_install() {
        let dir = tempdir().unwrap();
        let state = installed(dir.path(), None, true);
        assert_eq!(
            reconciler().plan(&state, &manifest("v2", &[])),
            ReconcilePlan::FullInstall
        );
    }

    #[test]
    fn test_plan_missing_marker_overrides_equal_version() {
        let dir = tempdir().unwrap();
        let state = installed(dir.path(), Some("v2"), false);
        assert_eq!(
            reconciler().plan(&state, &manifest("v2", &[])),
            ReconcilePlan::FullInstall
        );
    }

    #[test]
    fn test_plan_equal_version_is_up_to_date() {
        let dir = tempdir().unwrap();
        let state = installed(dir.path(), Some("v2"), true);
        assert_eq!(
            reconciler().plan(&state, &manifest("v2", &["v2"])),
            ReconcilePlan::UpToDate
        );
    }

    #[test]
    fn test_plan_unsupported() {
        let dir = tempdir().unwrap();
        let state = installed(dir.path(), Some("v1"), true);
        assert_eq!(
            reconciler().plan(&state, &manifest("v3", &["v0", "v1"])),
            ReconcilePlan::Unsupported {
                version: "v1".to_string()
            }
        );
    }

    #[test]
    fn test_plan_mismatch_is_forward_delta_even_if_older() {
        let dir = tempdir().unwrap();
        let state = installed(dir.path(), Some("v9"), true);
        assert_eq!(
            reconciler().plan(&state, &manifest("v1", &[])),
            ReconcilePlan::DeltaUpdate {
                from: "v9".to_string()
            }
        );
    }

    #[test]
    fn test_lock_contention_is_concurrent_update() {
        let dir = tempdir().unwrap();
        let _held = lock_install_dir(dir.path()).unwrap();
        let err = lock_install_dir(dir.path()).unwrap_err();
        assert!(matches!(err, SyncError::ConcurrentUpdate { .. }));
    }

    #[test]
    fn test_outcome_messages() {
        let up = ReconcileOutcome::UpToDate {
            version: "v1".into(),
        };
        assert!(!up.updated());
        assert!(up.message().contains("v1"));

        let updated = ReconcileOutcome::Updated {
            from: "v1".into(),
            to: "v2".into(),
            added: 3,
            removed: 1,
        };
        assert!(updated.updated());
        assert_eq!(updated.message(), "Updated v1 -> v2 (3 added, 1 removed)");
    }
}
