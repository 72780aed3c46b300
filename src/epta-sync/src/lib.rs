//! EPTA Sync - content delta synchronization engine
//!
//! Keeps a locally installed content bundle in step with the published
//! release:
//! - Nothing happens when the installed version is current
//! - A full archive is downloaded, extracted and swapped in when no usable
//!   local copy exists
//! - Per-category add/remove deltas are applied otherwise
//!
//! # Example
//!
//! ```rust,ignore
//! use epta_sync::{InstallationState, ProgressReporter, Reconciler, StateStore, SyncConfig};
//!
//! let store = StateStore::default_location().expect("config dir");
//! let mut state = store.load();
//! let reconciler = Reconciler::new(SyncConfig::load())?.with_store(store);
//!
//! let (progress, mut rx) = ProgressReporter::channel(64);
//! tokio::spawn(async move {
//!     while let Some(event) = rx.recv().await {
//!         println!("{} {}%", event.stage, event.percent);
//!     }
//! });
//!
//! let outcome = reconciler.reconcile(&mut state, &progress).await?;
//! println!("{}", outcome.message());
//! ```

mod api;
mod config;
mod delta;
mod download;
mod error;
mod extract;
mod merge;
mod progress;
mod reconcile;
mod state;

pub use api::{DeltaManifest, ReleaseClient, ReleaseManifest, RemoteEntry};
pub use config::{Category, SyncConfig};
pub use delta::{DeltaReport, apply_delta};
pub use download::{Fetcher, format_bytes};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use extract::{ArchiveFormat, extract, payload_root, sniff_format};
pub use merge::{MergeReport, merge};
pub use progress::{
    PercentTracker, ProgressEvent, ProgressReporter, STAGE_DONE, STAGE_DOWNLOADING,
    STAGE_EXTRACTING, STAGE_INSTALLING, drain, updating_stage,
};
pub use reconcile::{
    LOCK_FILE_NAME, ReconcileOutcome, ReconcilePlan, Reconciler, reconcile, reconcile_with,
};
pub use state::{InstallationState, StateStore};

/// Current version of the engine (set at compile time)
pub const CURRENT_VERSION: &str = env!("CARGO_PKG_VERSION");
