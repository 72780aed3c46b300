//! Sync engine configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};

/// Release manifest endpoint of the published client.
pub const DEFAULT_RELEASE_URL: &str =
    "https://api.github.com/repos/samebr0dy/EPTAClient/releases/latest";

/// Base URL under which per-category delta manifests are published.
pub const DEFAULT_DELTA_BASE_URL: &str =
    "https://raw.githubusercontent.com/samebr0dy/EPTAClient/main/deltas";

/// Base URL under which individual category files are published.
pub const DEFAULT_FILES_BASE_URL: &str =
    "https://raw.githubusercontent.com/samebr0dy/EPTAClient/main/files";

/// File whose presence proves the payload is actually installed.
pub const DEFAULT_MARKER_PATH: &str = "versions/Forge-1.20.1/Forge-1.20.1.jar";

/// A named partition of the install tree with its own delta manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub name: String,
    /// Directory relative to the install dir; defaults to `name`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_dir: Option<String>,
}

impl Category {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            target_dir: None,
        }
    }

    /// Directory, relative to the install dir, the category's files live in.
    pub fn target_dir(&self) -> &str {
        self.target_dir.as_deref().unwrap_or(&self.name)
    }
}

/// Configuration for [`Reconciler`](crate::Reconciler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Release manifest endpoint
    pub release_url: String,

    /// Delta manifests live at `{delta_base_url}/{category}/{from_version}.json`
    pub delta_base_url: String,

    /// Files live at `{files_base_url}/{category}/{filename}`
    pub files_base_url: String,

    /// Categories updated by deltas, in processing order
    pub categories: Vec<Category>,

    /// Marker file relative to the install dir
    pub marker_path: PathBuf,

    /// Whole-request timeout for manifest requests
    pub request_timeout_secs: u64,

    /// Connect timeout for payload downloads
    pub connect_timeout_secs: u64,

    /// Per-read timeout for payload downloads
    pub read_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            release_url: DEFAULT_RELEASE_URL.to_string(),
            delta_base_url: DEFAULT_DELTA_BASE_URL.to_string(),
            files_base_url: DEFAULT_FILES_BASE_URL.to_string(),
            categories: vec![Category::new("mods"), Category::new("config")],
            marker_path: PathBuf::from(DEFAULT_MARKER_PATH),
            request_timeout_secs: epta_common::DEFAULT_TIMEOUT.as_secs(),
            connect_timeout_secs: epta_common::DEFAULT_CONNECT_TIMEOUT.as_secs(),
            read_timeout_secs: epta_common::DEFAULT_READ_TIMEOUT.as_secs(),
        }
    }
}

impl SyncConfig {
    /// Load config from the standard location (`<config dir>/EPTAData/sync.json`).
    pub fn load() -> Self {
        match epta_common::get_app_dirs() {
            Some(dirs) => Self::load_from(&dirs.sync_config_file()),
            None => Self::default(),
        }
    }

    /// Load config from `path`, returning defaults if it is missing or invalid.
    pub fn load_from(path: &Path) -> Self {
        if let Ok(content) = std::fs::read_to_string(path) {
            match serde_json::from_str(&content) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!("Ignoring invalid sync config {}: {}", path.display(), e);
                }
            }
        }
        Self::default()
    }

    /// Save config to `path`.
    pub fn save_to(&self, path: &Path) -> SyncResult<()> {
        let content = serde_json::to_vec_pretty(self)?;
        epta_common::atomic_write(path, &content)
            .map_err(|e| SyncError::io(path, e.into_io()))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_secs(self.read_timeout_secs.max(1))
    }

    /// Point every endpoint at one server, e.g. a mirror or a test double.
    pub fn with_base_url(mut self, base: &str) -> Self {
        let base = base.trim_end_matches('/');
        self.release_url = format!("{base}/release.json");
        self.delta_base_url = format!("{base}/deltas");
        self.files_base_url = format!("{base}/files");
        self
    }
}
