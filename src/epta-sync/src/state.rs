//! Installation state record.
//!
//! The record is shared with the presentation layer: besides the two fields
//! the engine owns it carries opaque settings (username, launch flags, memory
//! allocation, ...) that are kept verbatim across saves.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{SyncError, SyncResult};

/// The durable facts the engine needs, plus pass-through settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InstallationState {
    /// Root of the installed content tree
    #[serde(rename = "game_dir", alias = "install_dir", default)]
    pub install_dir: PathBuf,

    /// Version recorded after the last successful install or update
    #[serde(default)]
    pub last_version: Option<String>,

    /// Every other key of the record, in its original order
    #[serde(flatten)]
    pub settings: Map<String, Value>,
}

impl InstallationState {
    /// Create a state for `install_dir` with no recorded version.
    pub fn new(install_dir: impl Into<PathBuf>) -> Self {
        Self {
            install_dir: install_dir.into(),
            last_version: None,
            settings: Map::new(),
        }
    }

    /// Whether the marker file, relative to the install dir, exists.
    pub fn marker_present(&self, marker: &Path) -> bool {
        self.install_dir.join(marker).is_file()
    }

    /// Read an opaque setting.
    pub fn setting(&self, key: &str) -> Option<&Value> {
        self.settings.get(key)
    }

    /// Set an opaque setting, keeping its position if it already exists.
    pub fn set_setting(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.settings.insert(key.into(), value.into());
    }
}

/// Loads and saves [`InstallationState`] as a single JSON record.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Store backed by the record at `path`.
    pub fn with_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the platform location (`<config dir>/EPTAData/config.json`).
    pub fn default_location() -> Option<Self> {
        epta_common::get_app_dirs().map(|dirs| Self::with_path(dirs.state_file()))
    }

    /// Path of the backing record.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the record, falling back to defaults when it is missing or
    /// unreadable. Never fails.
    pub fn load(&self) -> InstallationState {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No state record at {}", self.path.display());
                return self.fallback();
            }
            Err(e) => {
                tracing::warn!("Failed to read {}: {}", self.path.display(), e);
                return self.fallback();
            }
        };

        match serde_json::from_str::<InstallationState>(&content) {
            Ok(mut state) => {
                if state.install_dir.as_os_str().is_empty() {
                    state.install_dir = self.fallback().install_dir;
                }
                state
            }
            Err(e) => {
                tracing::warn!("Ignoring corrupt state record {}: {}", self.path.display(), e);
                self.fallback()
            }
        }
    }

    /// Overwrite the whole record with `state`.
    ///
    /// The owning directory is created when missing and the write is atomic.
    pub fn save(&self, state: &InstallationState) -> SyncResult<()> {
        let content = serde_json::to_vec_pretty(state)?;
        epta_common::atomic_write(&self.path, &content)
            .map_err(|e| SyncError::io(&self.path, e.into_io()))?;
        tracing::debug!("Saved state record to {}", self.path.display());
        Ok(())
    }

    /// Defaults: install into the current directory, no version.
    fn fallback(&self) -> InstallationState {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        InstallationState::new(cwd)
    }
}
