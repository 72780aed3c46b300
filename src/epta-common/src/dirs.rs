//! Platform application directories for EPTA.
//!
//! Everything EPTA persists lives in one directory:
//! - Windows: `%APPDATA%\EPTAData`
//! - macOS: `~/Library/Application Support/EPTAData`
//! - Linux: `$XDG_CONFIG_HOME/EPTAData` (usually `~/.config/EPTAData`)
//!
//! Can be overridden with the `EPTA_HOME` environment variable.

use std::path::PathBuf;

/// Directory name inside the platform config directory
pub const APP_DIR_NAME: &str = "EPTAData";

/// Environment variable overriding the application directory
pub const HOME_ENV_VAR: &str = "EPTA_HOME";

/// Persisted installation state record
pub const STATE_FILE_NAME: &str = "config.json";

/// Sync engine configuration
pub const SYNC_CONFIG_FILE_NAME: &str = "sync.json";

/// Where EPTA keeps its files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDirs {
    /// Holds the state record and sync configuration
    pub config_dir: PathBuf,
    /// Log files written with `--log-file` default here
    pub logs_dir: PathBuf,
}

impl AppDirs {
    /// Resolve the directories, honouring `EPTA_HOME`.
    ///
    /// A relative `EPTA_HOME` is made absolute against the current directory
    /// once, here.
    pub fn new() -> Option<Self> {
        let root = match std::env::var_os(HOME_ENV_VAR).filter(|home| !home.is_empty()) {
            Some(home) => std::path::absolute(PathBuf::from(home)).ok()?,
            None => dirs::config_dir()?.join(APP_DIR_NAME),
        };
        Some(Self::rooted_at(root))
    }

    /// Build the directory layout under an explicit root.
    pub fn rooted_at(root: PathBuf) -> Self {
        Self {
            logs_dir: root.join("logs"),
            config_dir: root,
        }
    }

    /// Path of the persisted installation state record
    pub fn state_file(&self) -> PathBuf {
        self.config_dir.join(STATE_FILE_NAME)
    }

    /// Path of the sync engine configuration
    pub fn sync_config_file(&self) -> PathBuf {
        self.config_dir.join(SYNC_CONFIG_FILE_NAME)
    }

    /// Create the config and logs directories.
    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.config_dir)?;
        std::fs::create_dir_all(&self.logs_dir)
    }
}

/// Shorthand for [`AppDirs::new`].
pub fn get_app_dirs() -> Option<AppDirs> {
    AppDirs::new()
}
