//! Error types for epta-sync.

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = std::result::Result<T, SyncError>;

/// Coarse classification of a [`SyncError`], for hosts that only need to
/// know which family a failure belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unreachable endpoint, non-success status, timeout, bad manifest
    Network,
    /// Corrupt or truncated payload
    Archive,
    /// Filesystem permission/space failures
    Io,
    /// The installed version is on the remote denylist
    UnsupportedVersion,
    /// Another reconciliation holds the install directory
    ConcurrentUpdate,
    /// A remote path would escape the install directory
    UnsafePath,
}

/// Errors that can occur during reconciliation.
#[derive(Debug, Error)]
pub enum SyncError {
    // Network errors
    #[error("Failed to connect to {url}: {message}")]
    ConnectionFailed { url: String, message: String },

    #[error("Server returned error {status} for {url}")]
    ServerError { status: u16, url: String },

    #[error("Invalid release manifest: {message}")]
    InvalidManifest { message: String },

    #[error("Release manifest does not name an archive to install")]
    MissingArchiveUrl,

    #[error("Download failed: {message}")]
    DownloadFailed { message: String },

    #[error("Failed to build HTTP client: {message}")]
    Client { message: String },

    // Archive errors
    #[error("Invalid archive {}: {message}", .path.display())]
    InvalidArchive { path: PathBuf, message: String },

    // File system errors
    #[error("IO error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{source}; {failures} entries could not be restored, previous versions kept in {}", .backup.display())]
    RollbackIncomplete {
        backup: PathBuf,
        failures: usize,
        #[source]
        source: Box<SyncError>,
    },

    #[error("Failed to lock {}: {message}", .path.display())]
    LockFailed { path: PathBuf, message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // Policy errors
    #[error("Installed version {version} is no longer supported, a full reinstall is required")]
    UnsupportedVersion { version: String },

    #[error("Another update is already running in {}", .path.display())]
    ConcurrentUpdate { path: PathBuf },

    #[error("Refusing unsafe path '{path}': {reason}")]
    UnsafePath { path: String, reason: String },
}

impl SyncError {
    /// Wrap an I/O error together with the path it happened at.
    pub fn io(path: impl AsRef<Path>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.as_ref().to_path_buf(),
            source,
        }
    }

    /// Build an archive error for `path`.
    pub fn invalid_archive(path: impl AsRef<Path>, message: impl Into<String>) -> Self {
        Self::InvalidArchive {
            path: path.as_ref().to_path_buf(),
            message: message.into(),
        }
    }

    /// Classify this error into the reconciliation error taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::ConnectionFailed { .. }
            | Self::ServerError { .. }
            | Self::InvalidManifest { .. }
            | Self::MissingArchiveUrl
            | Self::DownloadFailed { .. }
            | Self::Client { .. } => ErrorKind::Network,
            Self::InvalidArchive { .. } => ErrorKind::Archive,
            Self::Io { .. }
            | Self::RollbackIncomplete { .. }
            | Self::LockFailed { .. }
            | Self::Json(_) => ErrorKind::Io,
            Self::UnsupportedVersion { .. } => ErrorKind::UnsupportedVersion,
            Self::ConcurrentUpdate { .. } => ErrorKind::ConcurrentUpdate,
            Self::UnsafePath { .. } => ErrorKind::UnsafePath,
        }
    }

    /// Check if this error is retriable.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::ConnectionFailed { .. } | Self::DownloadFailed { .. } => true,
            Self::ServerError { status, .. } => *status >= 500,
            Self::ConcurrentUpdate { .. } => true,
            _ => false,
        }
    }

    /// Check if this error is a network error.
    pub fn is_network_error(&self) -> bool {
        self.kind() == ErrorKind::Network
    }
}

impl From<epta_common::PathError> for SyncError {
    fn from(err: epta_common::PathError) -> Self {
        let path = match &err {
            epta_common::PathError::Absolute { path }
            | epta_common::PathError::ParentTraversal { path } => path.clone(),
            epta_common::PathError::Empty => String::new(),
        };
        Self::UnsafePath {
            path,
            reason: err.to_string(),
        }
    }
}
