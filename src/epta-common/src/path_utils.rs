//! Checks for relative paths that arrive from remote manifests.
//!
//! Remote manifests name files by relative path. Before such a path touches
//! the filesystem it must be proven to stay inside the install directory:
//!
//! ```rust,ignore
//! use epta_common::path_utils::resolve_within;
//! use std::path::Path;
//!
//! let target = resolve_within(Path::new("/games/epta"), "mods/jei.jar")?;
//! assert_eq!(target, Path::new("/games/epta/mods/jei.jar"));
//!
//! assert!(resolve_within(Path::new("/games/epta"), "../evil").is_err());
//! ```
//!
//! Validation is purely lexical; no filesystem access happens here.

use std::path::{Component, Path, PathBuf};

/// A remotely supplied path that must not be used.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PathError {
    /// Nothing left after dropping `.` components
    #[error("Path is empty")]
    Empty,
    /// Leading separator, drive letter or UNC prefix
    #[error("Path '{path}' is absolute")]
    Absolute { path: String },
    #[error("Path '{path}' escapes its root via '..'")]
    ParentTraversal { path: String },
}

pub type PathResult<T> = Result<T, PathError>;

/// Checks that `path` is a plain relative path.
///
/// Both `/` and `\` are accepted as separators, since manifests are produced
/// on arbitrary platforms. Returns the path with `.` components dropped.
pub fn validate_relative_path(path: impl AsRef<str>) -> PathResult<PathBuf> {
    let raw = path.as_ref();
    let unified = raw.replace('\\', "/");

    // A leading separator or a drive letter is absolute on at least one
    // platform, whichever one we happen to be running on.
    let has_drive = unified.len() >= 2
        && unified.as_bytes()[1] == b':'
        && unified.as_bytes()[0].is_ascii_alphabetic();
    if unified.starts_with('/') || has_drive {
        return Err(PathError::Absolute {
            path: raw.to_string(),
        });
    }

    let mut clean = PathBuf::new();
    for segment in unified.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(PathError::ParentTraversal {
                    path: raw.to_string(),
                });
            }
            other => clean.push(other),
        }
    }

    // Platform-specific components the split above does not see
    for component in clean.components() {
        match component {
            Component::Normal(_) => {}
            Component::ParentDir => {
                return Err(PathError::ParentTraversal {
                    path: raw.to_string(),
                });
            }
            Component::CurDir => {}
            Component::RootDir | Component::Prefix(_) => {
                return Err(PathError::Absolute {
                    path: raw.to_string(),
                });
            }
        }
    }

    if clean.as_os_str().is_empty() {
        return Err(PathError::Empty);
    }

    Ok(clean)
}

/// Resolves a remote relative path against `root`, rejecting anything that
/// would land outside it.
pub fn resolve_within(root: &Path, relative: impl AsRef<str>) -> PathResult<PathBuf> {
    let clean = validate_relative_path(relative)?;
    Ok(root.join(clean))
}
