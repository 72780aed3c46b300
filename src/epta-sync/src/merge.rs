//! Moves an extracted payload into the live install directory.
//!
//! Each top-level entry of the payload replaces the same-named entry of the
//! install directory as a whole: directories are swapped as subtrees, never
//! merged file by file. Replaced entries are parked in a backup directory
//! next to the live tree. If any swap fails, every swap made so far is undone
//! in reverse order, so a failed merge leaves the old tree in place.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressReporter, STAGE_INSTALLING};

/// Prefix of the directory replaced entries are parked in during a merge.
pub const BACKUP_PREFIX: &str = ".epta-backup-";

/// Summary of a completed merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Top-level entries moved into place
    pub installed: usize,
    /// How many of them replaced an existing entry
    pub replaced: usize,
}

/// Merge `payload_root` into `install_dir` on a blocking thread.
pub async fn merge(
    payload_root: &Path,
    install_dir: &Path,
    progress: &ProgressReporter,
) -> SyncResult<MergeReport> {
    let payload_root = payload_root.to_path_buf();
    let install_dir = install_dir.to_path_buf();
    let reporter = progress.clone();
    let join_path = install_dir.clone();

    tokio::task::spawn_blocking(move || merge_blocking(&payload_root, &install_dir, &reporter))
        .await
        .map_err(|e| SyncError::io(join_path, std::io::Error::other(e.to_string())))?
}

/// Synchronous merge, see the module docs.
pub fn merge_blocking(
    payload_root: &Path,
    install_dir: &Path,
    progress: &ProgressReporter,
) -> SyncResult<MergeReport> {
    fs::create_dir_all(install_dir).map_err(|e| SyncError::io(install_dir, e))?;

    let mut names: Vec<OsString> = Vec::new();
    for entry in fs::read_dir(payload_root).map_err(|e| SyncError::io(payload_root, e))? {
        let entry = entry.map_err(|e| SyncError::io(payload_root, e))?;
        names.push(entry.file_name());
    }
    names.sort();

    let backup = tempfile::Builder::new()
        .prefix(BACKUP_PREFIX)
        .tempdir_in(install_dir)
        .map_err(|e| SyncError::io(install_dir, e))?;

    let mut journal = SwapJournal::new(install_dir, backup.path());
    let mut tracker = progress.tracker(STAGE_INSTALLING, Some(names.len() as u64));

    for (index, name) in names.iter().enumerate() {
        let source = payload_root.join(name);
        if let Err(e) = journal.swap(&source, name) {
            tracing::warn!(
                "Merge failed at {}, rolling back {} entries",
                Path::new(name).display(),
                journal.len()
            );
            return Err(abort_merge(&mut journal, backup, e));
        }
        tracker.update_blocking(index as u64 + 1);
    }

    let report = MergeReport {
        installed: journal.len(),
        replaced: journal.replaced(),
    };

    // Old entries are only discarded once every swap succeeded
    if let Err(e) = backup.close() {
        tracing::warn!("Failed to remove merge backup: {}", e);
    }

    tracker.finish_blocking();
    tracing::info!(
        "Installed {} entries into {} ({} replaced)",
        report.installed,
        install_dir.display(),
        report.replaced
    );
    Ok(report)
}

/// Roll back after a failed swap. If any parked entry could not be put back,
/// the backup directory is kept so those entries survive.
fn abort_merge(
    journal: &mut SwapJournal,
    backup: tempfile::TempDir,
    cause: SyncError,
) -> SyncError {
    let failures = journal.rollback();
    if failures == 0 {
        return cause;
    }

    let backup = backup.keep();
    tracing::warn!(
        "{} entries could not be restored, previous versions kept in {}",
        failures,
        backup.display()
    );
    SyncError::RollbackIncomplete {
        backup,
        failures,
        source: Box::new(cause),
    }
}

#[derive(Debug)]
struct SwapStep {
    name: OsString,
    backed_up: bool,
    installed: bool,
}

/// In-memory record of the swaps made so far.
#[derive(Debug)]
struct SwapJournal {
    install_dir: PathBuf,
    backup_dir: PathBuf,
    steps: Vec<SwapStep>,
}

impl SwapJournal {
    fn new(install_dir: &Path, backup_dir: &Path) -> Self {
        Self {
            install_dir: install_dir.to_path_buf(),
            backup_dir: backup_dir.to_path_buf(),
            steps: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.steps.len()
    }

    fn replaced(&self) -> usize {
        self.steps.iter().filter(|s| s.backed_up).count()
    }

    /// Replace `install_dir/name` with `source`.
    fn swap(&mut self, source: &Path, name: &OsString) -> SyncResult<()> {
        let target = self.install_dir.join(name);
        let parked = self.backup_dir.join(name);

        self.steps.push(SwapStep {
            name: name.clone(),
            backed_up: false,
            installed: false,
        });
        let index = self.steps.len() - 1;

        if fs::symlink_metadata(&target).is_ok() {
            move_entry(&target, &parked)?;
            self.steps[index].backed_up = true;
        }

        move_entry(source, &target)?;
        self.steps[index].installed = true;
        tracing::debug!("Installed {}", target.display());
        Ok(())
    }

    /// Undo every recorded swap, newest first. Returns how many entries could
    /// not be restored.
    fn rollback(&mut self) -> usize {
        let mut failures = 0;
        for step in self.steps.drain(..).rev() {
            let target = self.install_dir.join(&step.name);
            if step.installed {
                if let Err(e) = remove_entry(&target) {
                    tracing::warn!("Rollback could not remove {}: {}", target.display(), e);
                    failures += 1;
                    continue;
                }
            }
            if step.backed_up {
                let parked = self.backup_dir.join(&step.name);
                if let Err(e) = move_entry(&parked, &target) {
                    tracing::warn!("Rollback could not restore {}: {}", target.display(), e);
                    failures += 1;
                }
            }
        }
        failures
    }
}

/// Move a file or directory, falling back to copy + delete when a rename is
/// not possible (e.g. across filesystems).
pub(crate) fn move_entry(src: &Path, dst: &Path) -> SyncResult<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
    }

    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            tracing::debug!(
                "rename {} -> {} failed ({}), copying instead",
                src.display(),
                dst.display(),
                rename_err
            );
            let metadata = fs::symlink_metadata(src).map_err(|e| SyncError::io(src, e))?;
            let copied = if metadata.is_dir() {
                copy_dir_recursive(src, dst)
            } else {
                fs::copy(src, dst)
                    .map(|_| ())
                    .map_err(|e| SyncError::io(dst, e))
            };
            if let Err(e) = copied {
                let _ = remove_entry(dst);
                return Err(e);
            }
            remove_entry(src)
        }
    }
}

/// Remove a file, symlink or directory tree. Absent entries are fine.
pub(crate) fn remove_entry(path: &Path) -> SyncResult<()> {
    let metadata = match fs::symlink_metadata(path) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(SyncError::io(path, e)),
    };
    let result = if metadata.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    result.map_err(|e| SyncError::io(path, e))
}

fn copy_dir_recursive(src: &Path, dst: &Path) -> SyncResult<()> {
    fs::create_dir_all(dst).map_err(|e| SyncError::io(dst, e))?;
    for entry in fs::read_dir(src).map_err(|e| SyncError::io(src, e))? {
        let entry = entry.map_err(|e| SyncError::io(src, e))?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());
        let metadata = fs::symlink_metadata(&src_path).map_err(|e| SyncError::io(&src_path, e))?;
        if metadata.is_dir() {
            copy_dir_recursive(&src_path, &dst_path)?;
            continue;
        }

        #[cfg(unix)]
        if metadata.file_type().is_symlink() {
            let target = fs::read_link(&src_path).map_err(|e| SyncError::io(&src_path, e))?;
            std::os::unix::fs::symlink(&target, &dst_path)
                .map_err(|e| SyncError::io(&dst_path, e))?;
            continue;
        }

        fs::copy(&src_path, &dst_path).map_err(|e| SyncError::io(&dst_path, e))?;
    }
    Ok(())
}
