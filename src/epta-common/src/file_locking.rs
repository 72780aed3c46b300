//! Advisory install-dir locks and crash-safe record writes.
//!
//! A lock only excludes other holders of the same lock file. Nothing stops an
//! unrelated process from touching the directory it guards.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Failure to take a lock or to replace a file.
#[derive(Debug, thiserror::Error)]
pub enum FileLockError {
    /// The OS refused the lock for a reason other than contention
    #[error("Failed to lock {}: {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error(transparent)]
    Io(#[from] io::Error),

    /// The finished temp file could not be moved over the target
    #[error("Failed to replace {}: {source}", .path.display())]
    Replace {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileLockError {
    /// The underlying OS error.
    pub fn into_io(self) -> io::Error {
        match self {
            Self::Lock { source, .. } | Self::Io(source) | Self::Replace { source, .. } => source,
        }
    }
}

pub type FileLockResult<T> = Result<T, FileLockError>;

/// How a lock is shared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Any number of shared holders
    Shared,
    /// One holder, no shared holders
    Exclusive,
}

/// Held lock. Released on drop.
#[derive(Debug)]
pub struct FileLockGuard {
    file: File,
    path: PathBuf,
    mode: LockMode,
}

impl FileLockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for FileLockGuard {
    fn drop(&mut self) {
        if let Err(e) = sys::unlock(&self.file) {
            tracing::debug!("Unlocking {} failed: {}", self.path.display(), e);
        }
    }
}

/// Take `path` in `mode` without waiting.
///
/// `Ok(None)` means another holder has a conflicting lock. An exclusive
/// request creates the lock file; a shared one needs it to exist.
pub fn try_acquire_lock(
    path: impl AsRef<Path>,
    mode: LockMode,
) -> FileLockResult<Option<FileLockGuard>> {
    let path = path.as_ref().to_path_buf();
    let exclusive = mode == LockMode::Exclusive;

    let file = OpenOptions::new()
        .read(true)
        .write(exclusive)
        .create(exclusive)
        .truncate(false)
        .open(&path)?;

    let acquired = sys::try_lock(&file, exclusive).map_err(|source| FileLockError::Lock {
        path: path.clone(),
        source,
    })?;

    Ok(acquired.then(|| FileLockGuard { file, path, mode }))
}

/// Replace `path` with `content` so readers never observe a torn record.
///
/// The bytes go to a temp file in the same directory, are flushed to disk and
/// then renamed over the target. Missing parent directories are created.
pub fn atomic_write(path: impl AsRef<Path>, content: &[u8]) -> FileLockResult<()> {
    let path = path.as_ref();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut temp = tempfile::Builder::new()
        .prefix(".epta-write-")
        .tempfile_in(dir)?;
    temp.write_all(content)?;
    temp.as_file().sync_all()?;

    temp.persist(path).map_err(|e| FileLockError::Replace {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}

#[cfg(unix)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::unix::io::AsRawFd;

    pub fn try_lock(file: &File, exclusive: bool) -> io::Result<bool> {
        let kind = if exclusive { libc::LOCK_EX } else { libc::LOCK_SH };
        // SAFETY: the descriptor is owned by `file` and stays open for the call
        if unsafe { libc::flock(file.as_raw_fd(), kind | libc::LOCK_NB) } == 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == libc::EWOULDBLOCK => Ok(false),
            _ => Err(err),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: as above
        if unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_UN) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}

#[cfg(windows)]
mod sys {
    use std::fs::File;
    use std::io;
    use std::os::windows::io::AsRawHandle;

    use windows_sys::Win32::Foundation::{ERROR_LOCK_VIOLATION, HANDLE};
    use windows_sys::Win32::Storage::FileSystem::{
        LOCKFILE_EXCLUSIVE_LOCK, LOCKFILE_FAIL_IMMEDIATELY, LockFileEx, UnlockFileEx,
    };
    use windows_sys::Win32::System::IO::OVERLAPPED;

    pub fn try_lock(file: &File, exclusive: bool) -> io::Result<bool> {
        let mut flags = LOCKFILE_FAIL_IMMEDIATELY;
        if exclusive {
            flags |= LOCKFILE_EXCLUSIVE_LOCK;
        }
        // SAFETY: the handle is owned by `file`; OVERLAPPED is plain data
        let locked = unsafe {
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            LockFileEx(
                file.as_raw_handle() as HANDLE,
                flags,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        if locked != 0 {
            return Ok(true);
        }
        let err = io::Error::last_os_error();
        match err.raw_os_error() {
            Some(code) if code == ERROR_LOCK_VIOLATION as i32 => Ok(false),
            _ => Err(err),
        }
    }

    pub fn unlock(file: &File) -> io::Result<()> {
        // SAFETY: as above
        let unlocked = unsafe {
            let mut overlapped: OVERLAPPED = std::mem::zeroed();
            UnlockFileEx(
                file.as_raw_handle() as HANDLE,
                0,
                u32::MAX,
                u32::MAX,
                &mut overlapped,
            )
        };
        if unlocked != 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }
}
