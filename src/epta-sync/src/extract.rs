//! Archive extraction.
//!
//! Supports zip and gzip-compressed tar. The format is sniffed from the
//! leading bytes, never from the file name, since full-install payloads are
//! often served from extensionless URLs.

use std::fs::{self, File};
use std::io::{BufReader, Read, Write};
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;

use crate::error::{SyncError, SyncResult};
use crate::progress::{ProgressReporter, STAGE_EXTRACTING};

/// Archive container formats understood by the extractor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveFormat {
    Zip,
    TarGz,
}

/// Identify the format of `archive` from its magic bytes.
pub fn sniff_format(archive: &Path) -> SyncResult<ArchiveFormat> {
    let mut file = File::open(archive).map_err(|e| SyncError::io(archive, e))?;
    let mut magic = [0u8; 4];
    let mut filled = 0;
    while filled < magic.len() {
        match file.read(&mut magic[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) => return Err(SyncError::io(archive, e)),
        }
    }

    match &magic[..filled] {
        [b'P', b'K', 3, 4] | [b'P', b'K', 5, 6] => Ok(ArchiveFormat::Zip),
        [0x1f, 0x8b, ..] => Ok(ArchiveFormat::TarGz),
        _ => Err(SyncError::invalid_archive(
            archive,
            "not a zip or tar.gz archive",
        )),
    }
}

/// Unpack `archive` into `dest` and return the payload root.
///
/// Members are extracted one at a time on a blocking thread, reporting
/// `index / total` under the `Extracting` stage. On failure `dest` is
/// removed; a malformed archive is removed too, since retrying it cannot
/// succeed.
pub async fn extract(
    archive: &Path,
    dest: &Path,
    progress: &ProgressReporter,
) -> SyncResult<PathBuf> {
    let archive_owned = archive.to_path_buf();
    let dest_owned = dest.to_path_buf();
    let reporter = progress.clone();

    let result = tokio::task::spawn_blocking(move || {
        extract_blocking(&archive_owned, &dest_owned, &reporter)
    })
    .await
    .map_err(|e| SyncError::io(archive, std::io::Error::other(e.to_string())))
    .and_then(|inner| inner);

    match result {
        Ok(()) => payload_root(dest),
        Err(e) => {
            if dest.exists() {
                if let Err(cleanup) = fs::remove_dir_all(dest) {
                    tracing::warn!("Failed to clean up {}: {}", dest.display(), cleanup);
                }
            }
            if matches!(e, SyncError::InvalidArchive { .. }) {
                tracing::warn!("Discarding invalid archive {}", archive.display());
                let _ = fs::remove_file(archive);
            }
            Err(e)
        }
    }
}

/// Synchronous extraction. Must run on a blocking thread when a progress
/// channel is attached.
pub fn extract_blocking(
    archive: &Path,
    dest: &Path,
    progress: &ProgressReporter,
) -> SyncResult<()> {
    let format = sniff_format(archive)?;
    fs::create_dir_all(dest).map_err(|e| SyncError::io(dest, e))?;
    tracing::debug!("Extracting {:?} archive {}", format, archive.display());

    match format {
        ArchiveFormat::Zip => extract_zip(archive, dest, progress),
        ArchiveFormat::TarGz => extract_tar_gz(archive, dest, progress),
    }
}

fn extract_zip(archive: &Path, dest: &Path, progress: &ProgressReporter) -> SyncResult<()> {
    let file = File::open(archive).map_err(|e| SyncError::io(archive, e))?;
    let mut zip = zip::ZipArchive::new(BufReader::new(file))
        .map_err(|e| SyncError::invalid_archive(archive, e.to_string()))?;

    let total = zip.len();
    let mut tracker = progress.tracker(STAGE_EXTRACTING, Some(total as u64));

    for index in 0..total {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| SyncError::invalid_archive(archive, e.to_string()))?;

        let relative = entry.enclosed_name().ok_or_else(|| {
            SyncError::invalid_archive(archive, format!("unsafe member name '{}'", entry.name()))
        })?;
        let out_path = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&out_path).map_err(|e| SyncError::io(&out_path, e))?;
        } else {
            if let Some(parent) = out_path.parent() {
                fs::create_dir_all(parent).map_err(|e| SyncError::io(parent, e))?;
            }
            let mut out = File::create(&out_path).map_err(|e| SyncError::io(&out_path, e))?;
            copy_member(&mut entry, &mut out, archive, &out_path)?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Some(mode) = entry.unix_mode() {
                    fs::set_permissions(&out_path, fs::Permissions::from_mode(mode & 0o7777))
                        .map_err(|e| SyncError::io(&out_path, e))?;
                }
            }
        }

        tracker.update_blocking(index as u64 + 1);
    }

    tracker.finish_blocking();
    Ok(())
}

/// Copy one member, telling corrupt input apart from failing output.
fn copy_member(
    reader: &mut impl Read,
    writer: &mut impl Write,
    archive: &Path,
    out_path: &Path,
) -> SyncResult<()> {
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = match reader.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(SyncError::invalid_archive(archive, e.to_string())),
        };
        writer
            .write_all(&buf[..n])
            .map_err(|e| SyncError::io(out_path, e))?;
    }
    writer.flush().map_err(|e| SyncError::io(out_path, e))
}

fn open_tar(archive: &Path) -> SyncResult<tar::Archive<GzDecoder<BufReader<File>>>> {
    let file = File::open(archive).map_err(|e| SyncError::io(archive, e))?;
    Ok(tar::Archive::new(GzDecoder::new(BufReader::new(file))))
}

fn extract_tar_gz(archive: &Path, dest: &Path, progress: &ProgressReporter) -> SyncResult<()> {
    // tar is a stream, so the member count needs its own pass. Walking every
    // header also decompresses every body, which surfaces corruption before
    // anything is written.
    let mut total: u64 = 0;
    {
        let mut tar = open_tar(archive)?;
        let entries = tar
            .entries()
            .map_err(|e| SyncError::invalid_archive(archive, e.to_string()))?;
        for entry in entries {
            let entry = entry.map_err(|e| SyncError::invalid_archive(archive, e.to_string()))?;
            let path = entry
                .path()
                .map_err(|e| SyncError::invalid_archive(archive, e.to_string()))?;
            if !is_enclosed(&path) {
                return Err(SyncError::invalid_archive(
                    archive,
                    format!("unsafe member name '{}'", path.display()),
                ));
            }
            total += 1;
        }
    }

    let mut tracker = progress.tracker(STAGE_EXTRACTING, Some(total));
    let mut tar = open_tar(archive)?;
    tar.set_preserve_permissions(cfg!(unix));
    let entries = tar
        .entries()
        .map_err(|e| SyncError::invalid_archive(archive, e.to_string()))?;

    for (index, entry) in entries.enumerate() {
        let mut entry = entry.map_err(|e| SyncError::invalid_archive(archive, e.to_string()))?;
        let unpacked = entry.unpack_in(dest).map_err(|e| SyncError::io(dest, e))?;
        if !unpacked {
            return Err(SyncError::invalid_archive(
                archive,
                "member escapes the destination",
            ));
        }
        tracker.update_blocking(index as u64 + 1);
    }

    tracker.finish_blocking();
    Ok(())
}

/// Whether an archive member path stays below the extraction root.
fn is_enclosed(path: &Path) -> bool {
    path.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
}

/// The effective payload root of an extracted tree.
///
/// Some producers wrap everything in one top-level folder. If `dest` holds
/// exactly one entry and it is a directory, that directory is the root.
pub fn payload_root(dest: &Path) -> SyncResult<PathBuf> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dest).map_err(|e| SyncError::io(dest, e))? {
        let entry = entry.map_err(|e| SyncError::io(dest, e))?;
        entries.push(entry);
        if entries.len() > 1 {
            return Ok(dest.to_path_buf());
        }
    }

    match entries.as_slice() {
        [only] => {
            let file_type = only.file_type().map_err(|e| SyncError::io(only.path(), e))?;
            if file_type.is_dir() {
                Ok(only.path())
            } else {
                Ok(dest.to_path_buf())
            }
        }
        _ => Ok(dest.to_path_buf()),
    }
}
