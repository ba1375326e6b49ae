//! Crash-safe file replacement.
//!
//! Writes go to a uniquely named temporary file next to the target, are
//! synced, and are then renamed over the target. A reader sees either the
//! old file or the new one, never a partial write.
//!
//! The two halves are separate so callers can do work between them:
//!
//! ```no_run
//! use kvsave_storage::{stage, FileLockTable};
//! use std::path::Path;
//! use std::time::Duration;
//!
//! let locks = FileLockTable::new();
//! let staged = stage(Path::new("save/Default.sav"), b"frame bytes").unwrap();
//! staged.commit(&locks, Duration::from_secs(1)).unwrap();
//! ```

use crate::error::{StorageError, StorageResult};
use crate::lock_table::FileLockTable;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Process-wide counter making temporary file names unique per call.
static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Marker between the target file name and the counter.
pub const TEMP_SUFFIX: &str = ".tmp_";

/// A fully written temporary file waiting to replace its target.
///
/// Dropping it without committing removes the temporary file.
#[derive(Debug)]
pub struct StagedWrite {
    target: PathBuf,
    temp_path: PathBuf,
    len: u64,
    committed: bool,
}

/// Writes `bytes` to a fresh temporary file next to `target` and syncs it.
///
/// Parent directories are created on demand.
///
/// # Errors
///
/// Returns an error if the directory or file cannot be created or written.
/// The temporary file is removed on failure.
pub fn stage(target: &Path, bytes: &[u8]) -> StorageResult<StagedWrite> {
    if let Some(parent) = target.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }

    let id = TEMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let mut temp_name = target
        .file_name()
        .ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("target has no file name: {}", target.display()),
            )
        })?
        .to_os_string();
    temp_name.push(format!("{TEMP_SUFFIX}{id}"));

    let staged = StagedWrite {
        target: target.to_path_buf(),
        temp_path: target.with_file_name(temp_name),
        len: bytes.len() as u64,
        committed: false,
    };

    let mut file = File::create(&staged.temp_path)?;
    file.write_all(bytes)?;
    file.flush()?;
    file.sync_all()?;

    Ok(staged)
}

/// Stages and commits in one step.
///
/// # Errors
///
/// See [`stage`] and [`StagedWrite::commit`].
pub fn write_atomic(
    target: &Path,
    bytes: &[u8],
    locks: &FileLockTable,
    timeout: Duration,
) -> StorageResult<()> {
    stage(target, bytes)?.commit(locks, timeout)
}

/// Deletes `path` if it exists.
///
/// Returns whether a file was removed.
///
/// # Errors
///
/// Returns an error for any failure other than the file being absent.
pub fn remove_if_exists(path: &Path) -> StorageResult<bool> {
    match fs::remove_file(path) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}

impl StagedWrite {
    /// The file this write will replace.
    #[must_use]
    pub fn target(&self) -> &Path {
        &self.target
    }

    /// The temporary file holding the new contents.
    #[must_use]
    pub fn temp_path(&self) -> &Path {
        &self.temp_path
    }

    /// Number of bytes staged.
    #[must_use]
    pub fn len(&self) -> u64 {
        self.len
    }

    /// Returns true if zero bytes were staged.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Replaces the target with the staged file.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if the per-path lock is not
    /// acquired within `timeout`, [`StorageError::StagedFileMismatch`] if
    /// the temporary file was truncated, or an I/O error if it vanished or
    /// the rename failed. The target is untouched in every error case.
    pub fn commit(self, locks: &FileLockTable, timeout: Duration) -> StorageResult<()> {
        self.commit_with(locks, timeout, || true)
    }

    /// Like [`commit`](Self::commit), but asks `proceed` while holding the
    /// lock, right before the replace. Returning `false` abandons the write
    /// with [`StorageError::Aborted`].
    ///
    /// # Errors
    ///
    /// See [`commit`](Self::commit).
    pub fn commit_with(
        mut self,
        locks: &FileLockTable,
        timeout: Duration,
        proceed: impl FnOnce() -> bool,
    ) -> StorageResult<()> {
        let target = self.target.clone();
        locks.with_lock(&target, timeout, || {
            if !proceed() {
                return Err(StorageError::Aborted {
                    path: target.clone(),
                });
            }
            self.verify()?;
            replace(&self.temp_path, &self.target)?;
            self.committed = true;
            Ok(())
        })?;

        if let Err(e) = sync_parent_directory(&target) {
            tracing::warn!(path = %target.display(), error = %e, "directory sync after replace failed");
        }
        Ok(())
    }

    fn verify(&self) -> StorageResult<()> {
        let actual = fs::metadata(&self.temp_path)?.len();
        if actual != self.len {
            return Err(StorageError::StagedFileMismatch {
                path: self.temp_path.clone(),
                expected: self.len,
                actual,
            });
        }
        Ok(())
    }
}

impl Drop for StagedWrite {
    fn drop(&mut self) {
        if !self.committed {
            if let Err(e) = remove_if_exists(&self.temp_path) {
                tracing::warn!(path = %self.temp_path.display(), error = %e, "failed to remove temporary file");
            }
        }
    }
}

/// Atomic rename, degrading to delete-then-rename where the platform
/// refuses to replace an existing file.
fn replace(source: &Path, target: &Path) -> io::Result<()> {
    match fs::rename(source, target) {
        Ok(()) => Ok(()),
        Err(e)
            if matches!(
                e.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
            ) =>
        {
            tracing::warn!(
                path = %target.display(),
                error = %e,
                "atomic replace unavailable, falling back to delete and rename"
            );
            match fs::remove_file(target) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            fs::rename(source, target)
        }
        Err(e) => Err(e),
    }
}

/// Makes the rename itself durable.
#[cfg(unix)]
fn sync_parent_directory(path: &Path) -> io::Result<()> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => File::open(parent)?.sync_all(),
        _ => Ok(()),
    }
}

#[cfg(not(unix))]
fn sync_parent_directory(_path: &Path) -> io::Result<()> {
    // NTFS journals metadata; directories cannot be fsynced on Windows
    Ok(())
}
