//! Per-path mutual exclusion for the replace step.

use crate::error::{StorageError, StorageResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// One lock per target file.
///
/// Concurrent saves of the same group stage their temporary files in
/// parallel but take this lock for the replace itself, so two renames onto
/// the same path never interleave. Saves of different files never contend.
#[derive(Debug, Default)]
pub struct FileLockTable {
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl FileLockTable {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `f` while holding the lock for `path`.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::LockTimeout`] if the lock is not acquired
    /// within `timeout`, or whatever `f` returns.
    pub fn with_lock<T>(
        &self,
        path: &Path,
        timeout: Duration,
        f: impl FnOnce() -> StorageResult<T>,
    ) -> StorageResult<T> {
        let lock = self.lock_for(path);
        let Some(_guard) = lock.try_lock_for(timeout) else {
            return Err(StorageError::LockTimeout {
                path: path.to_path_buf(),
                timeout,
            });
        };
        f()
    }

    /// Drops locks that nobody is currently using.
    ///
    /// Returns how many entries were removed.
    pub fn prune(&self) -> usize {
        let mut locks = self.locks.lock();
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - locks.len()
    }

    /// Number of paths with a lock entry.
    #[must_use]
    pub fn len(&self) -> usize {
        self.locks.lock().len()
    }

    /// Returns true if no lock has been created yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.locks.lock().is_empty()
    }

    fn lock_for(&self, path: &Path) -> Arc<Mutex<()>> {
        let key = canonical_key(path);
        Arc::clone(self.locks.lock().entry(key).or_default())
    }
}

/// Canonicalises the parent directory so `a/./b.sav` and `a/b.sav` share a
/// lock. The file itself may not exist yet.
fn canonical_key(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            match parent.canonicalize() {
                Ok(dir) => dir.join(name),
                Err(_) => path.to_path_buf(),
            }
        }
        _ => path.to_path_buf(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn same_path_shares_lock() {
        let dir = tempdir().unwrap();
        let table = FileLockTable::new();
        let direct = dir.path().join("g.sav");
        let dotted = dir.path().join(".").join("g.sav");

        table.with_lock(&direct, Duration::from_millis(10), || Ok(())).unwrap();
        table.with_lock(&dotted, Duration::from_millis(10), || Ok(())).unwrap();
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn contended_lock_times_out() {
        let dir = tempdir().unwrap();
        let table = Arc::new(FileLockTable::new());
        let path = dir.path().join("g.sav");

        let (held_tx, held_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();
        let holder = {
            let table = Arc::clone(&table);
            let path = path.clone();
            thread::spawn(move || {
                table
                    .with_lock(&path, Duration::from_secs(1), || {
                        held_tx.send(()).unwrap();
                        release_rx.recv().unwrap();
                        Ok(())
                    })
                    .unwrap();
            })
        };

        held_rx.recv().unwrap();
        let result = table.with_lock(&path, Duration::from_millis(20), || Ok(()));
        assert!(matches!(result, Err(StorageError::LockTimeout { .. })));

        release_tx.send(()).unwrap();
        holder.join().unwrap();
        table.with_lock(&path, Duration::from_millis(20), || Ok(())).unwrap();
    }

    #[test]
    fn different_paths_do_not_contend() {
        let dir = tempdir().unwrap();
        let table = FileLockTable::new();
        let a = dir.path().join("a.sav");
        let b = dir.path().join("b.sav");

        table
            .with_lock(&a, Duration::from_millis(10), || {
                table.with_lock(&b, Duration::from_millis(10), || Ok(()))
            })
            .unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn prune_removes_idle_locks() {
        let dir = tempdir().unwrap();
        let table = FileLockTable::new();
        for name in ["a.sav", "b.sav", "c.sav"] {
            table
                .with_lock(&dir.path().join(name), Duration::from_millis(10), || Ok(()))
                .unwrap();
        }
        assert_eq!(table.prune(), 3);
        assert!(table.is_empty());
    }
}
