//! A named group of typed values backed by one archive file.

use crate::archive::ArchiveCodec;
use crate::cancel::CancelToken;
use crate::config::SaveConfig;
use crate::error::{CoreError, CoreResult};
use crate::setting::ArchiveSetting;
use crate::PERF_TARGET;
use kvsave_codec::{Entries, FromTypedValue, TypedValue};
use kvsave_storage::{FileLockTable, StorageError};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;

/// Collaborators shared by every group of a registry.
#[derive(Debug, Clone)]
pub struct StoreContext {
    config: Arc<SaveConfig>,
    codec: Arc<ArchiveCodec>,
    locks: Arc<FileLockTable>,
}

impl StoreContext {
    /// Creates a context with its own lock table. The codec's payload limit
    /// is taken from `config`.
    #[must_use]
    pub fn new(config: SaveConfig, codec: ArchiveCodec) -> Self {
        let codec = codec.with_max_payload_len(config.max_payload_len);
        Self {
            config: Arc::new(config),
            codec: Arc::new(codec),
            locks: Arc::new(FileLockTable::new()),
        }
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SaveConfig {
        &self.config
    }

    /// The archive codec.
    #[must_use]
    pub fn codec(&self) -> &ArchiveCodec {
        &self.codec
    }

    /// The per-file lock table.
    #[must_use]
    pub fn locks(&self) -> &FileLockTable {
        &self.locks
    }
}

/// What happened to one save.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The file now holds the snapshot.
    Completed {
        /// Wall time from issue to replace.
        elapsed: Duration,
    },
    /// A newer save, a load or dispose superseded this one. The file is
    /// untouched.
    Cancelled,
    /// The save failed. The file is untouched and the group stays dirty.
    Failed(String),
}

impl SaveOutcome {
    /// Returns true for [`SaveOutcome::Completed`].
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed { .. })
    }

    /// Returns true for [`SaveOutcome::Cancelled`].
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Handle to a save that may still be running.
#[derive(Debug)]
pub struct SaveTask {
    group: String,
    state: TaskState,
}

#[derive(Debug)]
enum TaskState {
    Ready(SaveOutcome),
    Spawned(JoinHandle<SaveOutcome>),
}

impl SaveTask {
    fn ready(group: &str, outcome: SaveOutcome) -> Self {
        Self {
            group: group.to_string(),
            state: TaskState::Ready(outcome),
        }
    }

    /// The group being saved.
    #[must_use]
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Returns true once the outcome is known.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        match &self.state {
            TaskState::Ready(_) => true,
            TaskState::Spawned(handle) => handle.is_finished(),
        }
    }

    /// Waits for the save to finish.
    pub async fn wait(self) -> SaveOutcome {
        match self.state {
            TaskState::Ready(outcome) => outcome,
            TaskState::Spawned(handle) => match handle.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    tracing::error!(group = %self.group, error = %e, "background save task failed");
                    SaveOutcome::Failed(e.to_string())
                }
            },
        }
    }
}

/// In-memory values of one group plus the machinery to persist them.
///
/// All methods take `&self`; the store is shared behind an [`Arc`].
///
/// Dirty state is tracked with two counters. `revision` moves on every
/// change, `saved_revision` records the revision the file is known to hold.
/// A save only advances `saved_revision` to the revision of its own
/// snapshot, so edits made during a background save keep the group dirty.
///
/// A load cancels any save in flight and reads the file under the same
/// per-file lock a save commits under, so a superseded snapshot can never
/// land on top of freshly loaded values.
#[derive(Debug)]
pub struct GroupStore {
    name: String,
    path: PathBuf,
    setting: ArchiveSetting,
    entries: RwLock<Entries>,
    revision: AtomicU64,
    saved_revision: AtomicU64,
    active_save: Mutex<Option<CancelToken>>,
    loads: AtomicUsize,
    context: StoreContext,
}

struct LoadGuard<'a>(&'a AtomicUsize);

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl GroupStore {
    /// Creates an empty, dirty group. Nothing is read from disk.
    #[must_use]
    pub fn new(name: impl Into<String>, setting: ArchiveSetting, context: StoreContext) -> Self {
        let name = name.into();
        let path = context.config.group_path(&name, setting);
        Self {
            name,
            path,
            setting,
            entries: RwLock::new(Entries::new()),
            revision: AtomicU64::new(1),
            saved_revision: AtomicU64::new(0),
            active_save: Mutex::new(None),
            loads: AtomicUsize::new(0),
            context,
        }
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The group's file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The setting captured at construction.
    #[must_use]
    pub fn setting(&self) -> ArchiveSetting {
        self.setting
    }

    /// Returns true if the file may not reflect the in-memory values.
    #[must_use]
    pub fn is_dirty(&self) -> bool {
        self.saved_revision.load(Ordering::SeqCst) < self.revision.load(Ordering::SeqCst)
    }

    /// Returns true while a save is in flight.
    #[must_use]
    pub fn is_saving(&self) -> bool {
        self.active_save.lock().is_some()
    }

    /// Returns true while a load is in flight.
    #[must_use]
    pub fn is_loading(&self) -> bool {
        self.loads.load(Ordering::SeqCst) > 0
    }

    /// Stores `value` under `key`.
    ///
    /// Returns whether anything changed. Writing the value a key already
    /// holds leaves the group clean.
    pub fn set_data(&self, key: &str, value: impl Into<TypedValue>) -> bool {
        let value = value.into();
        let mut entries = self.entries.write();
        let changed = match entries.get_mut(key) {
            Some(existing) => existing.set(value),
            None => {
                entries.insert(key.to_string(), value);
                true
            }
        };
        if changed {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        changed
    }

    /// Reads `key`, or `default` if it is missing or holds another type.
    pub fn get_data<T: FromTypedValue>(&self, key: &str, default: T) -> T {
        match self.entries.read().get(key) {
            Some(value) => value.get(default),
            None => default,
        }
    }

    /// Returns a copy of the raw value under `key`.
    #[must_use]
    pub fn value(&self, key: &str) -> Option<TypedValue> {
        self.entries.read().get(key).cloned()
    }

    /// Removes `key`, returning its value.
    pub fn remove_data(&self, key: &str) -> Option<TypedValue> {
        let mut entries = self.entries.write();
        let removed = entries.remove(key);
        if removed.is_some() {
            self.revision.fetch_add(1, Ordering::SeqCst);
        }
        removed
    }

    /// Removes every key.
    pub fn clear(&self) {
        let mut entries = self.entries.write();
        entries.clear();
        self.revision.fetch_add(1, Ordering::SeqCst);
    }

    /// Returns true if `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.read().contains_key(key)
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Returns true if the group holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Keys in unspecified order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.entries.read().keys().cloned().collect()
    }

    /// Copy of all entries.
    #[must_use]
    pub fn snapshot(&self) -> Entries {
        self.entries.read().clone()
    }

    /// Saves synchronously, logging instead of returning errors.
    ///
    /// Any background save still running is cancelled first.
    pub fn save(&self) -> SaveOutcome {
        self.report(self.try_save(), "sync")
    }

    /// Saves synchronously.
    ///
    /// On success the group is clean up to the revision that was written and
    /// the elapsed time is returned.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Cancelled`] if another save superseded this one,
    /// or the encoding or storage error. The file is untouched on error.
    pub fn try_save(&self) -> CoreResult<Duration> {
        let started = Instant::now();
        let token = self.begin_save();
        let (entries, revision) = self.versioned_snapshot();
        self.run_save(&entries, revision, &token, started)
    }

    /// Saves on the blocking pool of the configured or ambient runtime.
    ///
    /// The snapshot is taken before returning, so saves issued in order
    /// write data in that order; a newer save cancels this one. Groups with
    /// `sync_only`, or calls made without any runtime, save inline.
    pub fn save_async(self: &Arc<Self>) -> SaveTask {
        if self.setting.sync_only {
            return SaveTask::ready(&self.name, self.save());
        }
        let Some(runtime) = self.context.config.runtime_handle() else {
            tracing::warn!(group = %self.name, "no async runtime available, saving synchronously");
            return SaveTask::ready(&self.name, self.save());
        };

        let started = Instant::now();
        let token = self.begin_save();
        let (entries, revision) = self.versioned_snapshot();

        let store = Arc::clone(self);
        let handle = runtime.spawn_blocking(move || {
            let result = store.run_save(&entries, revision, &token, started);
            store.report(result, "async")
        });

        SaveTask {
            group: self.name.clone(),
            state: TaskState::Spawned(handle),
        }
    }

    /// Replaces the in-memory values with the file's contents.
    ///
    /// A missing file loads as an empty group. Returns the number of keys.
    /// Any save still in flight is cancelled.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Archive`] if the file is corrupt, or an I/O
    /// error. The in-memory values are untouched on error.
    pub fn load(&self) -> CoreResult<usize> {
        self.load_inner(None)
    }

    /// Like [`load`](Self::load), on the blocking pool.
    ///
    /// `token` is checked before reading and before the values are replaced.
    ///
    /// # Errors
    ///
    /// See [`load`](Self::load). Returns [`CoreError::Cancelled`] if `token`
    /// fires first.
    pub async fn load_async(self: &Arc<Self>, token: CancelToken) -> CoreResult<usize> {
        let Some(runtime) = self.context.config.runtime_handle() else {
            return self.load_inner(Some(&token));
        };
        let store = Arc::clone(self);
        runtime
            .spawn_blocking(move || store.load_inner(Some(&token)))
            .await
            .map_err(|e| CoreError::runtime(e.to_string()))?
    }

    /// Cancels any save in flight.
    pub fn dispose(&self) {
        self.cancel_active_save();
    }

    fn cancel_active_save(&self) {
        if let Some(token) = self.active_save.lock().take() {
            token.cancel();
        }
    }

    fn begin_save(&self) -> CancelToken {
        let token = CancelToken::new();
        if let Some(previous) = self.active_save.lock().replace(token.clone()) {
            previous.cancel();
        }
        tracing::debug!(target: PERF_TARGET, group = %self.name, "save started");
        token
    }

    fn end_save(&self, token: &CancelToken) {
        let mut active = self.active_save.lock();
        if active.as_ref().is_some_and(|t| t.same_as(token)) {
            *active = None;
        }
    }

    fn versioned_snapshot(&self) -> (Entries, u64) {
        let entries = self.entries.read();
        (entries.clone(), self.revision.load(Ordering::SeqCst))
    }

    fn run_save(
        &self,
        entries: &Entries,
        revision: u64,
        token: &CancelToken,
        started: Instant,
    ) -> CoreResult<Duration> {
        let result = self.write(entries, token);
        self.end_save(token);
        result?;
        self.saved_revision.fetch_max(revision, Ordering::SeqCst);
        Ok(started.elapsed())
    }

    fn write(&self, entries: &Entries, token: &CancelToken) -> CoreResult<()> {
        token.check()?;
        let frame = self
            .context
            .codec
            .encode(entries)
            .map_err(|e| CoreError::archive(&self.name, e))?;

        token.check()?;
        let staged = kvsave_storage::stage(&self.path, &frame)?;

        token.check()?;
        staged
            .commit_with(&self.context.locks, self.context.config.lock_timeout, || {
                !token.is_cancelled()
            })
            .map_err(|e| match e {
                StorageError::Aborted { .. } => CoreError::Cancelled,
                e => e.into(),
            })
    }

    fn report(&self, result: CoreResult<Duration>, mode: &'static str) -> SaveOutcome {
        match result {
            Ok(elapsed) => {
                tracing::debug!(
                    target: PERF_TARGET,
                    group = %self.name,
                    mode,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "save finished"
                );
                SaveOutcome::Completed { elapsed }
            }
            Err(CoreError::Cancelled) => {
                tracing::info!(group = %self.name, mode, "save superseded");
                SaveOutcome::Cancelled
            }
            Err(e) => {
                tracing::error!(
                    group = %self.name,
                    path = %self.path.display(),
                    mode,
                    error = %e,
                    "save failed"
                );
                SaveOutcome::Failed(e.to_string())
            }
        }
    }

    fn load_inner(&self, token: Option<&CancelToken>) -> CoreResult<usize> {
        let _span = tracing::debug_span!("load", group = %self.name).entered();
        let started = Instant::now();
        tracing::debug!(target: PERF_TARGET, "load started");

        if let Some(token) = token {
            token.check()?;
        }
        self.loads.fetch_add(1, Ordering::SeqCst);
        let _loading = LoadGuard(&self.loads);

        // Held until the values are replaced so no snapshot of the old values
        // can be taken after the active save is cancelled.
        let mut current = self.entries.write();
        let entries = self.context.locks.with_lock(
            &self.path,
            self.context.config.lock_timeout,
            || {
                self.cancel_active_save();
                Ok(self.read_entries())
            },
        )??;

        if let Some(token) = token {
            token.check()?;
        }

        let count = entries.len();
        *current = entries;
        let revision = self.revision.fetch_add(1, Ordering::SeqCst) + 1;
        self.saved_revision.fetch_max(revision, Ordering::SeqCst);
        drop(current);

        tracing::info!(entries = count, "group loaded");
        tracing::debug!(
            target: PERF_TARGET,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "load finished"
        );
        Ok(count)
    }

    fn read_entries(&self) -> CoreResult<Entries> {
        match fs::read(&self.path) {
            Ok(data) => self.context.codec.decode(&data).map_err(|e| {
                tracing::error!(path = %self.path.display(), error = %e, "group file is corrupt");
                CoreError::archive(&self.name, e)
            }),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no group file, starting empty");
                Ok(Entries::new())
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for GroupStore {
    fn drop(&mut self) {
        self.dispose();
    }
}
