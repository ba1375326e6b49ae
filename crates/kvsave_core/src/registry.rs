//! Registry of named groups.

use crate::archive::ArchiveCodec;
use crate::config::SaveConfig;
use crate::error::{CoreError, CoreResult};
use crate::group::{GroupStore, SaveOutcome, SaveTask, StoreContext};
use crate::setting::{ArchiveSettingProvider, StaticSettingProvider};
use kvsave_codec::{CborSerializer, EntrySerializer, FromTypedValue, TypedValue};
use kvsave_storage::{remove_if_exists, Cipher};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Builder for [`GroupRegistry`].
pub struct GroupRegistryBuilder {
    config: SaveConfig,
    provider: Arc<dyn ArchiveSettingProvider>,
    serializer: Arc<dyn EntrySerializer>,
    cipher: Option<Arc<dyn Cipher>>,
}

impl GroupRegistryBuilder {
    /// Sets the settings provider. Defaults to [`StaticSettingProvider`]
    /// with default settings.
    #[must_use]
    pub fn provider(mut self, provider: Arc<dyn ArchiveSettingProvider>) -> Self {
        self.provider = provider;
        self
    }

    /// Sets the payload serializer. Defaults to [`CborSerializer`].
    #[must_use]
    pub fn serializer(mut self, serializer: Arc<dyn EntrySerializer>) -> Self {
        self.serializer = serializer;
        self
    }

    /// Sets the cipher used when the provider enables encryption.
    #[must_use]
    pub fn cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Builds the registry.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the provider enables encryption but
    /// no cipher was supplied.
    pub fn build(self) -> CoreResult<GroupRegistry> {
        let mut codec = ArchiveCodec::new(self.serializer);
        match (self.provider.encryption_enabled(), self.cipher) {
            (true, Some(cipher)) => codec = codec.with_cipher(cipher),
            (true, None) => {
                return Err(CoreError::config(
                    "encryption is enabled but no cipher is configured",
                ))
            }
            (false, Some(cipher)) => {
                tracing::debug!(cipher = cipher.name(), "encryption disabled, cipher unused");
            }
            (false, None) => {}
        }

        Ok(GroupRegistry {
            context: StoreContext::new(self.config, codec),
            provider: self.provider,
            groups: RwLock::new(HashMap::new()),
        })
    }
}

/// Entry point for reading and writing save data.
///
/// Groups are created on first write. Groups whose special setting asks for
/// lazy loading are skipped by bulk loads and read from disk on first
/// access instead.
///
/// ```rust
/// use kvsave_core::{GroupRegistry, SaveConfig};
///
/// let dir = tempfile::tempdir().unwrap();
/// let registry = GroupRegistry::builder(SaveConfig::new(dir.path())).build().unwrap();
/// registry.set_value("Player", "hp", 100).unwrap();
/// registry.save(false);
///
/// let reopened = GroupRegistry::builder(SaveConfig::new(dir.path())).build().unwrap();
/// reopened.load_all().unwrap();
/// assert_eq!(reopened.get_value("Player", "hp", 0).unwrap(), 100);
/// ```
pub struct GroupRegistry {
    context: StoreContext,
    provider: Arc<dyn ArchiveSettingProvider>,
    groups: RwLock<HashMap<String, Arc<GroupStore>>>,
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("context", &self.context)
            .field("groups", &self.group_names())
            .finish_non_exhaustive()
    }
}

impl GroupRegistry {
    /// Starts building a registry.
    #[must_use]
    pub fn builder(config: SaveConfig) -> GroupRegistryBuilder {
        GroupRegistryBuilder {
            config,
            provider: Arc::new(StaticSettingProvider::default()),
            serializer: Arc::new(CborSerializer),
            cipher: None,
        }
    }

    /// Creates a registry with the default serializer and no cipher.
    ///
    /// # Errors
    ///
    /// See [`GroupRegistryBuilder::build`].
    pub fn new(config: SaveConfig, provider: Arc<dyn ArchiveSettingProvider>) -> CoreResult<Self> {
        Self::builder(config).provider(provider).build()
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &SaveConfig {
        self.context.config()
    }

    /// The settings provider.
    #[must_use]
    pub fn provider(&self) -> &dyn ArchiveSettingProvider {
        self.provider.as_ref()
    }

    /// Stores a value, creating the group if needed.
    ///
    /// A lazy group that is not cached yet is loaded first so its file is
    /// not overwritten by a group holding only this key.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy group fails to load.
    pub fn set_value(
        &self,
        group: &str,
        key: &str,
        value: impl Into<TypedValue>,
    ) -> CoreResult<bool> {
        Ok(self.group_or_create(group)?.set_data(key, value))
    }

    /// Reads a value, or `default` if the group or key is missing.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy group fails to load.
    pub fn get_value<T: FromTypedValue>(&self, group: &str, key: &str, default: T) -> CoreResult<T> {
        match self.group(group)? {
            Some(store) => Ok(store.get_data(key, default)),
            None => Ok(default),
        }
    }

    /// Looks a group up, loading it if it is lazy and not cached yet.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy group fails to load.
    pub fn group(&self, name: &str) -> CoreResult<Option<Arc<GroupStore>>> {
        if let Some(store) = self.cached(name) {
            return Ok(Some(store));
        }
        if !self.is_lazy(name) {
            return Ok(None);
        }
        self.group_or_create(name).map(Some)
    }

    /// Looks a group up, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if a lazy group fails to load; nothing is cached in
    /// that case.
    pub fn group_or_create(&self, name: &str) -> CoreResult<Arc<GroupStore>> {
        if let Some(store) = self.cached(name) {
            return Ok(store);
        }

        let store = self.new_store(name);
        if self.is_lazy(name) {
            tracing::debug!(group = name, "loading lazy group on first access");
            store.load()?;
        }

        // A concurrent caller may have cached the group meanwhile; theirs wins.
        let mut groups = self.groups.write();
        Ok(Arc::clone(groups.entry(name.to_string()).or_insert(store)))
    }

    /// Saves groups synchronously, every group if `force_all` and otherwise
    /// only dirty ones.
    pub fn save(&self, force_all: bool) -> Vec<(String, SaveOutcome)> {
        self.stores()
            .into_iter()
            .filter(|store| force_all || store.is_dirty())
            .map(|store| (store.name().to_string(), store.save()))
            .collect()
    }

    /// Starts a background save for every selected group.
    pub fn save_async_all(&self, force_all: bool) -> Vec<SaveTask> {
        self.stores()
            .into_iter()
            .filter(|store| force_all || store.is_dirty())
            .map(|store| store.save_async())
            .collect()
    }

    /// Loads (or reloads) one group from disk.
    ///
    /// A group that is not cached is only cached if the load succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the file is corrupt or unreadable.
    pub fn load_group(&self, name: &str) -> CoreResult<usize> {
        if let Some(store) = self.cached(name) {
            return store.load();
        }
        let store = self.new_store(name);
        let count = store.load()?;
        self.groups.write().entry(name.to_string()).or_insert(store);
        Ok(count)
    }

    /// Loads every group file in `dir`, skipping lazy groups.
    ///
    /// A corrupt file does not stop the other groups from loading. Returns
    /// the number of groups loaded.
    ///
    /// # Errors
    ///
    /// Returns the first load error after all files were tried, or an I/O
    /// error if the directory cannot be listed. A missing directory loads
    /// nothing.
    pub fn load_all_from_directory(&self, dir: &Path) -> CoreResult<usize> {
        let read_dir = match fs::read_dir(dir) {
            Ok(read_dir) => read_dir,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };

        let mut loaded = 0;
        let mut first_error = None;
        for entry in read_dir {
            let path = entry?.path();
            if !path.is_file() || !self.config().is_group_file(&path) {
                continue;
            }
            let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) else {
                tracing::warn!(path = %path.display(), "skipping group file with non UTF-8 name");
                continue;
            };
            if self.is_lazy(name) {
                tracing::debug!(group = name, "skipping lazy group");
                continue;
            }

            match self.load_group(name) {
                Ok(_) => loaded += 1,
                Err(e) => {
                    tracing::error!(group = name, error = %e, "failed to load group");
                    first_error.get_or_insert(e);
                }
            }
        }

        tracing::info!(dir = %dir.display(), loaded, "groups loaded");
        match first_error {
            Some(e) => Err(e),
            None => Ok(loaded),
        }
    }

    /// Loads both the public and the user directory.
    ///
    /// # Errors
    ///
    /// See [`load_all_from_directory`](Self::load_all_from_directory).
    pub fn load_all(&self) -> CoreResult<usize> {
        let public = self.config().public_root.clone();
        let user = self.config().user_directory();

        let public_result = self.load_all_from_directory(&public);
        if user == public {
            return public_result;
        }
        let user_result = self.load_all_from_directory(&user);
        Ok(public_result? + user_result?)
    }

    /// Drops a group and deletes its file.
    ///
    /// Returns whether a file was deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be removed.
    pub fn delete_group(&self, name: &str) -> CoreResult<bool> {
        let removed = self.groups.write().remove(name);
        let path = match &removed {
            Some(store) => {
                store.dispose();
                store.path().to_path_buf()
            }
            None => self.config().group_path(name, self.provider.setting(name)),
        };

        let deleted = self
            .context
            .locks()
            .with_lock(&path, self.config().lock_timeout, || remove_if_exists(&path))?;
        tracing::info!(group = name, deleted, "group deleted");
        Ok(deleted)
    }

    /// Drops every cached group without touching disk.
    pub fn clear_cache(&self) {
        let stores: Vec<_> = self.groups.write().drain().map(|(_, store)| store).collect();
        for store in &stores {
            store.dispose();
        }
        tracing::debug!(dropped = stores.len(), "group cache cleared");
    }

    /// Names of cached groups, sorted.
    #[must_use]
    pub fn group_names(&self) -> Vec<String> {
        let mut names: Vec<_> = self.groups.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Names of cached groups with unsaved changes, sorted.
    #[must_use]
    pub fn dirty_groups(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .groups
            .read()
            .values()
            .filter(|store| store.is_dirty())
            .map(|store| store.name().to_string())
            .collect();
        names.sort();
        names
    }

    /// Number of cached groups.
    #[must_use]
    pub fn len(&self) -> usize {
        self.groups.read().len()
    }

    /// Returns true if no group is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.groups.read().is_empty()
    }

    /// Releases file locks no save is using.
    pub fn prune_file_locks(&self) -> usize {
        self.context.locks().prune()
    }

    fn cached(&self, name: &str) -> Option<Arc<GroupStore>> {
        self.groups.read().get(name).cloned()
    }

    fn stores(&self) -> Vec<Arc<GroupStore>> {
        self.groups.read().values().cloned().collect()
    }

    fn new_store(&self, name: &str) -> Arc<GroupStore> {
        Arc::new(GroupStore::new(
            name,
            self.provider.setting(name),
            self.context.clone(),
        ))
    }

    fn is_lazy(&self, name: &str) -> bool {
        self.provider
            .special_setting(name)
            .is_some_and(|setting| setting.lazy_load)
    }
}
