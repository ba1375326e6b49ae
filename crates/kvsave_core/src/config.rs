//! Save engine configuration.

use crate::setting::ArchiveSetting;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::runtime::Handle;

/// Default directory for public group files.
pub const DEFAULT_PUBLIC_ROOT: &str = "Save";

/// Default per-user key.
pub const DEFAULT_USER_KEY: &str = "AllUser";

/// Default group file extension, without the dot.
pub const DEFAULT_FILE_EXTENSION: &str = "sav";

/// Configuration shared by a registry and all of its groups.
#[derive(Debug, Clone)]
pub struct SaveConfig {
    /// Directory holding groups that are not user scoped.
    pub public_root: PathBuf,

    /// Identifies the current user. User-scoped groups live under
    /// `public_root/<user_key>` unless `user_root` overrides it.
    pub user_key: String,

    /// Explicit directory for user-scoped groups.
    pub user_root: Option<PathBuf>,

    /// Group file extension, without the dot.
    pub file_extension: String,

    /// How long a save waits for the per-file lock before failing.
    pub lock_timeout: Duration,

    /// Largest payload accepted when reading or writing a frame.
    pub max_payload_len: u32,

    /// Runtime for background saves. Falls back to the ambient runtime.
    pub runtime: Option<Handle>,
}

impl Default for SaveConfig {
    fn default() -> Self {
        Self {
            public_root: PathBuf::from(DEFAULT_PUBLIC_ROOT),
            user_key: DEFAULT_USER_KEY.to_string(),
            user_root: None,
            file_extension: DEFAULT_FILE_EXTENSION.to_string(),
            lock_timeout: Duration::from_secs(1),
            max_payload_len: 100 * 1024 * 1024, // 100 MiB
            runtime: None,
        }
    }
}

impl SaveConfig {
    /// Creates a configuration rooted at `public_root`.
    #[must_use]
    pub fn new(public_root: impl Into<PathBuf>) -> Self {
        Self {
            public_root: public_root.into(),
            ..Self::default()
        }
    }

    /// Sets the user key.
    #[must_use]
    pub fn user_key(mut self, key: impl Into<String>) -> Self {
        self.user_key = key.into();
        self
    }

    /// Overrides the directory for user-scoped groups.
    #[must_use]
    pub fn user_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.user_root = Some(root.into());
        self
    }

    /// Sets the file extension.
    #[must_use]
    pub fn file_extension(mut self, extension: impl Into<String>) -> Self {
        self.file_extension = extension.into();
        self
    }

    /// Sets the lock wait timeout.
    #[must_use]
    pub const fn lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Sets the payload size limit.
    #[must_use]
    pub const fn max_payload_len(mut self, len: u32) -> Self {
        self.max_payload_len = len;
        self
    }

    /// Sets the runtime used for background saves.
    #[must_use]
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.runtime = Some(handle);
        self
    }

    /// Directory for user-scoped groups.
    #[must_use]
    pub fn user_directory(&self) -> PathBuf {
        match &self.user_root {
            Some(root) => root.clone(),
            None => self.public_root.join(&self.user_key),
        }
    }

    /// Directory a group with `setting` lives in.
    #[must_use]
    pub fn directory_for(&self, setting: ArchiveSetting) -> PathBuf {
        if setting.user_scoped {
            self.user_directory()
        } else {
            self.public_root.clone()
        }
    }

    /// Full path of a group's file.
    #[must_use]
    pub fn group_path(&self, name: &str, setting: ArchiveSetting) -> PathBuf {
        self.directory_for(setting)
            .join(format!("{name}.{}", self.file_extension))
    }

    /// Returns true if `path` carries the group file extension.
    ///
    /// The match is exact, since a group's path is rebuilt from its name and
    /// the configured extension.
    #[must_use]
    pub fn is_group_file(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext == self.file_extension.as_str())
    }

    pub(crate) fn runtime_handle(&self) -> Option<Handle> {
        self.runtime.clone().or_else(|| Handle::try_current().ok())
    }
}
