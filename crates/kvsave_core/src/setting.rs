//! Per-group archive settings.

use crate::error::{CoreError, CoreResult};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// How a group is stored and when it is loaded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveSetting {
    /// Background saves run inline instead.
    pub sync_only: bool,
    /// The file lives in the per-user directory.
    pub user_scoped: bool,
    /// Skipped by bulk loads and loaded on first access instead.
    pub lazy_load: bool,
}

impl ArchiveSetting {
    /// Sets `sync_only`.
    #[must_use]
    pub const fn sync_only(mut self, value: bool) -> Self {
        self.sync_only = value;
        self
    }

    /// Sets `user_scoped`.
    #[must_use]
    pub const fn user_scoped(mut self, value: bool) -> Self {
        self.user_scoped = value;
        self
    }

    /// Sets `lazy_load`.
    #[must_use]
    pub const fn lazy_load(mut self, value: bool) -> Self {
        self.lazy_load = value;
        self
    }
}

/// Source of archive settings for groups.
pub trait ArchiveSettingProvider: Send + Sync {
    /// Setting used for groups without a special entry.
    fn default_setting(&self) -> ArchiveSetting;

    /// The setting configured specifically for `group`, if any.
    fn special_setting(&self, group: &str) -> Option<ArchiveSetting>;

    /// Whether payloads are encrypted.
    fn encryption_enabled(&self) -> bool;

    /// The effective setting for `group`.
    fn setting(&self, group: &str) -> ArchiveSetting {
        self.special_setting(group)
            .unwrap_or_else(|| self.default_setting())
    }
}

/// Settings held in memory, optionally read from JSON.
///
/// ```rust
/// use kvsave_core::{ArchiveSettingProvider, StaticSettingProvider};
///
/// let provider = StaticSettingProvider::from_json_str(
///     r#"{ "groups": { "Stats": { "lazy_load": true } } }"#,
/// ).unwrap();
/// assert!(provider.setting("Stats").lazy_load);
/// assert!(!provider.setting("Player").lazy_load);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StaticSettingProvider {
    /// Encrypt payloads.
    pub encrypt: bool,
    /// Setting for groups not listed in `groups`.
    pub default: ArchiveSetting,
    /// Special settings by group name.
    pub groups: HashMap<String, ArchiveSetting>,
}

impl StaticSettingProvider {
    /// Creates a provider with default settings and no special groups.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default setting.
    #[must_use]
    pub fn with_default(mut self, setting: ArchiveSetting) -> Self {
        self.default = setting;
        self
    }

    /// Adds a special setting for one group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>, setting: ArchiveSetting) -> Self {
        self.groups.insert(group.into(), setting);
        self
    }

    /// Enables or disables encryption.
    #[must_use]
    pub fn with_encryption(mut self, encrypt: bool) -> Self {
        self.encrypt = encrypt;
        self
    }

    /// Parses a provider from JSON.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the document is malformed.
    pub fn from_json_str(json: &str) -> CoreResult<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::config(format!("settings: {e}")))
    }

    /// Reads a provider from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an I/O error if the file cannot be read, or a configuration
    /// error if it is malformed.
    pub fn from_json_file(path: &Path) -> CoreResult<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
            .map_err(|e| CoreError::config(format!("{}: {e}", path.display())))
    }
}

impl ArchiveSettingProvider for StaticSettingProvider {
    fn default_setting(&self) -> ArchiveSetting {
        self.default
    }

    fn special_setting(&self, group: &str) -> Option<ArchiveSetting> {
        self.groups.get(group).copied()
    }

    fn encryption_enabled(&self) -> bool {
        self.encrypt
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn special_overrides_default() {
        let provider = StaticSettingProvider::new()
            .with_default(ArchiveSetting::default().sync_only(true))
            .with_group("Stats", ArchiveSetting::default().lazy_load(true));

        assert!(provider.setting("Player").sync_only);
        assert!(provider.special_setting("Player").is_none());
        assert!(provider.setting("Stats").lazy_load);
        assert!(!provider.setting("Stats").sync_only);
    }

    #[test]
    fn lazy_default_is_not_special() {
        let provider =
            StaticSettingProvider::new().with_default(ArchiveSetting::default().lazy_load(true));
        assert!(provider.setting("Any").lazy_load);
        assert_eq!(provider.special_setting("Any"), None);
    }

    #[test]
    fn json_missing_fields_default() {
        let provider = StaticSettingProvider::from_json_str(
            r#"{
                "encrypt": true,
                "default": { "user_scoped": true },
                "groups": { "Audio": { "sync_only": true } }
            }"#,
        )
        .unwrap();

        assert!(provider.encryption_enabled());
        assert_eq!(
            provider.default_setting(),
            ArchiveSetting::default().user_scoped(true)
        );
        assert_eq!(
            provider.setting("Audio"),
            ArchiveSetting::default().sync_only(true)
        );
    }

    #[test]
    fn json_errors_are_config_errors() {
        let err = StaticSettingProvider::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, CoreError::Config { .. }));
    }

    #[test]
    fn json_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        let provider = StaticSettingProvider::new()
            .with_encryption(true)
            .with_group("Stats", ArchiveSetting::default().lazy_load(true));
        std::fs::write(&path, serde_json::to_string_pretty(&provider).unwrap()).unwrap();

        assert_eq!(StaticSettingProvider::from_json_file(&path).unwrap(), provider);
    }
}
