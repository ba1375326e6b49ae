//! # KvSave Core
//!
//! Named groups of typed values, each persisted as one archive file.
//!
//! This crate provides:
//! - [`GroupStore`] - one group's values, dirty tracking, sync and
//!   background saves, loads
//! - [`GroupRegistry`] - the facade that creates, loads and saves groups
//! - [`ArchiveCodec`] - the framed on-disk format
//! - [`ArchiveSettingProvider`] - per-group storage settings
//!
//! ## Usage
//!
//! ```rust
//! use kvsave_core::{ArchiveSetting, GroupRegistry, SaveConfig, StaticSettingProvider};
//! use std::sync::Arc;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let settings = StaticSettingProvider::new()
//!     .with_group("Stats", ArchiveSetting::default().lazy_load(true));
//! let registry = GroupRegistry::new(SaveConfig::new(dir.path()), Arc::new(settings)).unwrap();
//!
//! registry.set_value("Player", "name", "Ada").unwrap();
//! registry.set_value("Player", "hp", 100).unwrap();
//! for (group, outcome) in registry.save(false) {
//!     assert!(outcome.is_completed(), "{group}: {outcome:?}");
//! }
//! assert_eq!(registry.get_value("Player", "name", String::new()).unwrap(), "Ada");
//! ```
//!
//! ## Logging
//!
//! Lifecycle events go through `tracing`. Timings are emitted at `debug`
//! under the [`PERF_TARGET`] target.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod archive;
mod cancel;
mod config;
mod error;
mod group;
mod registry;
mod setting;

pub use archive::{ArchiveCodec, Frame};
pub use cancel::CancelToken;
pub use config::{SaveConfig, DEFAULT_FILE_EXTENSION, DEFAULT_PUBLIC_ROOT, DEFAULT_USER_KEY};
pub use error::{ArchiveError, ArchiveResult, CoreError, CoreResult};
pub use group::{GroupStore, SaveOutcome, SaveTask, StoreContext};
pub use registry::{GroupRegistry, GroupRegistryBuilder};
pub use setting::{ArchiveSetting, ArchiveSettingProvider, StaticSettingProvider};

pub use kvsave_codec::{Entries, FromTypedValue, TypedValue, ValueType};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// `tracing` target for timing events.
pub const PERF_TARGET: &str = "kvsave::perf";
