//! # KvSave Storage
//!
//! File-level building blocks for KvSave.
//!
//! This crate knows nothing about the archive frame or about groups. It
//! provides:
//!
//! - [`stage`] / [`StagedWrite::commit`] - write to a temporary file, then
//!   atomically rename it over the target
//! - [`FileLockTable`] - one lock per target path, held only for the replace
//! - [`Cipher`] - payload encryption contract, implemented by
//!   [`XorCipher`] and [`AesGcmCipher`]
//!
//! ## Example
//!
//! ```rust
//! use kvsave_storage::{write_atomic, FileLockTable};
//! use std::time::Duration;
//!
//! let dir = tempfile::tempdir().unwrap();
//! let path = dir.path().join("Default.sav");
//! let locks = FileLockTable::new();
//! write_atomic(&path, b"hello", &locks, Duration::from_secs(1)).unwrap();
//! assert_eq!(std::fs::read(&path).unwrap(), b"hello");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod atomic;
mod cipher;
mod error;
mod lock_table;

pub use atomic::{remove_if_exists, stage, write_atomic, StagedWrite, TEMP_SUFFIX};
pub use cipher::{AesGcmCipher, Cipher, EncryptionKey, XorCipher, KEY_SIZE, NONCE_SIZE, TAG_SIZE};
pub use error::{StorageError, StorageResult};
pub use lock_table::FileLockTable;
