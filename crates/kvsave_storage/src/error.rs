//! Error types for storage operations.

use std::io;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// The per-file lock could not be acquired in time.
    #[error("timed out after {timeout:?} waiting for file lock on {}", path.display())]
    LockTimeout {
        /// The file whose lock was contended.
        path: PathBuf,
        /// How long we waited.
        timeout: Duration,
    },

    /// The staged temporary file no longer matches what was written.
    #[error("staged file {} is {actual} bytes, expected {expected}", path.display())]
    StagedFileMismatch {
        /// Path of the temporary file.
        path: PathBuf,
        /// Bytes written when staging.
        expected: u64,
        /// Bytes found before the replace.
        actual: u64,
    },

    /// The write was abandoned by the caller right before the replace.
    #[error("write to {} aborted before replace", path.display())]
    Aborted {
        /// The target that was not replaced.
        path: PathBuf,
    },

    /// Encryption or decryption failed.
    #[error("cipher error: {0}")]
    Cipher(String),

    /// Invalid key size.
    #[error("invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize {
        /// Expected size in bytes.
        expected: usize,
        /// Actual size in bytes.
        actual: usize,
    },
}

impl StorageError {
    /// Creates a cipher error.
    pub fn cipher(message: impl Into<String>) -> Self {
        Self::Cipher(message.into())
    }

    /// Returns true for failures a later retry may get past.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Io(_) | Self::LockTimeout { .. } | Self::StagedFileMismatch { .. }
        )
    }
}
