//! Error types for KvSave core.

use std::io;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Result type for archive frame operations.
pub type ArchiveResult<T> = Result<T, ArchiveError>;

/// Problems with an archive file's contents.
///
/// Every variant except [`ArchiveError::PayloadTooLarge`] means the file on
/// disk cannot be trusted and must not be silently replaced by an empty
/// group.
#[derive(Debug, Error)]
pub enum ArchiveError {
    /// The file ends inside the header or version/length fields.
    #[error("archive truncated: {len} bytes, need at least {needed}")]
    Truncated {
        /// Bytes available.
        len: usize,
        /// Bytes required to read the fixed prefix.
        needed: usize,
    },

    /// The header magic does not match.
    #[error("not a save archive: header magic mismatch")]
    BadHeader,

    /// The version byte is not one this build reads.
    #[error("unsupported archive version {found}, expected {expected}")]
    UnsupportedVersion {
        /// Version found in the file.
        found: u8,
        /// Version this build reads and writes.
        expected: u8,
    },

    /// The declared payload length is negative or above the limit.
    #[error("invalid payload length {declared}, limit {max}")]
    InvalidLength {
        /// Length field as read.
        declared: i64,
        /// Configured upper bound.
        max: u32,
    },

    /// Fewer payload bytes are present than declared.
    #[error("payload truncated: declared {declared} bytes, found {available}")]
    TruncatedPayload {
        /// Length field as read.
        declared: usize,
        /// Bytes actually present after the length field.
        available: usize,
    },

    /// The payload to write exceeds the configured limit.
    #[error("payload of {len} bytes exceeds limit of {max}")]
    PayloadTooLarge {
        /// Encoded payload length.
        len: usize,
        /// Configured upper bound.
        max: u32,
    },

    /// Decryption or encryption of the payload failed.
    #[error("payload cipher failed: {0}")]
    Cipher(#[source] kvsave_storage::StorageError),

    /// The payload could not be (de)serialized.
    #[error("payload codec failed: {0}")]
    Codec(#[from] kvsave_codec::CodecError),
}

/// Errors that can occur in KvSave core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Storage layer error.
    #[error("storage error: {0}")]
    Storage(#[from] kvsave_storage::StorageError),

    /// Archive frame or payload error.
    #[error("archive error in group {group}: {source}")]
    Archive {
        /// Group whose archive failed.
        group: String,
        /// The underlying problem.
        #[source]
        source: ArchiveError,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the problem.
        message: String,
    },

    /// The operation was superseded or cancelled.
    #[error("operation cancelled")]
    Cancelled,

    /// Background task failure.
    #[error("background task failed: {message}")]
    Runtime {
        /// Description of the failure.
        message: String,
    },
}

impl CoreError {
    /// Creates an archive error for a group.
    pub fn archive(group: impl Into<String>, source: ArchiveError) -> Self {
        Self::Archive {
            group: group.into(),
            source,
        }
    }

    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a background task error.
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
        }
    }

    /// Returns true if the error means a file's contents cannot be trusted.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Archive { source, .. } if !matches!(source, ArchiveError::PayloadTooLarge { .. })
        )
    }

    /// Returns true for failures a later retry may get past.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Storage(e) => e.is_transient(),
            Self::Io(_) => true,
            _ => false,
        }
    }
}
