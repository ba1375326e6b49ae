//! Error types for the codec crate.

use thiserror::Error;

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors that can occur while serializing or deserializing entries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Failed to encode entries.
    #[error("encoding failed: {message}")]
    EncodingFailed {
        /// Description of the encoding error.
        message: String,
    },

    /// Failed to decode entry bytes.
    #[error("decoding failed: {message}")]
    DecodingFailed {
        /// Description of the decoding error.
        message: String,
    },

    /// Indefinite-length items are forbidden.
    #[error("indefinite-length items are forbidden")]
    IndefiniteLengthForbidden,

    /// Invalid UTF-8 string.
    #[error("invalid UTF-8 string")]
    InvalidUtf8,

    /// Unexpected end of input.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Bytes were left over after the entry map.
    #[error("{remaining} trailing bytes after entry map")]
    TrailingBytes {
        /// Number of unread bytes.
        remaining: usize,
    },

    /// Invalid structure.
    #[error("invalid structure: {message}")]
    InvalidStructure {
        /// Description of the structural error.
        message: String,
    },

    /// A stored type tag is not one of the known value types.
    #[error("unknown value type tag: {tag}")]
    UnknownTypeTag {
        /// The tag that was read.
        tag: u64,
    },

    /// The encoded item is of a kind no typed value can hold.
    #[error("unsupported item: {type_name}")]
    UnsupportedType {
        /// Name of the unsupported item kind.
        type_name: String,
    },

    /// The same key appeared twice in one entry map.
    #[error("duplicate key: {key}")]
    DuplicateKey {
        /// The repeated key.
        key: String,
    },

    /// Integer does not fit the stored value type.
    #[error("integer overflow")]
    IntegerOverflow,

    /// A non-finite float cannot be represented by this serializer.
    #[error("non-finite float value for key {key}")]
    NonFiniteFloat {
        /// Key holding the offending value.
        key: String,
    },

    /// Declared length exceeds the decoder limit.
    #[error("size limit exceeded: claimed {claimed}, max allowed {max_allowed}")]
    SizeLimitExceeded {
        /// The claimed length.
        claimed: u64,
        /// The configured maximum.
        max_allowed: u64,
    },
}

impl CodecError {
    /// Create an encoding failed error.
    pub fn encoding_failed(message: impl Into<String>) -> Self {
        Self::EncodingFailed {
            message: message.into(),
        }
    }

    /// Create a decoding failed error.
    pub fn decoding_failed(message: impl Into<String>) -> Self {
        Self::DecodingFailed {
            message: message.into(),
        }
    }

    /// Create an invalid structure error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Create an unsupported type error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }
}
