//! Archive frame format.
//!
//! A group file is one frame:
//!
//! ```text
//! ┌───────────────┬─────────┬────────────┬─────────┬──────────────┐
//! │ #FileArchive# │ version │ len (i32)  │ payload │ #EndOfGroup# │
//! │   13 bytes    │ 1 byte  │ 4 bytes LE │ len     │   12 bytes   │
//! └───────────────┴─────────┴────────────┴─────────┴──────────────┘
//! ```
//!
//! The payload is the serialized entry map, encrypted when a cipher is
//! configured. A damaged footer is reported but does not fail the read.

use crate::error::{ArchiveError, ArchiveResult};
use bytes::{Buf, BufMut};
use kvsave_codec::{CborSerializer, Entries, EntrySerializer};
use kvsave_storage::Cipher;
use std::sync::Arc;

/// Magic bytes opening every frame.
pub const HEADER_MAGIC: &[u8; 13] = b"#FileArchive#";

/// Magic bytes closing every frame.
pub const FOOTER_MAGIC: &[u8; 12] = b"#EndOfGroup#";

/// The only frame version this build reads and writes.
pub const FORMAT_VERSION: u8 = 0x01;

/// Default payload size limit (100 MiB).
pub const MAX_PAYLOAD_LEN: u32 = 100 * 1024 * 1024;

/// Bytes before the payload.
pub const PREFIX_LEN: usize = HEADER_MAGIC.len() + 1 + 4;

/// A parsed frame borrowing its payload from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Version byte.
    pub version: u8,
    /// Payload bytes, still encrypted if a cipher was used.
    pub payload: &'a [u8],
    /// Whether the footer magic followed the payload.
    pub footer_intact: bool,
    /// Bytes after the footer, or after the payload if the footer is missing.
    pub trailing: usize,
}

/// Wraps `payload` in a frame.
///
/// # Errors
///
/// Returns [`ArchiveError::PayloadTooLarge`] if the payload exceeds `max_len`.
pub fn write_frame(payload: &[u8], max_len: u32) -> ArchiveResult<Vec<u8>> {
    let len = i32::try_from(payload.len())
        .ok()
        .filter(|len| i64::from(*len) <= i64::from(max_len))
        .ok_or(ArchiveError::PayloadTooLarge {
            len: payload.len(),
            max: max_len,
        })?;

    let mut buf = Vec::with_capacity(PREFIX_LEN + payload.len() + FOOTER_MAGIC.len());
    buf.put_slice(HEADER_MAGIC);
    buf.put_u8(FORMAT_VERSION);
    buf.put_i32_le(len);
    buf.put_slice(payload);
    buf.put_slice(FOOTER_MAGIC);
    Ok(buf)
}

/// Parses and validates a frame.
///
/// Checks run in a fixed order: header, version, declared length, payload
/// presence. The footer is only reported through [`Frame::footer_intact`].
///
/// # Errors
///
/// Returns the first [`ArchiveError`] encountered.
pub fn read_frame(data: &[u8], max_len: u32) -> ArchiveResult<Frame<'_>> {
    let mut buf = data;

    if buf.remaining() < HEADER_MAGIC.len() {
        return Err(ArchiveError::Truncated {
            len: data.len(),
            needed: PREFIX_LEN,
        });
    }
    if &buf[..HEADER_MAGIC.len()] != HEADER_MAGIC {
        return Err(ArchiveError::BadHeader);
    }
    buf.advance(HEADER_MAGIC.len());

    if buf.remaining() < 1 + 4 {
        return Err(ArchiveError::Truncated {
            len: data.len(),
            needed: PREFIX_LEN,
        });
    }

    let version = buf.get_u8();
    if version != FORMAT_VERSION {
        return Err(ArchiveError::UnsupportedVersion {
            found: version,
            expected: FORMAT_VERSION,
        });
    }

    let declared = buf.get_i32_le();
    let len = usize::try_from(declared)
        .ok()
        .filter(|len| *len as u64 <= u64::from(max_len))
        .ok_or(ArchiveError::InvalidLength {
            declared: i64::from(declared),
            max: max_len,
        })?;

    if buf.remaining() < len {
        return Err(ArchiveError::TruncatedPayload {
            declared: len,
            available: buf.remaining(),
        });
    }
    let payload = &buf[..len];
    buf.advance(len);

    let footer_intact = buf.starts_with(FOOTER_MAGIC);
    let trailing = if footer_intact {
        buf.remaining() - FOOTER_MAGIC.len()
    } else {
        buf.remaining()
    };

    Ok(Frame {
        version,
        payload,
        footer_intact,
        trailing,
    })
}

/// Turns entry maps into frame bytes and back.
///
/// Shared by every group of a registry.
#[derive(Clone)]
pub struct ArchiveCodec {
    serializer: Arc<dyn EntrySerializer>,
    cipher: Option<Arc<dyn Cipher>>,
    max_payload_len: u32,
}

impl Default for ArchiveCodec {
    fn default() -> Self {
        Self::new(Arc::new(CborSerializer))
    }
}

impl std::fmt::Debug for ArchiveCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveCodec")
            .field("serializer", &self.serializer.name())
            .field("cipher", &self.cipher.as_ref().map(|c| c.name()))
            .field("max_payload_len", &self.max_payload_len)
            .finish()
    }
}

impl ArchiveCodec {
    /// Creates an unencrypted codec.
    #[must_use]
    pub fn new(serializer: Arc<dyn EntrySerializer>) -> Self {
        Self {
            serializer,
            cipher: None,
            max_payload_len: MAX_PAYLOAD_LEN,
        }
    }

    /// Encrypts payloads with `cipher`.
    #[must_use]
    pub fn with_cipher(mut self, cipher: Arc<dyn Cipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Sets the payload size limit.
    #[must_use]
    pub fn with_max_payload_len(mut self, len: u32) -> Self {
        self.max_payload_len = len;
        self
    }

    /// The entry serializer.
    #[must_use]
    pub fn serializer(&self) -> &dyn EntrySerializer {
        self.serializer.as_ref()
    }

    /// The payload cipher, if any.
    #[must_use]
    pub fn cipher(&self) -> Option<&dyn Cipher> {
        self.cipher.as_deref()
    }

    /// The payload size limit.
    #[must_use]
    pub fn max_payload_len(&self) -> u32 {
        self.max_payload_len
    }

    /// Serializes, encrypts and frames `entries`.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or encryption fails, or if the
    /// payload is too large.
    pub fn encode(&self, entries: &Entries) -> ArchiveResult<Vec<u8>> {
        let mut payload = self.serializer.serialize(entries)?;
        if let Some(cipher) = &self.cipher {
            payload = cipher.encrypt(&payload).map_err(ArchiveError::Cipher)?;
        }
        write_frame(&payload, self.max_payload_len)
    }

    /// Parses the frame, decrypts and deserializes the payload.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation step fails.
    pub fn decode(&self, data: &[u8]) -> ArchiveResult<Entries> {
        let frame = self.read_frame(data)?;
        if !frame.footer_intact {
            tracing::warn!(len = data.len(), "archive footer mismatch, loading anyway");
        }

        match &self.cipher {
            Some(cipher) => {
                let plain = cipher.decrypt(frame.payload).map_err(ArchiveError::Cipher)?;
                Ok(self.serializer.deserialize(&plain)?)
            }
            None => Ok(self.serializer.deserialize(frame.payload)?),
        }
    }

    /// Parses the frame with this codec's size limit.
    ///
    /// # Errors
    ///
    /// See [`read_frame`].
    pub fn read_frame<'a>(&self, data: &'a [u8]) -> ArchiveResult<Frame<'a>> {
        read_frame(data, self.max_payload_len)
    }
}
