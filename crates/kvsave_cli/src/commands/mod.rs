//! CLI command implementations.

pub mod inspect;
pub mod verify;

use clap::Args;
use kvsave_codec::{CborSerializer, EntrySerializer, JsonSerializer};
use kvsave_core::ArchiveCodec;
use kvsave_storage::{AesGcmCipher, EncryptionKey, XorCipher};
use std::sync::Arc;

/// How payloads were written.
#[derive(Debug, Clone, Args)]
pub struct CodecArgs {
    /// Payload serializer (cbor, json)
    #[arg(short, long, default_value = "cbor")]
    pub serializer: String,

    /// AES-256-GCM key as 64 hex characters
    #[arg(long, conflicts_with = "xor")]
    pub key: Option<String>,

    /// Repeating XOR key
    #[arg(long)]
    pub xor: Option<String>,
}

impl CodecArgs {
    /// Builds the codec these arguments describe.
    pub fn build(&self) -> Result<ArchiveCodec, Box<dyn std::error::Error>> {
        let serializer: Arc<dyn EntrySerializer> = match self.serializer.as_str() {
            "cbor" => Arc::new(CborSerializer),
            "json" => Arc::new(JsonSerializer::new()),
            other => return Err(format!("unknown serializer: {other}").into()),
        };

        let codec = ArchiveCodec::new(serializer);
        let codec = match (&self.key, &self.xor) {
            (Some(hex_key), _) => {
                let key = EncryptionKey::from_bytes(&hex::decode(hex_key.trim())?)?;
                codec.with_cipher(Arc::new(AesGcmCipher::new(&key)))
            }
            (None, Some(xor)) => codec.with_cipher(Arc::new(XorCipher::new(xor.as_bytes())?)),
            (None, None) => codec,
        };
        Ok(codec)
    }
}
