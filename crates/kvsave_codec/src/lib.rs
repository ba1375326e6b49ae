//! # KvSave Codec
//!
//! Typed values and entry serializers for KvSave.
//!
//! A group's entries are a map from key to [`TypedValue`], a closed sum over
//! `f32`, `String` and `i32`. Every variant carries a stable numeric tag
//! ([`ValueType`]) that is written to disk, so serialized groups stay
//! readable as long as the tags never change.
//!
//! Serializers are pluggable through [`EntrySerializer`]:
//!
//! - [`CborSerializer`] - compact canonical CBOR, the default
//! - [`JsonSerializer`] - readable JSON for debugging
//!
//! ## Usage
//!
//! ```
//! use kvsave_codec::{CborSerializer, Entries, EntrySerializer, TypedValue};
//!
//! let mut entries = Entries::new();
//! entries.insert("hp".to_string(), TypedValue::from(100));
//! entries.insert("name".to_string(), TypedValue::from("Ada"));
//!
//! let bytes = CborSerializer.serialize(&entries).unwrap();
//! let decoded = CborSerializer.deserialize(&bytes).unwrap();
//! assert_eq!(decoded, entries);
//! assert_eq!(decoded["hp"].get(0), 100);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod json;
mod serializer;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use json::JsonSerializer;
pub use serializer::{CborSerializer, EntrySerializer};
pub use value::{Entries, FromTypedValue, TypedValue, ValueType};
