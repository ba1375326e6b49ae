//! JSON entry serializer.
//!
//! Human-readable alternative to CBOR, useful while debugging save files.
//! Values are written as `[type_tag, payload]` pairs, mirroring the CBOR
//! layout:
//!
//! ```text
//! {"hp":[3,100],"name":[2,"Ada"]}
//! ```

use crate::error::{CodecError, CodecResult};
use crate::serializer::EntrySerializer;
use crate::value::{Entries, TypedValue, ValueType};
use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeTuple;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

impl Serialize for TypedValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut tuple = serializer.serialize_tuple(2)?;
        tuple.serialize_element(&self.value_type().tag())?;
        match self {
            TypedValue::Float(v) => tuple.serialize_element(v)?,
            TypedValue::String(v) => tuple.serialize_element(v)?,
            TypedValue::Int(v) => tuple.serialize_element(v)?,
        }
        tuple.end()
    }
}

impl<'de> Deserialize<'de> for TypedValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct TypedValueVisitor;

        impl<'de> Visitor<'de> for TypedValueVisitor {
            type Value = TypedValue;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a [type_tag, payload] pair")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<TypedValue, A::Error> {
                let tag: u64 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let value_type = ValueType::from_tag(tag).ok_or_else(|| {
                    de::Error::invalid_value(de::Unexpected::Unsigned(tag), &"type tag 1, 2 or 3")
                })?;
                let value = match value_type {
                    ValueType::Float => seq.next_element::<f32>()?.map(TypedValue::Float),
                    ValueType::String => seq.next_element::<String>()?.map(TypedValue::String),
                    ValueType::Int => seq.next_element::<i32>()?.map(TypedValue::Int),
                };
                let value = value.ok_or_else(|| de::Error::invalid_length(1, &self))?;
                if seq.next_element::<de::IgnoredAny>()?.is_some() {
                    return Err(de::Error::invalid_length(3, &self));
                }
                Ok(value)
            }
        }

        deserializer.deserialize_tuple(2, TypedValueVisitor)
    }
}

/// JSON serializer for entries.
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonSerializer {
    pretty: bool,
}

impl JsonSerializer {
    /// Compact JSON output.
    #[must_use]
    pub const fn new() -> Self {
        Self { pretty: false }
    }

    /// Indented JSON output.
    #[must_use]
    pub const fn pretty() -> Self {
        Self { pretty: true }
    }
}

impl EntrySerializer for JsonSerializer {
    fn name(&self) -> &'static str {
        "json"
    }

    fn serialize(&self, entries: &Entries) -> CodecResult<Vec<u8>> {
        // JSON has no NaN or infinity; serde_json would silently write null
        if let Some((key, _)) = entries
            .iter()
            .find(|(_, v)| v.as_float().is_some_and(|f| !f.is_finite()))
        {
            return Err(CodecError::NonFiniteFloat { key: key.clone() });
        }

        let sorted: BTreeMap<&String, &TypedValue> = entries.iter().collect();
        let result = if self.pretty {
            serde_json::to_vec_pretty(&sorted)
        } else {
            serde_json::to_vec(&sorted)
        };
        result.map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    fn deserialize(&self, bytes: &[u8]) -> CodecResult<Entries> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}
