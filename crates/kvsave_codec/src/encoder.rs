//! Canonical CBOR encoder for entry maps.
//!
//! An entry map is written as a CBOR map with text keys. Each value is a
//! two-element array `[type_tag, payload]`:
//!
//! ```text
//! { "hp": [3, 100], "name": [2, "Ada"], "speed": [1, 1.5f32] }
//! ```
//!
//! Keys are sorted length-first then bytewise, so the same entries always
//! produce the same bytes regardless of insertion order.

use crate::error::CodecResult;
use crate::value::{Entries, TypedValue};

/// Encode entries to canonical CBOR bytes.
///
/// # Errors
///
/// Currently infallible for every [`TypedValue`]; the `Result` keeps the
/// signature aligned with the other serializers.
pub fn to_canonical_cbor(entries: &Entries) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::with_capacity(entries.len() * 16);
    encoder.encode_entries(entries)?;
    Ok(encoder.into_bytes())
}

/// A canonical CBOR encoder.
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Encode a full entry map.
    pub fn encode_entries(&mut self, entries: &Entries) -> CodecResult<()> {
        let mut keys: Vec<&String> = entries.keys().collect();
        keys.sort_by(|a, b| match a.len().cmp(&b.len()) {
            std::cmp::Ordering::Equal => a.as_bytes().cmp(b.as_bytes()),
            other => other,
        });

        self.encode_unsigned(5, entries.len() as u64);
        for key in keys {
            self.encode_text(key);
            self.encode_value(&entries[key]);
        }
        Ok(())
    }

    /// Encode one tagged value as `[tag, payload]`.
    pub fn encode_value(&mut self, value: &TypedValue) {
        self.encode_unsigned(4, 2);
        self.encode_unsigned(0, u64::from(value.value_type().tag()));
        match value {
            TypedValue::Float(v) => self.encode_f32(*v),
            TypedValue::String(s) => self.encode_text(s),
            TypedValue::Int(n) => self.encode_integer(i64::from(*n)),
        }
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }

    fn encode_f32(&mut self, v: f32) {
        // Single-precision float, major type 7 additional info 26
        self.buffer.push(0xfa);
        self.buffer.extend_from_slice(&v.to_bits().to_be_bytes());
    }

    #[allow(clippy::cast_sign_loss)]
    fn encode_integer(&mut self, n: i64) {
        if n >= 0 {
            self.encode_unsigned(0, n as u64);
        } else {
            // CBOR negative integers encode -(n+1)
            let abs_minus_one = (-(n + 1)) as u64;
            self.encode_unsigned(1, abs_minus_one);
        }
    }

    #[allow(clippy::cast_possible_truncation)]
    fn encode_unsigned(&mut self, major_type: u8, value: u64) {
        let mt = major_type << 5;

        if value < 24 {
            self.buffer.push(mt | (value as u8));
        } else if u8::try_from(value).is_ok() {
            self.buffer.push(mt | 24);
            self.buffer.push(value as u8);
        } else if u16::try_from(value).is_ok() {
            self.buffer.push(mt | 25);
            self.buffer.extend_from_slice(&(value as u16).to_be_bytes());
        } else if u32::try_from(value).is_ok() {
            self.buffer.push(mt | 26);
            self.buffer.extend_from_slice(&(value as u32).to_be_bytes());
        } else {
            self.buffer.push(mt | 27);
            self.buffer.extend_from_slice(&value.to_be_bytes());
        }
    }

    fn encode_text(&mut self, text: &str) {
        self.encode_unsigned(3, text.len() as u64);
        self.buffer.extend_from_slice(text.as_bytes());
    }
}

impl Default for CanonicalEncoder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(key: &str, value: TypedValue) -> Vec<u8> {
        let mut entries = Entries::new();
        entries.insert(key.to_string(), value);
        to_canonical_cbor(&entries).unwrap()
    }

    #[test]
    fn encode_empty_map() {
        assert_eq!(to_canonical_cbor(&Entries::new()).unwrap(), vec![0xa0]);
    }

    #[test]
    fn encode_int_entry() {
        // map(1), "a", array(2), tag 3, 100
        assert_eq!(
            single("a", TypedValue::Int(100)),
            vec![0xa1, 0x61, b'a', 0x82, 0x03, 0x18, 100]
        );
    }

    #[test]
    fn encode_negative_int_entry() {
        assert_eq!(
            single("a", TypedValue::Int(-1)),
            vec![0xa1, 0x61, b'a', 0x82, 0x03, 0x20]
        );
        assert_eq!(
            single("a", TypedValue::Int(i32::MIN)),
            vec![0xa1, 0x61, b'a', 0x82, 0x03, 0x3a, 0x7f, 0xff, 0xff, 0xff]
        );
    }

    #[test]
    fn encode_float_entry() {
        assert_eq!(
            single("f", TypedValue::Float(1.5)),
            vec![0xa1, 0x61, b'f', 0x82, 0x01, 0xfa, 0x3f, 0xc0, 0x00, 0x00]
        );
    }

    #[test]
    fn encode_string_entry() {
        assert_eq!(
            single("n", TypedValue::from("Ada")),
            vec![0xa1, 0x61, b'n', 0x82, 0x02, 0x63, b'A', b'd', b'a']
        );
    }

    #[test]
    fn keys_sorted_length_first() {
        let mut entries = Entries::new();
        entries.insert("bb".to_string(), TypedValue::Int(2));
        entries.insert("a".to_string(), TypedValue::Int(1));
        let bytes = to_canonical_cbor(&entries).unwrap();
        assert_eq!(
            bytes,
            vec![0xa2, 0x61, b'a', 0x82, 0x03, 0x01, 0x62, b'b', b'b', 0x82, 0x03, 0x02]
        );
    }

    #[test]
    fn deterministic_encoding() {
        let mut first = Entries::new();
        let mut second = Entries::new();
        for i in 0..50 {
            first.insert(format!("key{i}"), TypedValue::Int(i));
        }
        for i in (0..50).rev() {
            second.insert(format!("key{i}"), TypedValue::Int(i));
        }
        assert_eq!(
            to_canonical_cbor(&first).unwrap(),
            to_canonical_cbor(&second).unwrap()
        );
    }
}
