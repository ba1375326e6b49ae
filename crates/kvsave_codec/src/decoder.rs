//! Canonical CBOR decoder for entry maps.

use crate::error::{CodecError, CodecResult};
use crate::value::{Entries, TypedValue, ValueType};

/// Decode entries from CBOR bytes.
///
/// # Errors
///
/// Returns an error if the bytes are not a well-formed entry map, use a
/// non-canonical integer encoding, carry an unknown type tag, or leave
/// trailing bytes after the map.
pub fn from_cbor(bytes: &[u8]) -> CodecResult<Entries> {
    let mut decoder = CanonicalDecoder::new(bytes);
    let entries = decoder.decode_entries()?;
    if !decoder.is_empty() {
        return Err(CodecError::TrailingBytes {
            remaining: decoder.remaining().len(),
        });
    }
    Ok(entries)
}

/// A canonical CBOR decoder.
pub struct CanonicalDecoder<'a> {
    data: &'a [u8],
    pos: usize,
}

/// Maximum number of entries in one map.
const MAX_ENTRIES: u64 = 16 * 1024 * 1024;

/// Maximum allowed key or string length.
const MAX_TEXT_LENGTH: u64 = 64 * 1024 * 1024;

impl<'a> CanonicalDecoder<'a> {
    /// Create a new decoder for the given bytes.
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Decode a full entry map.
    pub fn decode_entries(&mut self) -> CodecResult<Entries> {
        let (major_type, additional_info) = self.read_header()?;
        if major_type != 5 {
            return Err(CodecError::invalid_structure(format!(
                "expected map, found major type {major_type}"
            )));
        }
        let len = self.decode_unsigned(additional_info)?;
        if len > MAX_ENTRIES {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len,
                max_allowed: MAX_ENTRIES,
            });
        }

        // Cap preallocation by what the input could possibly hold
        let capacity = usize::try_from(len)
            .unwrap_or(usize::MAX)
            .min(self.remaining().len() / 4);
        let mut entries = Entries::with_capacity(capacity);
        for _ in 0..len {
            let key = self.decode_text_item()?;
            let value = self.decode_value()?;
            if entries.contains_key(&key) {
                return Err(CodecError::DuplicateKey { key });
            }
            entries.insert(key, value);
        }
        Ok(entries)
    }

    /// Decode one `[tag, payload]` value.
    pub fn decode_value(&mut self) -> CodecResult<TypedValue> {
        let (major_type, additional_info) = self.read_header()?;
        if major_type != 4 {
            return Err(CodecError::invalid_structure(format!(
                "expected [tag, payload] array, found major type {major_type}"
            )));
        }
        let len = self.decode_unsigned(additional_info)?;
        if len != 2 {
            return Err(CodecError::invalid_structure(format!(
                "value array has {len} elements, expected 2"
            )));
        }

        let (tag_type, tag_info) = self.read_header()?;
        if tag_type != 0 {
            return Err(CodecError::invalid_structure("type tag is not an unsigned integer"));
        }
        let tag = self.decode_unsigned(tag_info)?;
        let value_type = ValueType::from_tag(tag).ok_or(CodecError::UnknownTypeTag { tag })?;

        match value_type {
            ValueType::Float => self.decode_f32().map(TypedValue::Float),
            ValueType::String => self.decode_text_item().map(TypedValue::String),
            ValueType::Int => self.decode_i32().map(TypedValue::Int),
        }
    }

    /// Check if all bytes have been consumed.
    pub fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    /// Get remaining bytes.
    pub fn remaining(&self) -> &[u8] {
        &self.data[self.pos..]
    }

    #[inline]
    fn read_byte(&mut self) -> CodecResult<u8> {
        if self.pos >= self.data.len() {
            return Err(CodecError::UnexpectedEof);
        }
        let byte = self.data[self.pos];
        self.pos += 1;
        Ok(byte)
    }

    #[inline]
    fn read_bytes(&mut self, len: usize) -> CodecResult<&'a [u8]> {
        if len > self.data.len() - self.pos {
            return Err(CodecError::UnexpectedEof);
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    #[inline]
    fn read_header(&mut self) -> CodecResult<(u8, u8)> {
        let initial_byte = self.read_byte()?;
        Ok((initial_byte >> 5, initial_byte & 0x1f))
    }

    #[inline]
    fn decode_unsigned(&mut self, additional_info: u8) -> CodecResult<u64> {
        match additional_info {
            0..=23 => Ok(u64::from(additional_info)),
            24 => {
                let byte = self.read_byte()?;
                if byte < 24 {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(byte))
            }
            25 => {
                let bytes = self.read_bytes(2)?;
                let value = u16::from_be_bytes([bytes[0], bytes[1]]);
                if u8::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(value))
            }
            26 => {
                let bytes = self.read_bytes(4)?;
                let value = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                if u16::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(u64::from(value))
            }
            27 => {
                let bytes = self.read_bytes(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(bytes);
                let value = u64::from_be_bytes(buf);
                if u32::try_from(value).is_ok() {
                    return Err(CodecError::invalid_structure(
                        "non-canonical: value could be encoded in fewer bytes",
                    ));
                }
                Ok(value)
            }
            28..=30 => Err(CodecError::invalid_structure("reserved additional info")),
            _ => Err(CodecError::IndefiniteLengthForbidden),
        }
    }

    fn decode_text_item(&mut self) -> CodecResult<String> {
        let (major_type, additional_info) = self.read_header()?;
        if major_type != 3 {
            return Err(match major_type {
                2 => CodecError::unsupported_type("byte string"),
                _ => CodecError::invalid_structure(format!(
                    "expected text string, found major type {major_type}"
                )),
            });
        }
        let len_u64 = self.decode_unsigned(additional_info)?;
        if len_u64 > MAX_TEXT_LENGTH {
            return Err(CodecError::SizeLimitExceeded {
                claimed: len_u64,
                max_allowed: MAX_TEXT_LENGTH,
            });
        }
        let len = usize::try_from(len_u64).map_err(|_| CodecError::IntegerOverflow)?;
        let bytes = self.read_bytes(len)?;
        let text = std::str::from_utf8(bytes).map_err(|_| CodecError::InvalidUtf8)?;
        Ok(text.to_string())
    }

    fn decode_i32(&mut self) -> CodecResult<i32> {
        let (major_type, additional_info) = self.read_header()?;
        let magnitude = match major_type {
            0 | 1 => self.decode_unsigned(additional_info)?,
            other => {
                return Err(CodecError::invalid_structure(format!(
                    "int payload has major type {other}"
                )))
            }
        };
        let magnitude = i64::try_from(magnitude).map_err(|_| CodecError::IntegerOverflow)?;
        // Negative integers store -(n+1)
        let value = if major_type == 0 {
            magnitude
        } else {
            -1 - magnitude
        };
        i32::try_from(value).map_err(|_| CodecError::IntegerOverflow)
    }

    fn decode_f32(&mut self) -> CodecResult<f32> {
        match self.read_byte()? {
            0xfa => {
                let bytes = self.read_bytes(4)?;
                let bits = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]);
                Ok(f32::from_bits(bits))
            }
            0xf9 | 0xfb => Err(CodecError::unsupported_type(
                "half or double precision float",
            )),
            other => Err(CodecError::invalid_structure(format!(
                "float payload starts with 0x{other:02x}"
            ))),
        }
    }
}
