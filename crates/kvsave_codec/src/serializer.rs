//! Pluggable entry serializers.

use crate::decoder::from_cbor;
use crate::encoder::to_canonical_cbor;
use crate::error::CodecResult;
use crate::value::Entries;

/// Turns a group's entries into bytes and back.
///
/// The archive layer treats the output as an opaque payload. Implementations
/// must be deterministic enough that `deserialize(serialize(e)) == e`.
pub trait EntrySerializer: Send + Sync {
    /// Short identifier used in logs and tooling.
    fn name(&self) -> &'static str;

    /// Serializes the entries.
    fn serialize(&self, entries: &Entries) -> CodecResult<Vec<u8>>;

    /// Deserializes entries previously produced by [`serialize`](Self::serialize).
    fn deserialize(&self, bytes: &[u8]) -> CodecResult<Entries>;
}

/// Compact canonical CBOR serializer. The default.
#[derive(Debug, Default, Clone, Copy)]
pub struct CborSerializer;

impl EntrySerializer for CborSerializer {
    fn name(&self) -> &'static str {
        "cbor"
    }

    fn serialize(&self, entries: &Entries) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(entries)
    }

    fn deserialize(&self, bytes: &[u8]) -> CodecResult<Entries> {
        from_cbor(bytes)
    }
}
