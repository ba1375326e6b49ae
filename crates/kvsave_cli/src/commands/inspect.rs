//! Inspect command implementation.

use kvsave_codec::TypedValue;
use kvsave_core::ArchiveCodec;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;

/// What a group file contains.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// File path.
    pub path: String,
    /// File size in bytes.
    pub file_size: usize,
    /// Frame version byte.
    pub version: u8,
    /// Declared payload length.
    pub payload_len: usize,
    /// Whether the footer magic is present.
    pub footer_intact: bool,
    /// Bytes after the footer, or after the payload if the footer is missing.
    pub trailing_bytes: usize,
    /// Decoded entries, sorted by key.
    pub entries: BTreeMap<String, EntryView>,
}

/// One decoded entry.
#[derive(Debug, Serialize)]
pub struct EntryView {
    /// Value type name.
    #[serde(rename = "type")]
    pub value_type: &'static str,
    /// The value.
    pub value: serde_json::Value,
}

impl From<&TypedValue> for EntryView {
    fn from(value: &TypedValue) -> Self {
        let json = match value {
            TypedValue::Float(f) => serde_json::json!(f),
            TypedValue::String(s) => serde_json::json!(s),
            TypedValue::Int(i) => serde_json::json!(i),
        };
        Self {
            value_type: value.value_type().name(),
            value: json,
        }
    }
}

/// Reads and decodes one file.
pub fn inspect(path: &Path, codec: &ArchiveCodec) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let data = std::fs::read(path)?;
    let frame = codec.read_frame(&data)?;
    let entries = codec.decode(&data)?;

    Ok(InspectResult {
        path: path.display().to_string(),
        file_size: data.len(),
        version: frame.version,
        payload_len: frame.payload.len(),
        footer_intact: frame.footer_intact,
        trailing_bytes: frame.trailing,
        entries: entries
            .iter()
            .map(|(key, value)| (key.clone(), EntryView::from(value)))
            .collect(),
    })
}

/// Runs the inspect command.
pub fn run(
    path: &Path,
    codec: &ArchiveCodec,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let result = inspect(path, codec)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn print_text_output(result: &InspectResult) {
    println!("Group file: {}", result.path);
    println!();
    println!("Frame:");
    println!("  Size:           {} bytes", result.file_size);
    println!("  Version:        {}", result.version);
    println!("  Payload:        {} bytes", result.payload_len);
    println!(
        "  Footer:         {}",
        if result.footer_intact { "ok" } else { "MISMATCH" }
    );
    if result.trailing_bytes > 0 {
        println!("  Trailing:       {} bytes", result.trailing_bytes);
    }
    println!();
    println!("Entries ({}):", result.entries.len());

    let width = result.entries.keys().map(String::len).max().unwrap_or(0);
    for (key, entry) in &result.entries {
        println!("  {key:<width$}  {:<6}  {}", entry.value_type, entry.value);
    }
}
