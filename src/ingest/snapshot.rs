//! Deterministic snapshot codec and atomic persistence.
//!
//! A snapshot wraps the document's serde form in a small envelope:
//!
//! ```json
//! { "document": { ... }, "schema_version": 1 }
//! ```
//!
//! Values pass through `serde_json::Value` before printing. Its object maps
//! are ordered by key, so identical documents always produce identical bytes
//! regardless of the field order of their `Serialize` impls.

use std::fs;
use std::io::Write;
use std::path::Path;

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tempfile::NamedTempFile;

use crate::error::SnapshotError;

/// Envelope version written by this crate.
pub const SCHEMA_VERSION: u64 = 1;

/// Serialize a document into snapshot bytes.
pub fn encode<D: Serialize>(document: &D, pretty: bool) -> Result<Vec<u8>, SnapshotError> {
    let envelope = json!({
        "document": serde_json::to_value(document)?,
        "schema_version": SCHEMA_VERSION,
    });
    let mut bytes = if pretty {
        serde_json::to_vec_pretty(&envelope)?
    } else {
        serde_json::to_vec(&envelope)?
    };
    bytes.push(b'\n');
    Ok(bytes)
}

/// Decode snapshot bytes into a document.
pub fn decode<D: DeserializeOwned>(bytes: &[u8]) -> Result<D, SnapshotError> {
    let mut envelope: Value = serde_json::from_slice(bytes)?;

    let found = envelope.get("schema_version").and_then(Value::as_u64).unwrap_or(0);
    if found != SCHEMA_VERSION {
        return Err(SnapshotError::Schema {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    let document = envelope
        .get_mut("document")
        .map(Value::take)
        .unwrap_or(Value::Null);
    Ok(serde_json::from_value(document)?)
}

/// Read and decode a snapshot file.
pub fn load<D: DeserializeOwned>(path: &Path) -> Result<D, SnapshotError> {
    let bytes = fs::read(path)?;
    decode(&bytes)
}

/// Encode and atomically write a snapshot, creating parent directories.
///
/// The bytes go to a temporary file in the target directory which is then
/// renamed over `path`, so readers never observe a half-written snapshot.
pub fn save<D: Serialize>(document: &D, path: &Path, pretty: bool) -> Result<(), SnapshotError> {
    let bytes = encode(document, pretty)?;
    write_atomic(path, &bytes)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SnapshotError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
