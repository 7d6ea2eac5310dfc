// SPDX-License-Identifier: Apache-2.0

//! Reading and writing the current on-disk layout.
//!
//! Uses JSON files with atomic writes for reliable offset tracking.

mod atomic;
mod schema;

use std::fs;
use std::path::Path;

use tracing::warn;

use crate::registry::error::{Error, Result};
use crate::registry::state::FileState;

pub use atomic::{atomic_write, remove_stale_temp_files, set_permissions};
pub use schema::{MetaFile, PersistedIdentifier, PersistedState, REGISTRY_VERSION};

/// Fails unless `path` is absent or a regular file. Symlinks are rejected.
pub fn ensure_regular_file(path: &Path) -> Result<()> {
    match fs::symlink_metadata(path) {
        Ok(metadata) if !metadata.file_type().is_file() => {
            Err(Error::NotRegularFile(path.to_path_buf()))
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read `meta.json`; `None` if it does not exist.
pub fn read_meta(path: &Path) -> Result<Option<MetaFile>> {
    ensure_regular_file(path)?;
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| Error::corrupt(path, e))
}

pub fn write_meta(path: &Path, permissions: u32) -> Result<()> {
    let bytes = serde_json::to_vec(&MetaFile::current())?;
    atomic_write(path, &bytes, permissions)
}

/// Read a current-format data file.
///
/// A document that is not a complete JSON array (for example a truncated
/// write) is rejected. Individual records that do not match the schema are
/// dropped with a warning.
pub fn read_states(path: &Path) -> Result<Vec<FileState>> {
    ensure_regular_file(path)?;
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let records = parse_records(path, &bytes)?;
    let mut states = Vec::with_capacity(records.len());
    for (idx, record) in records.into_iter().enumerate() {
        match serde_json::from_value::<PersistedState>(record) {
            Ok(record) => states.push(record.into()),
            Err(e) => warn!(
                path = ?path,
                index = idx,
                "Dropping invalid registry record: {}",
                e
            ),
        }
    }
    Ok(states)
}

/// Parse the whole document as an array of JSON objects.
pub(crate) fn parse_records(path: &Path, bytes: &[u8]) -> Result<Vec<serde_json::Value>> {
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::corrupt(path, "registry file is empty"));
    }
    match serde_json::from_slice::<serde_json::Value>(bytes) {
        Ok(serde_json::Value::Array(records)) => Ok(records),
        Ok(_) => Err(Error::corrupt(path, "expected a JSON array of states")),
        Err(e) => Err(Error::corrupt(path, e)),
    }
}

/// Write `states` atomically as a current-format data file.
pub fn write_states<'a>(
    path: &Path,
    states: impl IntoIterator<Item = &'a FileState>,
    permissions: u32,
) -> Result<()> {
    let records: Vec<PersistedState> = states.into_iter().map(PersistedState::from).collect();
    let bytes = serde_json::to_vec(&records)?;
    atomic_write(path, &bytes, permissions)
}
