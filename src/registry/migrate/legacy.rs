// SPDX-License-Identifier: Apache-2.0

//! Parsers for the registry formats written by earlier releases.
//!
//! Each historical schema has its own record type. All of them converge on
//! [`FileState`] and are collapsed into one state per identity.

use std::collections::HashMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use crate::registry::error::{Error, Result};
use crate::registry::identity::FileIdentity;
use crate::registry::state::{FileState, Ttl};

/// States keyed by identity, the shape every parser produces
pub type StateMap = HashMap<FileIdentity, FileState>;

/// `FileStateOS` as written by legacy releases.
///
/// POSIX builds wrote `{inode, device}`, Windows builds wrote the file index
/// split in two halves plus the volume serial number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum LegacyFileStateOs {
    Posix { inode: u64, device: u64 },
    Windows { idxhi: u32, idxlo: u32, vol: u32 },
}

impl LegacyFileStateOs {
    pub fn identity(&self) -> FileIdentity {
        match *self {
            LegacyFileStateOs::Posix { inode, device } => FileIdentity::new(device, inode),
            LegacyFileStateOs::Windows { idxhi, idxlo, vol } => {
                FileIdentity::from_windows_parts(idxhi, idxlo, vol)
            }
        }
    }
}

/// 1.x: one object keyed by path, no timestamps or TTLs.
#[derive(Debug, Deserialize)]
pub struct Flat1xRecord {
    #[serde(default)]
    pub source: String,
    pub offset: u64,
    #[serde(rename = "FileStateOS")]
    pub file_state_os: LegacyFileStateOs,
}

/// 5.x: array of states with timestamps and TTLs.
#[derive(Debug, Deserialize)]
pub struct Flat5xRecord {
    pub source: String,
    pub offset: u64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(rename = "FileStateOS")]
    pub file_state_os: LegacyFileStateOs,
}

/// 6.x: 5.x plus input `type` and free-form `meta`. Also the record shape of
/// the first directory-based layout.
#[derive(Debug, Deserialize)]
pub struct Flat6xRecord {
    pub source: String,
    pub offset: u64,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub ttl: Option<i64>,
    #[serde(rename = "type", default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub meta: Option<HashMap<String, String>>,
    // An interrupted directory upgrade can leave current-format records
    // behind a version 0 meta file
    #[serde(rename = "FileStateOS", alias = "identifier")]
    pub file_state_os: LegacyFileStateOs,
}

/// Parse a 1.x registry: `{"<path>": {source, offset, FileStateOS}}`.
pub fn parse_flat_1x(
    path: &Path,
    document: serde_json::Value,
    written_at: DateTime<Utc>,
) -> Result<StateMap> {
    let serde_json::Value::Object(entries) = document else {
        return Err(Error::unsupported(path, "1.x registry must be a JSON object"));
    };

    let mut states = Vec::with_capacity(entries.len());
    for (key, value) in entries {
        let Some(record) = decode_record::<Flat1xRecord>(path, &key, value) else {
            continue;
        };
        let source = if record.source.is_empty() {
            key
        } else {
            record.source
        };
        states.push(FileState {
            identity: record.file_state_os.identity(),
            source,
            offset: record.offset,
            timestamp: written_at,
            ttl: Ttl::Never,
        });
    }
    Ok(collapse(states))
}

/// Parse a 5.x registry: `[{source, offset, timestamp, ttl, FileStateOS}]`.
pub fn parse_flat_5x(
    path: &Path,
    records: Vec<serde_json::Value>,
    written_at: DateTime<Utc>,
) -> Result<StateMap> {
    let states = records
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| decode_record::<Flat5xRecord>(path, &idx.to_string(), value))
        .map(|record| FileState {
            identity: record.file_state_os.identity(),
            source: record.source,
            offset: record.offset,
            timestamp: record.timestamp.unwrap_or(written_at),
            ttl: record.ttl.map(Ttl::from_nanos).unwrap_or_default(),
        })
        .collect();
    Ok(collapse(states))
}

/// Parse a 6.x registry (also used for the version 0 directory layout).
///
/// Some 6.x releases wrote faulty registries: the same file appearing more
/// than once, empty `meta` objects and zero timestamps. Those are tolerated
/// and collapsed into one state per identity.
pub fn parse_flat_6x(
    path: &Path,
    records: Vec<serde_json::Value>,
    written_at: DateTime<Utc>,
) -> Result<StateMap> {
    let states = records
        .into_iter()
        .enumerate()
        .filter_map(|(idx, value)| decode_record::<Flat6xRecord>(path, &idx.to_string(), value))
        .map(|record| {
            if record.meta.as_ref().is_some_and(|m| !m.is_empty()) {
                debug!(
                    source = %record.source,
                    input_type = ?record.input_type,
                    "Merging legacy state carrying input meta by file identity"
                );
            }
            FileState {
                identity: record.file_state_os.identity(),
                source: record.source,
                offset: record.offset,
                timestamp: record.timestamp.unwrap_or(written_at),
                ttl: record.ttl.map(Ttl::from_nanos).unwrap_or_default(),
            }
        })
        .collect();
    Ok(collapse(states))
}

fn decode_record<T: DeserializeOwned>(
    path: &Path,
    key: &str,
    value: serde_json::Value,
) -> Option<T> {
    match serde_json::from_value::<T>(value) {
        Ok(record) => Some(record),
        Err(e) => {
            warn!(path = ?path, entry = key, "Dropping invalid legacy registry entry: {}", e);
            None
        }
    }
}

/// Collapse duplicate identities.
///
/// The higher offset always wins. Source, timestamp and TTL come from the
/// entry with the newer timestamp.
pub fn collapse(states: Vec<FileState>) -> StateMap {
    let mut merged: StateMap = HashMap::with_capacity(states.len());
    for state in states {
        match merged.get_mut(&state.identity) {
            None => {
                merged.insert(state.identity, state);
            }
            Some(existing) => {
                debug!(
                    identity = %state.identity,
                    "Merging duplicate legacy registry entries"
                );
                let offset = existing.offset.max(state.offset);
                if state.timestamp > existing.timestamp {
                    *existing = state;
                }
                existing.offset = offset;
            }
        }
    }
    merged
}
