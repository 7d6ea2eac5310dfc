// SPDX-License-Identifier: Apache-2.0

//! On-disk schema of the current registry layout.
//!
//! `meta.json` carries the layout version, `data.json` an array of states:
//!
//! ```json
//! [{"source":"/var/log/app.log","offset":20,"timestamp":"2024-01-01T00:00:00Z",
//!   "ttl":-1,"identifier":{"inode":1234,"device":64769}}]
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::registry::identity::FileIdentity;
use crate::registry::state::{FileState, Ttl};

/// Version written into `meta.json` by this release
pub const REGISTRY_VERSION: &str = "1";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaFile {
    #[serde(deserialize_with = "deser_into_string")]
    pub version: String,
}

impl MetaFile {
    pub fn current() -> Self {
        Self {
            version: REGISTRY_VERSION.to_string(),
        }
    }
}

/// Identity fields as stored in a current-format record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedIdentifier {
    pub inode: u64,
    pub device: u64,
}

/// A single state in the current format
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistedState {
    pub source: String,
    pub offset: u64,
    pub timestamp: DateTime<Utc>,
    #[serde(default = "ttl_never")]
    pub ttl: i64,
    pub identifier: PersistedIdentifier,
}

fn ttl_never() -> i64 {
    Ttl::Never.as_nanos()
}

impl From<&FileState> for PersistedState {
    fn from(state: &FileState) -> Self {
        Self {
            source: state.source.clone(),
            offset: state.offset,
            timestamp: state.timestamp,
            ttl: state.ttl.as_nanos(),
            identifier: PersistedIdentifier {
                inode: state.identity.inode,
                device: state.identity.device,
            },
        }
    }
}

impl From<PersistedState> for FileState {
    fn from(p: PersistedState) -> Self {
        FileState {
            identity: FileIdentity::new(p.identifier.device, p.identifier.inode),
            source: p.source,
            offset: p.offset,
            timestamp: p.timestamp,
            ttl: Ttl::from_nanos(p.ttl),
        }
    }
}

// meta.json versions were written both as strings and as bare numbers
fn deser_into_string<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let value = serde_json::Value::deserialize(deserializer)?;
    match value {
        serde_json::Value::Number(num) => Ok(num.to_string()),
        serde_json::Value::String(s) => Ok(s),
        _ => Err(serde::de::Error::custom("unexpected value for version")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_meta_version_string_or_number() {
        let meta: MetaFile = serde_json::from_str(r#"{"version":"1"}"#).unwrap();
        assert_eq!(meta, MetaFile::current());

        let meta: MetaFile = serde_json::from_str(r#"{"version":0}"#).unwrap();
        assert_eq!(meta.version, "0");

        assert!(serde_json::from_str::<MetaFile>(r#"{"version":null}"#).is_err());
    }

    #[test]
    fn test_record_shape() {
        let state = FileState::new(FileIdentity::new(64769, 1234), "/var/log/app.log", 20);
        let json = serde_json::to_value(PersistedState::from(&state)).unwrap();

        assert_eq!(json["source"], "/var/log/app.log");
        assert_eq!(json["offset"], 20);
        assert_eq!(json["ttl"], -1);
        assert_eq!(json["identifier"]["inode"], 1234);
        assert_eq!(json["identifier"]["device"], 64769);
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_missing_ttl_defaults_to_never() {
        let record: PersistedState = serde_json::from_str(
            r#"{"source":"/a","offset":5,"timestamp":"2024-01-01T00:00:00Z",
                "identifier":{"inode":1,"device":2}}"#,
        )
        .unwrap();
        let state = FileState::from(record);
        assert_eq!(state.ttl, Ttl::Never);
        assert_eq!(state.identity, FileIdentity::new(2, 1));
    }
}
