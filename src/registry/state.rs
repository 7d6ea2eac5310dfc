// SPDX-License-Identifier: Apache-2.0

//! The record kept for each tracked file.

use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::registry::identity::FileIdentity;

/// Persisted nanosecond value for a state that never expires.
pub const TTL_NEVER: i64 = -1;
/// Persisted nanosecond value for a state marked for removal.
pub const TTL_REMOVE: i64 = -2;

/// Time-to-live of a state, relative to its `timestamp`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Ttl {
    #[default]
    Never,
    After(Duration),
    /// The file is gone and the state is dropped on the next cleanup.
    Remove,
}

impl Ttl {
    /// Decode the on-disk signed nanosecond representation. Unknown negative
    /// values are treated as "never".
    pub fn from_nanos(nanos: i64) -> Self {
        match nanos {
            TTL_REMOVE => Ttl::Remove,
            n if n > 0 => Ttl::After(Duration::from_nanos(n as u64)),
            _ => Ttl::Never,
        }
    }

    pub fn as_nanos(&self) -> i64 {
        match self {
            Ttl::Never => TTL_NEVER,
            Ttl::Remove => TTL_REMOVE,
            Ttl::After(d) => i64::try_from(d.as_nanos()).unwrap_or(i64::MAX),
        }
    }
}

/// State of a single tracked file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileState {
    pub identity: FileIdentity,
    /// Last known path of the file
    pub source: String,
    /// Byte position right after the last acknowledged line
    pub offset: u64,
    /// Last update time
    pub timestamp: DateTime<Utc>,
    pub ttl: Ttl,
}

impl FileState {
    pub fn new(identity: FileIdentity, source: impl Into<String>, offset: u64) -> Self {
        Self {
            identity,
            source: source.into(),
            offset,
            timestamp: Utc::now(),
            ttl: Ttl::Never,
        }
    }

    pub fn with_ttl(mut self, ttl: Ttl) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Whether the cleanup policy may drop this state at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        match self.ttl {
            Ttl::Never => false,
            Ttl::Remove => true,
            Ttl::After(ttl) => match chrono::Duration::from_std(ttl) {
                Ok(ttl) => self.timestamp + ttl < now,
                Err(_) => false,
            },
        }
    }
}
