// SPDX-License-Identifier: Apache-2.0

//! Configuration for the registry store.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::registry::error::{Error, Result};
use crate::registry::state::Ttl;

pub const DEFAULT_STORE_NAME: &str = "tailstate";
pub const DATA_FILE_NAME: &str = "data.json";
pub const META_FILE_NAME: &str = "meta.json";
const REGISTRY_DIR_NAME: &str = "registry";
const LEGACY_BACKUP_SUFFIX: &str = ".old";

/// Configuration for the registry store
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Data directory; the registry lives in `<data_path>/registry` unless
    /// `registry_path` is set
    pub data_path: PathBuf,
    /// Explicit registry root, overriding the data directory layout
    pub registry_path: Option<PathBuf>,
    /// Name of the store directory under the registry root
    pub store_name: String,
    /// Unix permissions applied to the data file on every flush
    pub file_permissions: u32,
    /// Interval between periodic flushes; zero flushes after every update
    pub flush_interval: Duration,
    /// Move a corrupt registry aside and start empty instead of failing
    pub ignore_corrupt: bool,
    /// Expire states this long after their last update
    pub clean_inactive: Option<Duration>,
    /// Drop states of files that no longer exist
    pub clean_removed: bool,
    /// Consecutive flush failures tolerated before giving up
    pub max_flush_failures: u32,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/var/lib/tailstate"),
            registry_path: None,
            store_name: DEFAULT_STORE_NAME.to_string(),
            file_permissions: 0o600,
            flush_interval: Duration::from_secs(1),
            ignore_corrupt: false,
            clean_inactive: None,
            clean_removed: true,
            max_flush_failures: 5,
        }
    }
}

impl RegistryConfig {
    /// Config rooted at `data_path` with defaults for everything else
    pub fn with_data_path(data_path: impl Into<PathBuf>) -> Self {
        Self {
            data_path: data_path.into(),
            ..Default::default()
        }
    }

    /// Registry root. Legacy releases kept a single file at this path; the
    /// current layout is a directory with one sub-directory per store.
    pub fn root(&self) -> PathBuf {
        self.registry_path
            .clone()
            .unwrap_or_else(|| self.data_path.join(REGISTRY_DIR_NAME))
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root().join(&self.store_name)
    }

    pub fn data_file(&self) -> PathBuf {
        self.store_dir().join(DATA_FILE_NAME)
    }

    pub fn meta_file(&self) -> PathBuf {
        self.store_dir().join(META_FILE_NAME)
    }

    /// Where a legacy flat registry file is parked while it is migrated
    pub fn legacy_backup(&self) -> PathBuf {
        let mut name: OsString = self.root().into_os_string();
        name.push(LEGACY_BACKUP_SUFFIX);
        PathBuf::from(name)
    }

    /// TTL assigned to states under the current cleanup settings
    pub fn default_ttl(&self) -> Ttl {
        match self.clean_inactive {
            Some(d) if !d.is_zero() => Ttl::After(d),
            _ => Ttl::Never,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.store_name.is_empty()
            || self.store_name.contains(std::path::MAIN_SEPARATOR)
            || self.store_name == "."
            || self.store_name == ".."
        {
            return Err(Error::Config(format!(
                "invalid store name: {:?}",
                self.store_name
            )));
        }

        if self.file_permissions > 0o777 {
            return Err(Error::Config(format!(
                "registry file permissions out of range: {:o}",
                self.file_permissions
            )));
        }

        if self.max_flush_failures == 0 {
            return Err(Error::Config(
                "max_flush_failures must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
