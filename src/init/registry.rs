// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::init::parse;
use crate::registry::RegistryConfig;
use crate::registry::config::DEFAULT_STORE_NAME;

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryArgs {
    /// Data directory, the registry is kept under <data-path>/registry
    #[arg(long, env = "TAILSTATE_DATA_PATH", default_value = "/var/lib/tailstate")]
    pub data_path: PathBuf,

    /// Registry location, overrides the default under the data directory
    #[arg(long, env = "TAILSTATE_REGISTRY_PATH")]
    pub registry_path: Option<PathBuf>,

    /// Name of the registry store
    #[arg(long, env = "TAILSTATE_REGISTRY_STORE_NAME", default_value = DEFAULT_STORE_NAME)]
    pub registry_store_name: String,

    /// Interval in milliseconds between registry flushes, 0 flushes after every acknowledgement
    #[arg(long, env = "TAILSTATE_REGISTRY_FLUSH_MS", default_value = "1000")]
    pub registry_flush_ms: u64,

    /// Permissions of the registry data file, in octal
    #[arg(
        long,
        env = "TAILSTATE_REGISTRY_FILE_PERMISSIONS",
        default_value = "0600",
        value_parser = parse::parse_file_mode
    )]
    pub registry_file_permissions: u32,

    /// Move a corrupt registry aside and start with an empty one
    #[arg(long, env = "TAILSTATE_REGISTRY_IGNORE_CORRUPT", default_value = "false")]
    pub registry_ignore_corrupt: bool,

    /// Forget files not updated for this many milliseconds, 0 disables
    #[arg(long, env = "TAILSTATE_CLEAN_INACTIVE_MS", default_value = "0")]
    pub clean_inactive_ms: u64,

    /// Forget files that can no longer be found
    #[arg(
        long,
        env = "TAILSTATE_CLEAN_REMOVED",
        default_value = "true",
        action = clap::ArgAction::Set
    )]
    pub clean_removed: bool,

    /// Consecutive failed registry flushes tolerated before exiting
    #[arg(long, env = "TAILSTATE_REGISTRY_MAX_FLUSH_FAILURES", default_value = "5")]
    pub registry_max_flush_failures: u32,
}

impl Default for RegistryArgs {
    fn default() -> Self {
        Self {
            data_path: PathBuf::from("/var/lib/tailstate"),
            registry_path: None,
            registry_store_name: DEFAULT_STORE_NAME.to_string(),
            registry_flush_ms: 1000,
            registry_file_permissions: 0o600,
            registry_ignore_corrupt: false,
            clean_inactive_ms: 0,
            clean_removed: true,
            registry_max_flush_failures: 5,
        }
    }
}

impl RegistryArgs {
    pub fn build_config(&self) -> RegistryConfig {
        RegistryConfig {
            data_path: self.data_path.clone(),
            registry_path: self.registry_path.clone(),
            store_name: self.registry_store_name.clone(),
            file_permissions: self.registry_file_permissions,
            flush_interval: Duration::from_millis(self.registry_flush_ms),
            ignore_corrupt: self.registry_ignore_corrupt,
            clean_inactive: match self.clean_inactive_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            clean_removed: self.clean_removed,
            max_flush_failures: self.registry_max_flush_failures,
        }
    }
}
