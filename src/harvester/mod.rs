// SPDX-License-Identifier: Apache-2.0

//! Discovering, tailing and checkpointing files.

pub mod crawler;
pub mod finder;
pub mod offset_tracker;
pub mod reader;
pub mod registrar;
pub mod tailer;

use std::time::Duration;

use clap::ValueEnum;
use serde::Deserialize;

use crate::registry::{Error, Result};

pub use crawler::Crawler;
pub use finder::FileFinder;
pub use offset_tracker::{LineOffset, OffsetTracker};
pub use reader::{Line, LineReader};
pub use registrar::{Registrar, RegistrarMessage};
pub use tailer::Harvester;

/// Where to start reading a file the registry knows nothing about
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    #[default]
    /// Read the whole file
    Beginning,
    /// Only read lines appended after discovery
    End,
}

#[derive(Debug, Clone)]
pub struct HarvesterConfig {
    /// Glob patterns of files to tail
    pub include: Vec<String>,
    /// Glob patterns excluded from `include`
    pub exclude: Vec<String>,
    pub start_at: StartAt,
    /// Interval between file system scans
    pub scan_frequency: Duration,
    /// Initial wait after reaching end of file
    pub backoff: Duration,
    /// Upper bound for the doubling end-of-file wait
    pub max_backoff: Duration,
    /// Longer lines are truncated
    pub max_line_bytes: usize,
    /// Maximum lines per batch
    pub harvester_buffer: usize,
}

impl Default for HarvesterConfig {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            start_at: StartAt::default(),
            scan_frequency: Duration::from_secs(10),
            backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            max_line_bytes: 10 * 1024 * 1024,
            harvester_buffer: 2048,
        }
    }
}

impl HarvesterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.include.is_empty() {
            return Err(Error::Config(
                "at least one include pattern is required".to_string(),
            ));
        }
        if self.scan_frequency.is_zero() {
            return Err(Error::Config("scan_frequency must be positive".to_string()));
        }
        if self.backoff.is_zero() || self.max_backoff < self.backoff {
            return Err(Error::Config(format!(
                "invalid backoff {:?} (max {:?})",
                self.backoff, self.max_backoff
            )));
        }
        if self.max_line_bytes == 0 || self.harvester_buffer == 0 {
            return Err(Error::Config(
                "max_line_bytes and harvester_buffer must be positive".to_string(),
            ));
        }
        // Compile the globs once to surface syntax errors
        FileFinder::new(self.include.clone(), self.exclude.clone())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        let mut config = HarvesterConfig {
            include: vec!["/var/log/*.log".to_string()],
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        config.max_backoff = Duration::from_millis(1);
        assert!(config.validate().is_err());

        config.max_backoff = Duration::from_secs(10);
        config.include = vec!["/var/log/[".to_string()];
        assert!(matches!(config.validate(), Err(Error::InvalidGlob(_))));

        config.include.clear();
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }
}
