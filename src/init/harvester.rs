// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Deserialize;

use crate::harvester::{HarvesterConfig, StartAt};

#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StartAtArg {
    #[default]
    Beginning,
    End,
}

impl From<StartAtArg> for StartAt {
    fn from(arg: StartAtArg) -> Self {
        match arg {
            StartAtArg::Beginning => StartAt::Beginning,
            StartAtArg::End => StartAt::End,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct HarvesterArgs {
    /// File paths to include (glob patterns, comma-separated)
    #[arg(long, env = "TAILSTATE_INCLUDE", value_delimiter = ',')]
    pub include: Vec<String>,

    /// File paths to exclude (glob patterns, comma-separated)
    #[arg(long, env = "TAILSTATE_EXCLUDE", value_delimiter = ',')]
    pub exclude: Vec<String>,

    /// Where to start reading files the registry has no state for
    #[arg(value_enum, long, env = "TAILSTATE_START_AT", default_value = "beginning")]
    pub start_at: StartAtArg,

    /// Interval in milliseconds between scans for new, renamed and removed files
    #[arg(long, env = "TAILSTATE_SCAN_FREQUENCY_MS", default_value = "10000")]
    pub scan_frequency_ms: u64,

    /// Initial wait in milliseconds after reaching the end of a file
    #[arg(long, env = "TAILSTATE_BACKOFF_MS", default_value = "1000")]
    pub backoff_ms: u64,

    /// Maximum wait in milliseconds after reaching the end of a file
    #[arg(long, env = "TAILSTATE_MAX_BACKOFF_MS", default_value = "10000")]
    pub max_backoff_ms: u64,

    /// Maximum line size in bytes, longer lines are truncated
    #[arg(long, env = "TAILSTATE_MAX_LINE_BYTES", default_value = "10485760")]
    pub max_line_bytes: usize,

    /// Maximum number of lines read from a file per batch
    #[arg(long, env = "TAILSTATE_HARVESTER_BUFFER", default_value = "2048")]
    pub harvester_buffer: usize,
}

impl Default for HarvesterArgs {
    fn default() -> Self {
        Self {
            include: Vec::new(),
            exclude: Vec::new(),
            start_at: StartAtArg::Beginning,
            scan_frequency_ms: 10_000,
            backoff_ms: 1000,
            max_backoff_ms: 10_000,
            max_line_bytes: 10 * 1024 * 1024,
            harvester_buffer: 2048,
        }
    }
}

impl HarvesterArgs {
    pub fn build_config(&self) -> HarvesterConfig {
        HarvesterConfig {
            include: self.include.clone(),
            exclude: self.exclude.clone(),
            start_at: self.start_at.into(),
            scan_frequency: Duration::from_millis(self.scan_frequency_ms),
            backoff: Duration::from_millis(self.backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            max_line_bytes: self.max_line_bytes,
            harvester_buffer: self.harvester_buffer,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Debug, Parser)]
    struct Cli {
        #[command(flatten)]
        harvester: HarvesterArgs,
    }

    #[test]
    fn test_include_list_and_start_at() {
        let cli = Cli::try_parse_from([
            "tailstate",
            "--include",
            "/var/log/*.log,/srv/app/*.log",
            "--exclude",
            "/var/log/debug.log",
            "--start-at",
            "end",
            "--backoff-ms",
            "250",
        ])
        .unwrap();
        let config = cli.harvester.build_config();

        assert_eq!(config.include, vec!["/var/log/*.log", "/srv/app/*.log"]);
        assert_eq!(config.exclude, vec!["/var/log/debug.log"]);
        assert_eq!(config.start_at, StartAt::End);
        assert_eq!(config.backoff, Duration::from_millis(250));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_defaults_match_config_defaults() {
        let config = Cli::try_parse_from(["tailstate"])
            .unwrap()
            .harvester
            .build_config();
        let defaults = HarvesterConfig::default();

        assert_eq!(config.start_at, defaults.start_at);
        assert_eq!(config.scan_frequency, defaults.scan_frequency);
        assert_eq!(config.max_backoff, defaults.max_backoff);
        assert_eq!(config.max_line_bytes, defaults.max_line_bytes);
        assert_eq!(config.harvester_buffer, defaults.harvester_buffer);
        assert_eq!(
            HarvesterArgs::default().build_config().scan_frequency,
            defaults.scan_frequency
        );
    }
}
