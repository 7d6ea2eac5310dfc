// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use clap::Args;
use serde::Deserialize;

use crate::init::harvester::HarvesterArgs;
use crate::init::output::OutputArgs;
use crate::init::registry::RegistryArgs;
use crate::init::shipper::ShipperConfig;

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct ShipperRun {
    /// Time in milliseconds the output gets to publish in-flight lines on shutdown
    #[arg(long, env = "TAILSTATE_SHUTDOWN_TIMEOUT_MS", default_value = "0")]
    pub shutdown_timeout_ms: u64,

    /// Capacity of the channel carrying batches to the output
    #[arg(long, env = "TAILSTATE_OUTPUT_QUEUE_SIZE", default_value = "16")]
    pub output_queue_size: usize,

    /// Capacity of the channel carrying offset updates to the registrar
    #[arg(long, env = "TAILSTATE_REGISTRAR_QUEUE_SIZE", default_value = "1024")]
    pub registrar_queue_size: usize,

    #[command(flatten)]
    #[serde(flatten)]
    pub registry: RegistryArgs,

    #[command(flatten)]
    #[serde(flatten)]
    pub harvester: HarvesterArgs,

    #[command(flatten)]
    #[serde(flatten)]
    pub output: OutputArgs,
}

impl Default for ShipperRun {
    fn default() -> Self {
        Self {
            shutdown_timeout_ms: 0,
            output_queue_size: 16,
            registrar_queue_size: 1024,
            registry: RegistryArgs::default(),
            harvester: HarvesterArgs::default(),
            output: OutputArgs::default(),
        }
    }
}

impl ShipperRun {
    pub fn build_config(&self) -> ShipperConfig {
        ShipperConfig {
            registry: self.registry.build_config(),
            harvester: self.harvester.build_config(),
            output: self.output.build_config(),
            shutdown_timeout: Duration::from_millis(self.shutdown_timeout_ms),
            output_queue_size: self.output_queue_size.max(1),
            registrar_queue_size: self.registrar_queue_size.max(1),
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
        run: ShipperRun,
    }

    #[test]
    fn test_build_config() {
        let config = Cli::try_parse_from([
            "tailstate",
            "--include",
            "/var/log/*.log",
            "--shutdown-timeout-ms",
            "5000",
            "--output",
            "file",
            "--data-path",
            "/tmp/tailstate",
        ])
        .unwrap()
        .run
        .build_config();

        assert_eq!(config.shutdown_timeout, Duration::from_secs(5));
        assert_eq!(config.harvester.include, vec!["/var/log/*.log"]);
        assert_eq!(config.registry.data_path.to_str(), Some("/tmp/tailstate"));
        assert_eq!(config.output.kind, crate::output::OutputKind::File);
        assert_eq!(config.output_queue_size, 16);
    }

    #[test]
    fn test_queue_sizes_are_never_zero() {
        let run = ShipperRun {
            output_queue_size: 0,
            ..Default::default()
        };
        let config = run.build_config();
        assert_eq!(config.output_queue_size, 1);
        assert_eq!(config.registrar_queue_size, 1024);
        assert!(config.shutdown_timeout.is_zero());
    }
}
