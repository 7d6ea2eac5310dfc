// SPDX-License-Identifier: Apache-2.0

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, ValueEnum};
use serde::Deserialize;

use crate::init::parse;
use crate::output::{OutputConfig, OutputKind};

#[derive(Debug, Clone, Copy, ValueEnum, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputArg {
    File,
    Tcp,
    #[default]
    Console,
}

impl From<OutputArg> for OutputKind {
    fn from(arg: OutputArg) -> Self {
        match arg {
            OutputArg::File => OutputKind::File,
            OutputArg::Tcp => OutputKind::Tcp,
            OutputArg::Console => OutputKind::Console,
        }
    }
}

#[derive(Debug, Args, Clone, Deserialize)]
#[serde(default)]
pub struct OutputArgs {
    /// Where published lines are sent
    #[arg(value_enum, long, env = "TAILSTATE_OUTPUT", default_value = "console")]
    pub output: OutputArg,

    /// File output path
    #[arg(
        long,
        env = "TAILSTATE_FILE_OUTPUT_PATH",
        default_value = "/tmp/tailstate/events.ndjson"
    )]
    pub file_output_path: PathBuf,

    /// TCP output endpoint
    #[arg(
        long,
        env = "TAILSTATE_TCP_OUTPUT_ENDPOINT",
        default_value = "127.0.0.1:5044",
        value_parser = parse::parse_endpoint
    )]
    pub tcp_output_endpoint: SocketAddr,

    /// TCP output connect timeout in milliseconds
    #[arg(long, env = "TAILSTATE_TCP_OUTPUT_CONNECT_TIMEOUT_MS", default_value = "5000")]
    pub tcp_output_connect_timeout_ms: u64,

    /// Pause in milliseconds between attempts to publish a failed batch
    #[arg(long, env = "TAILSTATE_OUTPUT_RETRY_BACKOFF_MS", default_value = "1000")]
    pub output_retry_backoff_ms: u64,
}

impl Default for OutputArgs {
    fn default() -> Self {
        Self {
            output: OutputArg::Console,
            file_output_path: PathBuf::from("/tmp/tailstate/events.ndjson"),
            tcp_output_endpoint: SocketAddr::from(([127, 0, 0, 1], 5044)),
            tcp_output_connect_timeout_ms: 5000,
            output_retry_backoff_ms: 1000,
        }
    }
}

impl OutputArgs {
    pub fn build_config(&self) -> OutputConfig {
        OutputConfig {
            kind: self.output.into(),
            file_path: self.file_output_path.clone(),
            tcp_endpoint: self.tcp_output_endpoint.to_string(),
            connect_timeout: Duration::from_millis(self.tcp_output_connect_timeout_ms),
            retry_backoff: Duration::from_millis(self.output_retry_backoff_ms),
        }
    }
}
