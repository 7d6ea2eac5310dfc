// SPDX-License-Identifier: Apache-2.0

//! Outputs that receive batches of lines and acknowledge them back to the
//! registrar once they are delivered.

pub mod console;
pub mod file;
pub mod tcp;

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::Deserialize;
use serde_json::json;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::bounded_channel::{BoundedReceiver, BoundedSender};
use crate::harvester::offset_tracker::LineOffset;
use crate::harvester::registrar::RegistrarMessage;
use crate::registry::FileIdentity;

pub use console::ConsoleSink;
pub use file::FileSink;
pub use tcp::TcpSink;

/// A single line on its way to the output
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub message: String,
    pub source: String,
    pub line: LineOffset,
}

impl Event {
    /// Newline-terminated JSON document for this event.
    ///
    /// `log.offset` is where the line starts in the source file.
    pub fn to_json_line(&self) -> Result<Vec<u8>, serde_json::Error> {
        let doc = json!({
            "@timestamp": self.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "message": self.message,
            "log": {
                "offset": self.line.offset,
                "file": { "path": self.source },
            },
        });
        let mut bytes = serde_json::to_vec(&doc)?;
        bytes.push(b'\n');
        Ok(bytes)
    }
}

/// Lines read from one file in one go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub identity: FileIdentity,
    /// Truncation count of the file when the lines were read
    pub generation: u64,
    pub events: Vec<Event>,
}

impl Batch {
    pub fn offsets(&self) -> Vec<LineOffset> {
        self.events.iter().map(|e| e.line).collect()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        let mut bytes = Vec::new();
        for event in &self.events {
            bytes.extend(event.to_json_line()?);
        }
        Ok(bytes)
    }
}

#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Append newline-delimited JSON to a file
    File,
    /// Stream newline-delimited JSON to a TCP endpoint
    Tcp,
    #[default]
    /// Write newline-delimited JSON to stdout
    Console,
}

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub kind: OutputKind,
    pub file_path: PathBuf,
    pub tcp_endpoint: String,
    pub connect_timeout: Duration,
    /// Pause between delivery attempts of a failed batch
    pub retry_backoff: Duration,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            kind: OutputKind::default(),
            file_path: PathBuf::from("/tmp/tailstate/events.ndjson"),
            tcp_endpoint: "127.0.0.1:5044".to_string(),
            connect_timeout: Duration::from_secs(5),
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Destination for published batches
pub enum Sink {
    File(FileSink),
    Tcp(TcpSink),
    Console(ConsoleSink),
}

impl Sink {
    pub fn from_config(config: &OutputConfig) -> Self {
        match config.kind {
            OutputKind::File => Sink::File(FileSink::new(config.file_path.clone())),
            OutputKind::Tcp => Sink::Tcp(TcpSink::new(
                config.tcp_endpoint.clone(),
                config.connect_timeout,
            )),
            OutputKind::Console => Sink::Console(ConsoleSink::new()),
        }
    }

    /// Deliver a batch. Returning `Ok` acknowledges every event in it.
    pub async fn publish(&mut self, batch: &Batch) -> Result<(), BoxError> {
        match self {
            Sink::File(sink) => sink.publish(batch).await,
            Sink::Tcp(sink) => sink.publish(batch).await,
            Sink::Console(sink) => sink.publish(batch).await,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Sink::File(_) => "file",
            Sink::Tcp(_) => "tcp",
            Sink::Console(_) => "console",
        }
    }
}

/// Output task: publishes batches in order and acknowledges them to the
/// registrar.
pub struct Output {
    sink: Sink,
    batches: BoundedReceiver<Batch>,
    registrar: BoundedSender<RegistrarMessage>,
    retry_backoff: Duration,
}

impl Output {
    pub fn new(
        sink: Sink,
        batches: BoundedReceiver<Batch>,
        registrar: BoundedSender<RegistrarMessage>,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            sink,
            batches,
            registrar,
            retry_backoff,
        }
    }

    /// Runs until every batch sender is gone or `cancel_token` fires. A batch
    /// still being retried at cancellation is dropped unacknowledged.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<(), BoxError> {
        info!(output = self.sink.name(), "Output started");

        loop {
            select! {
                biased;

                _ = cancel_token.cancelled() => {
                    debug!("Output cancelled");
                    break;
                }

                batch = self.batches.next() => {
                    match batch {
                        Some(batch) => {
                            if !self.deliver(batch, &cancel_token).await? {
                                break;
                            }
                        }
                        None => {
                            debug!("All batch senders closed, output finished");
                            break;
                        }
                    }
                }
            }
        }

        Ok(())
    }

    /// Returns false if cancelled before the batch was delivered.
    async fn deliver(
        &mut self,
        batch: Batch,
        cancel_token: &CancellationToken,
    ) -> Result<bool, BoxError> {
        let mut attempt: u32 = 0;
        loop {
            match self.sink.publish(&batch).await {
                Ok(()) => {
                    self.registrar
                        .send(RegistrarMessage::Acked {
                            identity: batch.identity,
                            generation: batch.generation,
                            offsets: batch.offsets(),
                        })
                        .await
                        .map_err(|e| format!("failed to acknowledge batch: {}", e))?;
                    return Ok(true);
                }
                Err(e) => {
                    attempt += 1;
                    warn!(
                        output = self.sink.name(),
                        attempt,
                        events = batch.len(),
                        "Failed to publish batch, retrying: {}",
                        e
                    );
                }
            }

            select! {
                _ = cancel_token.cancelled() => {
                    warn!(
                        events = batch.len(),
                        identity = %batch.identity,
                        "Output cancelled, dropping unacknowledged batch"
                    );
                    return Ok(false);
                }
                _ = tokio::time::sleep(self.retry_backoff) => {}
            }
        }
    }
}
