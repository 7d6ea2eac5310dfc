// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::select;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info};

use crate::bounded_channel::BoundedSender;
use crate::harvester::HarvesterConfig;
use crate::harvester::reader::LineReader;
use crate::harvester::registrar::RegistrarMessage;
use crate::output::{Batch, Event};

/// Tails a single file and publishes its lines in batches.
///
/// Every batch is announced to the registrar before it is handed to the
/// output, so the registrar always knows a line before its acknowledgement.
/// Events carry the path last sent on `source`, which follows renames.
pub struct Harvester {
    reader: LineReader,
    source: watch::Receiver<String>,
    config: Arc<HarvesterConfig>,
    registrar: BoundedSender<RegistrarMessage>,
    output: BoundedSender<Batch>,
}

impl Harvester {
    pub fn new(
        reader: LineReader,
        source: watch::Receiver<String>,
        config: Arc<HarvesterConfig>,
        registrar: BoundedSender<RegistrarMessage>,
        output: BoundedSender<Batch>,
    ) -> Self {
        Self {
            reader,
            source,
            config,
            registrar,
            output,
        }
    }

    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<(), BoxError> {
        let identity = self.reader.identity();
        debug!(
            identity = %identity,
            source = %self.source.borrow().as_str(),
            offset = self.reader.offset(),
            "Harvester started"
        );

        let mut backoff = self.config.backoff;

        loop {
            if cancel_token.is_cancelled() {
                break;
            }

            let lines = self.reader.read_lines(self.config.harvester_buffer)?;

            if lines.is_empty() {
                if self.reader.is_truncated()? {
                    self.handle_truncation().await?;
                    continue;
                }

                select! {
                    _ = cancel_token.cancelled() => break,
                    _ = tokio::time::sleep(backoff) => {}
                }
                backoff = next_backoff(backoff, self.config.max_backoff);
                continue;
            }
            backoff = self.config.backoff;

            let now = Utc::now();
            let source = self.source.borrow().clone();
            let batch = Batch {
                identity,
                generation: self.reader.generation(),
                events: lines
                    .into_iter()
                    .map(|line| Event {
                        timestamp: now,
                        message: line.text,
                        source: source.clone(),
                        line: line.offset,
                    })
                    .collect(),
            };

            self.registrar
                .send(RegistrarMessage::Published {
                    identity,
                    generation: batch.generation,
                    offsets: batch.offsets(),
                })
                .await
                .map_err(|e| format!("registrar unavailable: {}", e))?;

            // Lines not handed over here stay pending and are re-read on restart
            select! {
                _ = cancel_token.cancelled() => break,
                res = self.output.send(batch) => {
                    res.map_err(|e| format!("output unavailable: {}", e))?;
                }
            }
        }

        debug!(
            identity = %identity,
            offset = self.reader.offset(),
            "Harvester stopped"
        );
        Ok(())
    }

    async fn handle_truncation(&mut self) -> Result<(), BoxError> {
        let source = self.source.borrow().clone();
        info!(
            source = %source,
            offset = self.reader.offset(),
            "File was truncated, reading from the beginning"
        );
        self.reader.rewind()?;
        self.registrar
            .send(RegistrarMessage::Truncated {
                identity: self.reader.identity(),
                source,
                generation: self.reader.generation(),
            })
            .await
            .map_err(|e| format!("registrar unavailable: {}", e))?;
        Ok(())
    }
}

fn next_backoff(current: Duration, max: Duration) -> Duration {
    current.saturating_mul(2).min(max).max(current)
}
