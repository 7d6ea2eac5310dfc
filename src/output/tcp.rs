// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tower::BoxError;
use tracing::{debug, info};

use crate::output::Batch;

/// Streams newline-delimited JSON events to a TCP endpoint.
///
/// The connection is opened lazily and dropped on any write error, so the
/// next attempt reconnects. A batch counts as delivered once it is fully
/// written to the socket.
pub struct TcpSink {
    endpoint: String,
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpSink {
    pub fn new(endpoint: String, connect_timeout: Duration) -> Self {
        Self {
            endpoint,
            connect_timeout,
            stream: None,
        }
    }

    async fn connect(&mut self) -> Result<&mut TcpStream, BoxError> {
        if self.stream.is_none() {
            let stream =
                tokio::time::timeout(self.connect_timeout, TcpStream::connect(&self.endpoint))
                    .await
                    .map_err(|_| format!("timed out connecting to {}", self.endpoint))?
                    .map_err(|e| format!("failed to connect to {}: {}", self.endpoint, e))?;
            stream.set_nodelay(true)?;
            info!(endpoint = %self.endpoint, "Connected to TCP output");
            self.stream = Some(stream);
        }
        self.stream
            .as_mut()
            .ok_or_else(|| "tcp output not connected".into())
    }

    pub async fn publish(&mut self, batch: &Batch) -> Result<(), BoxError> {
        let bytes = batch.encode()?;
        let stream = self.connect().await?;

        let result = async {
            stream.write_all(&bytes).await?;
            stream.flush().await
        }
        .await;

        if let Err(e) = result {
            debug!(endpoint = %self.endpoint, "Dropping TCP connection after error: {}", e);
            self.stream = None;
            return Err(e.into());
        }
        Ok(())
    }
}
