// SPDX-License-Identifier: Apache-2.0

use tokio::io::{AsyncWriteExt, Stdout, stdout};
use tower::BoxError;

use crate::output::Batch;

/// Writes newline-delimited JSON events to stdout
pub struct ConsoleSink {
    out: Stdout,
}

impl ConsoleSink {
    pub fn new() -> Self {
        Self { out: stdout() }
    }

    pub async fn publish(&mut self, batch: &Batch) -> Result<(), BoxError> {
        let bytes = batch.encode()?;
        self.out.write_all(&bytes).await?;
        self.out.flush().await?;
        Ok(())
    }
}

impl Default for ConsoleSink {
    fn default() -> Self {
        Self::new()
    }
}
