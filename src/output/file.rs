// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tower::BoxError;
use tracing::debug;

use crate::output::Batch;

/// Appends newline-delimited JSON events to a file.
///
/// A batch counts as delivered once it is written and synced to disk.
pub struct FileSink {
    path: PathBuf,
    file: Option<File>,
}

impl FileSink {
    pub fn new(path: PathBuf) -> Self {
        Self { path, file: None }
    }

    async fn file(&mut self) -> Result<&mut File, BoxError> {
        if self.file.is_none() {
            if let Some(parent) = self.path.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await
                .map_err(|e| format!("failed to open {:?}: {}", self.path, e))?;
            debug!("Opened output file {:?}", self.path);
            self.file = Some(file);
        }
        self.file
            .as_mut()
            .ok_or_else(|| "output file not open".into())
    }

    pub async fn publish(&mut self, batch: &Batch) -> Result<(), BoxError> {
        let bytes = batch.encode()?;
        let file = self.file().await?;

        let result = async {
            file.write_all(&bytes).await?;
            file.flush().await?;
            file.sync_data().await
        }
        .await;

        if let Err(e) = result {
            // Reopen on the next attempt
            self.file = None;
            return Err(e.into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::tests::event;
    use crate::registry::FileIdentity;

    #[tokio::test]
    async fn test_appends_batches() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("out.ndjson");
        let mut sink = FileSink::new(path.clone());

        for message in ["one", "two"] {
            let batch = Batch {
                identity: FileIdentity::new(1, 1),
                generation: 0,
                events: vec![event("/var/log/a.log", 0, message)],
            };
            sink.publish(&batch).await.unwrap();
        }

        let content = std::fs::read_to_string(&path).unwrap();
        let messages: Vec<String> = content
            .lines()
            .map(|l| {
                let doc: serde_json::Value = serde_json::from_str(l).unwrap();
                doc["message"].as_str().unwrap().to_string()
            })
            .collect();
        assert_eq!(messages, vec!["one", "two"]);
    }
}
