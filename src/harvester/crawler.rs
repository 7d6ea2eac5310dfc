// SPDX-License-Identifier: Apache-2.0

//! Periodic file discovery.
//!
//! Each scan resolves every matching path to its [`FileIdentity`]. New
//! identities get a harvester starting at the offset the registry has for
//! them; known identities under a new path are renames; identities that
//! stop showing up are treated as removed. With `clean_removed`, so are
//! stored states whose file was not found by the scan, including files that
//! vanished while the process was down.

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::select;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tower::BoxError;
use tracing::{debug, info, warn};

use crate::bounded_channel::BoundedSender;
use crate::harvester::finder::FileFinder;
use crate::harvester::reader::LineReader;
use crate::harvester::registrar::RegistrarMessage;
use crate::harvester::tailer::Harvester;
use crate::harvester::{HarvesterConfig, StartAt};
use crate::output::Batch;
use crate::registry::{FileIdentity, RegistryStore, Ttl};

type HarvesterResult = (FileIdentity, u64, Result<(), BoxError>);

struct Active {
    source: PathBuf,
    /// Current path as seen by the harvester
    source_tx: watch::Sender<String>,
    /// Distinguishes successive harvesters of the same file
    run_id: u64,
    cancel: CancellationToken,
}

pub struct Crawler {
    config: Arc<HarvesterConfig>,
    finder: FileFinder,
    store: RegistryStore,
    registrar: BoundedSender<RegistrarMessage>,
    output: BoundedSender<Batch>,
    active: HashMap<FileIdentity, Active>,
    harvesters: JoinSet<HarvesterResult>,
    next_run_id: u64,
}

impl Crawler {
    pub fn new(
        config: HarvesterConfig,
        store: RegistryStore,
        registrar: BoundedSender<RegistrarMessage>,
        output: BoundedSender<Batch>,
    ) -> crate::registry::Result<Self> {
        let finder = FileFinder::new(config.include.clone(), config.exclude.clone())?;
        Ok(Self {
            config: Arc::new(config),
            finder,
            store,
            registrar,
            output,
            active: HashMap::new(),
            harvesters: JoinSet::new(),
            next_run_id: 0,
        })
    }

    /// Scan every `scan_frequency` until cancelled, then stop all harvesters.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<(), BoxError> {
        info!(
            include = ?self.config.include,
            scan_frequency = ?self.config.scan_frequency,
            "Crawler started"
        );

        let mut interval = tokio::time::interval(self.config.scan_frequency);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            select! {
                biased;

                _ = cancel_token.cancelled() => break,

                Some(res) = self.harvesters.join_next(), if !self.harvesters.is_empty() => {
                    self.reap(res);
                }

                _ = interval.tick() => {
                    self.scan(&cancel_token).await?;
                }
            }
        }

        for active in self.active.values() {
            active.cancel.cancel();
        }
        while let Some(res) = self.harvesters.join_next().await {
            self.reap(res);
        }

        info!("Crawler stopped");
        Ok(())
    }

    async fn scan(&mut self, cancel_token: &CancellationToken) -> Result<(), BoxError> {
        let paths = self.finder.find_files()?;
        let mut seen = HashSet::new();

        for path in paths {
            let file = match File::open(&path) {
                Ok(file) => file,
                Err(e) => {
                    debug!("Skipping {:?}: {}", path, e);
                    continue;
                }
            };
            let identity = match FileIdentity::from_file(&file) {
                Ok(identity) => identity,
                Err(e) => {
                    warn!("Failed to identify {:?}: {}", path, e);
                    continue;
                }
            };

            // Hard links: the first path wins
            if !seen.insert(identity) {
                continue;
            }

            if let Some(active) = self.active.get_mut(&identity) {
                if active.source != path {
                    info!(
                        identity = %identity,
                        previous = ?active.source,
                        source = ?path,
                        "File renamed"
                    );
                    active.source = path.clone();
                    let source = path.to_string_lossy().into_owned();
                    active.source_tx.send_replace(source.clone());
                    self.registrar
                        .send(RegistrarMessage::Renamed { identity, source })
                        .await
                        .map_err(|e| format!("registrar unavailable: {}", e))?;
                }
                continue;
            }

            if let Err(e) = self.start_harvester(path.clone(), file, identity, cancel_token).await {
                warn!("Failed to start harvester for {:?}: {}", path, e);
            }
        }

        // Files with a harvester are reported by the loop below
        if self.store.config().clean_removed {
            self.remove_unseen_states(&seen).await?;
        }

        let gone: Vec<FileIdentity> = self
            .active
            .keys()
            .filter(|identity| !seen.contains(*identity))
            .copied()
            .collect();
        for identity in gone {
            if let Some(active) = self.active.remove(&identity) {
                info!(identity = %identity, source = ?active.source, "File removed");
                active.cancel.cancel();
                self.registrar
                    .send(RegistrarMessage::Removed { identity })
                    .await
                    .map_err(|e| format!("registrar unavailable: {}", e))?;
            }
        }

        Ok(())
    }

    /// Report stored states that no scan found and no harvester owns.
    async fn remove_unseen_states(&mut self, seen: &HashSet<FileIdentity>) -> Result<(), BoxError> {
        for state in self.store.snapshot()? {
            if state.ttl == Ttl::Remove
                || seen.contains(&state.identity)
                || self.active.contains_key(&state.identity)
            {
                continue;
            }
            info!(
                identity = %state.identity,
                source = %state.source,
                "Stored file no longer found"
            );
            self.registrar
                .send(RegistrarMessage::Removed {
                    identity: state.identity,
                })
                .await
                .map_err(|e| format!("registrar unavailable: {}", e))?;
        }
        Ok(())
    }

    async fn start_harvester(
        &mut self,
        path: PathBuf,
        file: File,
        identity: FileIdentity,
        cancel_token: &CancellationToken,
    ) -> Result<(), BoxError> {
        let source = path.to_string_lossy().into_owned();
        let len = file.metadata()?.len();

        let (offset, persist) = match self.store.get(&identity)? {
            Some(state) if len < state.offset => {
                info!(
                    source = %source,
                    stored = state.offset,
                    size = len,
                    "File is smaller than its stored offset, reading from the beginning"
                );
                self.registrar
                    .send(RegistrarMessage::Truncated {
                        identity,
                        source: source.clone(),
                        generation: 0,
                    })
                    .await
                    .map_err(|e| format!("registrar unavailable: {}", e))?;
                (0, false)
            }
            Some(state) => (state.offset, false),
            None => match self.config.start_at {
                StartAt::Beginning => (0, false),
                StartAt::End => (len, true),
            },
        };

        let reader = LineReader::from_file(file, offset, self.config.max_line_bytes)?;

        self.registrar
            .send(RegistrarMessage::Opened {
                identity,
                source: source.clone(),
                offset,
                persist,
            })
            .await
            .map_err(|e| format!("registrar unavailable: {}", e))?;

        info!(source = %source, offset, "Starting harvester");

        let (source_tx, source_rx) = watch::channel(source.clone());
        let harvester = Harvester::new(
            reader,
            source_rx,
            self.config.clone(),
            self.registrar.clone(),
            self.output.clone(),
        );
        let cancel = cancel_token.child_token();
        let run_id = self.next_run_id;
        self.next_run_id += 1;

        let token = cancel.clone();
        self.harvesters
            .spawn(async move { (identity, run_id, harvester.run(token).await) });
        self.active.insert(
            identity,
            Active {
                source: path,
                source_tx,
                run_id,
                cancel,
            },
        );
        Ok(())
    }

    fn reap(&mut self, res: Result<HarvesterResult, JoinError>) {
        match res {
            Ok((identity, run_id, result)) => {
                if let Err(e) = result {
                    warn!(identity = %identity, "Harvester failed: {}", e);
                }
                // Restarted on the next scan if the file is still there
                if self.active.get(&identity).is_some_and(|a| a.run_id == run_id) {
                    self.active.remove(&identity);
                }
            }
            Err(e) => warn!("Failed to join harvester task: {:?}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{BoundedReceiver, bounded};
    use crate::registry::{FileState, RegistryConfig};
    use std::fs;
    use std::time::Duration;

    struct Fixture {
        dir: tempfile::TempDir,
        store: RegistryStore,
        crawler: Crawler,
        reg_rx: BoundedReceiver<RegistrarMessage>,
        _out_rx: BoundedReceiver<Batch>,
    }

    fn fixture(start_at: StartAt) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("logs")).unwrap();
        let store =
            RegistryStore::open(RegistryConfig::with_data_path(dir.path().join("data"))).unwrap();
        let (reg_tx, reg_rx) = bounded(100);
        let (out_tx, out_rx) = bounded(100);
        let config = HarvesterConfig {
            include: vec![format!("{}/logs/*.log", dir.path().display())],
            start_at,
            backoff: Duration::from_millis(5),
            max_backoff: Duration::from_millis(10),
            ..Default::default()
        };
        let crawler = Crawler::new(config, store.clone(), reg_tx, out_tx).unwrap();
        Fixture {
            dir,
            store,
            crawler,
            reg_rx,
            _out_rx: out_rx,
        }
    }

    /// Registrar messages other than Published
    fn lifecycle(rx: &BoundedReceiver<RegistrarMessage>) -> Vec<RegistrarMessage> {
        let mut out = Vec::new();
        while let Some(msg) = rx.try_recv() {
            if !matches!(msg, RegistrarMessage::Published { .. }) {
                out.push(msg);
            }
        }
        out
    }

    #[tokio::test]
    async fn test_new_file_starts_at_beginning() {
        let mut f = fixture(StartAt::Beginning);
        let path = f.dir.path().join("logs/a.log");
        fs::write(&path, "hello\n").unwrap();
        let identity = FileIdentity::from_path(&path).unwrap();

        let cancel = CancellationToken::new();
        f.crawler.scan(&cancel).await.unwrap();

        assert_eq!(
            lifecycle(&f.reg_rx),
            vec![RegistrarMessage::Opened {
                identity,
                source: path.to_string_lossy().into_owned(),
                offset: 0,
                persist: false,
            }]
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_start_at_end_and_stored_offset() {
        let mut f = fixture(StartAt::End);
        let a = f.dir.path().join("logs/a.log");
        let b = f.dir.path().join("logs/b.log");
        fs::write(&a, "0123456789\n").unwrap();
        fs::write(&b, "0123456789\n0123456789\n").unwrap();
        let id_b = FileIdentity::from_path(&b).unwrap();
        f.store
            .upsert(FileState::new(id_b, b.to_string_lossy(), 11))
            .unwrap();

        let cancel = CancellationToken::new();
        f.crawler.scan(&cancel).await.unwrap();

        let opened: HashMap<FileIdentity, (u64, bool)> = lifecycle(&f.reg_rx)
            .into_iter()
            .filter_map(|m| match m {
                RegistrarMessage::Opened {
                    identity,
                    offset,
                    persist,
                    ..
                } => Some((identity, (offset, persist))),
                _ => None,
            })
            .collect();

        let id_a = FileIdentity::from_path(&a).unwrap();
        assert_eq!(opened[&id_a], (11, true));
        assert_eq!(opened[&id_b], (11, false));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stored_offset_beyond_size_is_truncation() {
        let mut f = fixture(StartAt::Beginning);
        let path = f.dir.path().join("logs/a.log");
        fs::write(&path, "short\n").unwrap();
        let identity = FileIdentity::from_path(&path).unwrap();
        f.store
            .upsert(FileState::new(identity, path.to_string_lossy(), 500))
            .unwrap();

        let cancel = CancellationToken::new();
        f.crawler.scan(&cancel).await.unwrap();

        let msgs = lifecycle(&f.reg_rx);
        assert!(matches!(msgs[0], RegistrarMessage::Truncated { .. }));
        assert!(matches!(msgs[1], RegistrarMessage::Opened { offset: 0, .. }));
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_rename_and_removal() {
        let mut f = fixture(StartAt::Beginning);
        let path = f.dir.path().join("logs/a.log");
        let renamed = f.dir.path().join("logs/a.1.log");
        fs::write(&path, "hello\n").unwrap();
        let identity = FileIdentity::from_path(&path).unwrap();

        let cancel = CancellationToken::new();
        f.crawler.scan(&cancel).await.unwrap();
        lifecycle(&f.reg_rx);

        fs::rename(&path, &renamed).unwrap();
        f.crawler.scan(&cancel).await.unwrap();
        assert_eq!(
            lifecycle(&f.reg_rx),
            vec![RegistrarMessage::Renamed {
                identity,
                source: renamed.to_string_lossy().into_owned(),
            }]
        );
        assert_eq!(
            *f.crawler.active[&identity].source_tx.borrow(),
            renamed.to_string_lossy()
        );

        fs::remove_file(&renamed).unwrap();
        f.crawler.scan(&cancel).await.unwrap();
        assert_eq!(
            lifecycle(&f.reg_rx),
            vec![RegistrarMessage::Removed { identity }]
        );
        assert!(f.crawler.active.is_empty());
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_stored_state_of_vanished_file_is_removed() {
        let mut f = fixture(StartAt::Beginning);
        let gone = f.dir.path().join("logs/gone.log");
        let identity = FileIdentity::new(u64::MAX, 77);
        f.store
            .upsert(FileState::new(identity, gone.to_string_lossy(), 77))
            .unwrap();

        let cancel = CancellationToken::new();
        f.crawler.scan(&cancel).await.unwrap();
        assert_eq!(
            lifecycle(&f.reg_rx),
            vec![RegistrarMessage::Removed { identity }]
        );

        // Not reported again once the registrar has marked it
        f.store.mark_removed(&identity).unwrap();
        f.crawler.scan(&cancel).await.unwrap();
        assert!(lifecycle(&f.reg_rx).is_empty());
        cancel.cancel();
    }
}
