// SPDX-License-Identifier: Apache-2.0

//! The registrar: single writer of the registry.
//!
//! Harvesters and the output report what happened to each file over one
//! FIFO channel. The registrar turns those reports into registry updates,
//! flushes them on a timer, and performs a final flush once every queued
//! message has been applied at shutdown.

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use chrono::Utc;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::bounded_channel::BoundedReceiver;
use crate::harvester::offset_tracker::{LineOffset, OffsetTracker};
use crate::registry::{FileIdentity, FileState, RegistryStore, Result, UpsertOutcome};

/// Pause between attempts of the final flush
const FINAL_FLUSH_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Events that drive the registry.
///
/// `generation` counts truncations of the file as seen by its harvester, so
/// acknowledgements for data read before a truncation are ignored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistrarMessage {
    /// A harvester started reading `source` at `offset`. With `persist` the
    /// state is stored right away, otherwise only after the first
    /// acknowledgement.
    Opened {
        identity: FileIdentity,
        source: String,
        offset: u64,
        persist: bool,
    },
    /// Lines handed to the output
    Published {
        identity: FileIdentity,
        generation: u64,
        offsets: Vec<LineOffset>,
    },
    /// Lines acknowledged by the output
    Acked {
        identity: FileIdentity,
        generation: u64,
        offsets: Vec<LineOffset>,
    },
    /// The file is now found under a different path
    Renamed {
        identity: FileIdentity,
        source: String,
    },
    /// The file shrank below the read position; reading restarts at 0
    Truncated {
        identity: FileIdentity,
        source: String,
        generation: u64,
    },
    /// The file is gone
    Removed { identity: FileIdentity },
}

#[derive(Debug)]
struct Tracked {
    source: String,
    generation: u64,
}

pub struct Registrar {
    store: RegistryStore,
    receiver: BoundedReceiver<RegistrarMessage>,
    tracker: OffsetTracker,
    files: HashMap<FileIdentity, Tracked>,
    /// Removed files that may still see acknowledgements
    removed: HashSet<FileIdentity>,
    consecutive_failures: u32,
}

impl Registrar {
    pub fn new(store: RegistryStore, receiver: BoundedReceiver<RegistrarMessage>) -> Self {
        Self {
            store,
            receiver,
            tracker: OffsetTracker::new(),
            files: HashMap::new(),
            removed: HashSet::new(),
            consecutive_failures: 0,
        }
    }

    /// Apply messages until cancelled or every sender is gone, then drain
    /// what is queued and flush one last time.
    ///
    /// Fails when `max_flush_failures` consecutive flushes fail, or when the
    /// final flush does.
    pub async fn run(mut self, cancel_token: CancellationToken) -> Result<()> {
        let flush_interval = self.store.config().flush_interval;
        let flush_every_update = flush_interval.is_zero();
        let mut interval =
            tokio::time::interval(flush_interval.max(Duration::from_millis(1)));
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(
            flush_interval = ?flush_interval,
            "Registrar started"
        );

        let mut fatal_error = None;

        loop {
            select! {
                biased;

                _ = interval.tick(), if !flush_every_update => {
                    if let Err(e) = self.periodic_flush() {
                        fatal_error = Some(e);
                        break;
                    }
                }

                msg = self.receiver.next() => {
                    match msg {
                        Some(msg) => {
                            if let Err(e) = self.apply(msg) {
                                fatal_error = Some(e);
                                break;
                            }
                            if flush_every_update {
                                if let Err(e) = self.periodic_flush() {
                                    fatal_error = Some(e);
                                    break;
                                }
                            }
                        }
                        None => {
                            debug!("All registrar senders closed");
                            break;
                        }
                    }
                }

                _ = cancel_token.cancelled() => {
                    debug!("Registrar cancelled, draining queued messages");
                    break;
                }
            }
        }

        if let Some(e) = fatal_error {
            return Err(e);
        }

        let mut drained = 0;
        while let Some(msg) = self.receiver.try_recv() {
            self.apply(msg)?;
            drained += 1;
        }
        if drained > 0 {
            debug!("Applied {} queued registrar messages", drained);
        }

        self.final_flush().await
    }

    fn apply(&mut self, msg: RegistrarMessage) -> Result<()> {
        let ttl = self.store.config().default_ttl();

        match msg {
            RegistrarMessage::Opened {
                identity,
                source,
                offset,
                persist,
            } => {
                self.removed.remove(&identity);
                self.tracker.remove_file(identity);
                self.files.insert(
                    identity,
                    Tracked {
                        source: source.clone(),
                        generation: 0,
                    },
                );

                // A known file is refreshed so a pending removal or an old
                // path does not stick. Acknowledgements applied after the
                // crawler read the stored offset may have moved it past
                // `offset`; that position is kept.
                let offset = match self.store.get(&identity)? {
                    Some(stored) => Some(stored.offset.max(offset)),
                    None if persist => Some(offset),
                    None => None,
                };
                if let Some(offset) = offset {
                    let state = FileState::new(identity, source, offset).with_ttl(ttl);
                    self.upsert(state)?;
                }
            }

            RegistrarMessage::Published {
                identity,
                generation,
                offsets,
            } => {
                if self.is_current(identity, generation) {
                    self.tracker.track_batch(identity, &offsets);
                }
            }

            RegistrarMessage::Acked {
                identity,
                generation,
                offsets,
            } => {
                if !self.is_current(identity, generation) {
                    debug!(
                        identity = %identity,
                        generation,
                        "Ignoring acknowledgement for data read before truncation"
                    );
                    return Ok(());
                }

                self.tracker.acknowledge_batch(identity, &offsets);
                let Some(offset) = self.tracker.persistable_offset(identity) else {
                    return Ok(());
                };

                let stored = self.store.get(&identity)?;
                if let Some(stored) = stored.as_ref().filter(|s| s.offset > offset) {
                    // Lines re-read by a restarted harvester
                    debug!(
                        identity = %identity,
                        stored = stored.offset,
                        offset,
                        "Acknowledged offset is behind the registry"
                    );
                    return Ok(());
                }

                let source = match self.files.get(&identity) {
                    Some(tracked) => tracked.source.clone(),
                    None => stored.map(|s| s.source).unwrap_or_default(),
                };
                self.upsert(FileState::new(identity, source, offset).with_ttl(ttl))?;

                if self.removed.contains(&identity) && self.store.config().clean_removed {
                    self.store.mark_removed(&identity)?;
                }
            }

            RegistrarMessage::Renamed { identity, source } => {
                if let Some(tracked) = self.files.get_mut(&identity) {
                    tracked.source = source.clone();
                }
                if let Some(stored) = self.store.get(&identity)? {
                    let state = FileState::new(identity, source, stored.offset).with_ttl(ttl);
                    self.upsert(state)?;
                }
            }

            RegistrarMessage::Truncated {
                identity,
                source,
                generation,
            } => {
                self.tracker.remove_file(identity);
                self.files.insert(
                    identity,
                    Tracked {
                        source: source.clone(),
                        generation,
                    },
                );
                self.store
                    .reset(FileState::new(identity, source, 0).with_ttl(ttl))?;
            }

            RegistrarMessage::Removed { identity } => {
                self.files.remove(&identity);
                if self.tracker.has_pending(identity) {
                    self.removed.insert(identity);
                } else {
                    self.tracker.remove_file(identity);
                }

                if self.store.config().clean_removed && self.store.mark_removed(&identity)? {
                    debug!(identity = %identity, "Marked state of removed file for cleanup");
                }
            }
        }

        Ok(())
    }

    fn is_current(&self, identity: FileIdentity, generation: u64) -> bool {
        match self.files.get(&identity) {
            Some(tracked) => generation >= tracked.generation,
            // Late acknowledgements for closed harvesters still count
            None => true,
        }
    }

    fn upsert(&self, state: FileState) -> Result<()> {
        let identity = state.identity;
        match self.store.upsert(state)? {
            UpsertOutcome::Renamed { previous } => {
                info!(identity = %identity, previous = %previous, "File renamed, state kept");
            }
            UpsertOutcome::Inserted => {
                debug!(identity = %identity, "New file added to registry");
            }
            _ => {}
        }
        Ok(())
    }

    /// Clean up and flush, tolerating up to `max_flush_failures - 1`
    /// consecutive failures.
    fn periodic_flush(&mut self) -> Result<()> {
        match self.collect_and_flush() {
            Ok(()) => {
                if self.consecutive_failures > 0 {
                    info!(
                        "Registry flush succeeded after {} failures",
                        self.consecutive_failures
                    );
                    self.consecutive_failures = 0;
                }
                Ok(())
            }
            Err(e) => {
                self.consecutive_failures += 1;
                let max = self.store.config().max_flush_failures;
                if self.consecutive_failures >= max {
                    error!(
                        failures = self.consecutive_failures,
                        "Registry flush failed too many times, giving up: {}", e
                    );
                    Err(e)
                } else {
                    warn!(
                        failures = self.consecutive_failures,
                        "Registry flush failed: {}", e
                    );
                    Ok(())
                }
            }
        }
    }

    fn collect_and_flush(&self) -> Result<()> {
        // Files with a running harvester are never cleaned, however idle
        let removed = self
            .store
            .collect_garbage(Utc::now(), |identity| self.files.contains_key(identity))?;
        if removed > 0 {
            debug!("Removed {} expired states from registry", removed);
        }
        self.store.flush()
    }

    async fn final_flush(&mut self) -> Result<()> {
        let attempts = self.store.config().max_flush_failures.max(1);
        let mut attempt = 1;
        loop {
            match self.collect_and_flush() {
                Ok(()) => {
                    info!(
                        states = self.store.len()?,
                        "Final registry flush completed"
                    );
                    return Ok(());
                }
                Err(e) if attempt < attempts => {
                    warn!(attempt, "Final registry flush failed, retrying: {}", e);
                    attempt += 1;
                    tokio::time::sleep(FINAL_FLUSH_RETRY_DELAY).await;
                }
                Err(e) => {
                    error!(attempt, "Final registry flush failed: {}", e);
                    return Err(e);
                }
            }
        }
    }
}
