// SPDX-License-Identifier: Apache-2.0

//! Durable map of file identity to [`FileState`].
//!
//! All updates are buffered in memory and written out by [`RegistryStore::flush`].
//! The store is cheap to clone; clones share the same state.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::registry::config::RegistryConfig;
use crate::registry::error::{Error, Result};
use crate::registry::identity::FileIdentity;
use crate::registry::migrate::{self, Migrator, RegistryFormat, legacy};
use crate::registry::persistence::{
    self, ensure_regular_file, read_meta, remove_stale_temp_files, set_permissions,
};
use crate::registry::state::{FileState, Ttl};

/// What an [`RegistryStore::upsert`] did to the stored state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// No state existed for the identity
    Inserted,
    /// Offset or metadata changed, same source
    Updated,
    /// Same physical file seen under a new path
    Renamed { previous: String },
    /// The new offset was lower than the stored one and was ignored
    Regressed { stored: u64 },
}

#[derive(Debug, Default)]
struct StoreInner {
    states: HashMap<FileIdentity, FileState>,
    dirty: bool,
}

#[derive(Debug, Clone)]
pub struct RegistryStore {
    config: Arc<RegistryConfig>,
    inner: Arc<Mutex<StoreInner>>,
}

impl RegistryStore {
    /// Open the registry: migrate any legacy layout, then load the current one.
    ///
    /// A corrupt registry is an error unless `ignore_corrupt` is set, in which
    /// case the offending file is moved aside and loading is retried.
    pub fn open(config: RegistryConfig) -> Result<Self> {
        config.validate()?;

        let states = match load(&config) {
            Ok(states) => states,
            Err(Error::Corrupt { path, reason }) if config.ignore_corrupt => {
                let moved_to = quarantine(&path)?;
                warn!(
                    path = ?path,
                    moved_to = ?moved_to,
                    "Registry is corrupt ({}), starting with an empty registry",
                    reason
                );
                load(&config)?
            }
            Err(e) => return Err(e),
        };

        info!(
            path = ?config.data_file(),
            states = states.len(),
            "Registry loaded"
        );

        Ok(Self {
            config: Arc::new(config),
            inner: Arc::new(Mutex::new(StoreInner {
                states,
                dirty: false,
            })),
        })
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.config
    }

    pub fn data_file(&self) -> PathBuf {
        self.config.data_file()
    }

    pub fn get(&self, identity: &FileIdentity) -> Result<Option<FileState>> {
        let inner = self.inner.lock()?;
        Ok(inner.states.get(identity).cloned())
    }

    /// Insert or replace the state for `state.identity`.
    ///
    /// Offsets never move backwards here: a lower offset is logged and the
    /// stored one kept, though the source path is still refreshed. Use
    /// [`RegistryStore::reset`] for truncated files.
    pub fn upsert(&self, mut state: FileState) -> Result<UpsertOutcome> {
        let mut inner = self.inner.lock()?;

        let outcome = match inner.states.get(&state.identity) {
            None => UpsertOutcome::Inserted,
            Some(stored) if state.offset < stored.offset => {
                error!(
                    identity = %state.identity,
                    source = %state.source,
                    stored = stored.offset,
                    offset = state.offset,
                    "Refusing to move registry offset backwards"
                );
                state.offset = stored.offset;
                UpsertOutcome::Regressed {
                    stored: stored.offset,
                }
            }
            Some(stored) if stored.source != state.source => {
                debug!(
                    identity = %state.identity,
                    previous = %stored.source,
                    source = %state.source,
                    "File renamed"
                );
                UpsertOutcome::Renamed {
                    previous: stored.source.clone(),
                }
            }
            Some(_) => UpsertOutcome::Updated,
        };

        inner.states.insert(state.identity, state);
        inner.dirty = true;
        Ok(outcome)
    }

    /// Replace the state unconditionally; the only way to lower an offset.
    pub fn reset(&self, state: FileState) -> Result<()> {
        let mut inner = self.inner.lock()?;
        info!(
            identity = %state.identity,
            source = %state.source,
            offset = state.offset,
            "Resetting registry offset"
        );
        inner.states.insert(state.identity, state);
        inner.dirty = true;
        Ok(())
    }

    /// Flag the state of a vanished file so the next cleanup drops it.
    /// Returns false if the identity is unknown.
    pub fn mark_removed(&self, identity: &FileIdentity) -> Result<bool> {
        let mut inner = self.inner.lock()?;
        match inner.states.get_mut(identity) {
            Some(state) if state.ttl != Ttl::Remove => {
                state.ttl = Ttl::Remove;
                state.timestamp = Utc::now();
                inner.dirty = true;
                Ok(true)
            }
            Some(_) => Ok(true),
            None => Ok(false),
        }
    }

    /// Drop expired states and states marked for removal, except those for
    /// which `in_use` holds. Returns how many were dropped.
    pub fn collect_garbage<F>(&self, now: DateTime<Utc>, in_use: F) -> Result<usize>
    where
        F: Fn(&FileIdentity) -> bool,
    {
        let mut inner = self.inner.lock()?;
        let before = inner.states.len();
        inner.states.retain(|identity, state| {
            if in_use(identity) {
                return true;
            }
            let expired = state.is_expired(now);
            if expired {
                debug!(
                    identity = %state.identity,
                    source = %state.source,
                    "Removing state from registry"
                );
            }
            !expired
        });
        let removed = before - inner.states.len();
        if removed > 0 {
            inner.dirty = true;
        }
        Ok(removed)
    }

    /// Persist all states atomically. Does nothing if there are no changes
    /// since the last successful flush.
    pub fn flush(&self) -> Result<()> {
        let snapshot = {
            let mut inner = self.inner.lock()?;
            if !inner.dirty {
                return Ok(());
            }
            inner.dirty = false;
            sorted(inner.states.values().cloned())
        };

        let result = persistence::write_states(
            &self.config.data_file(),
            &snapshot,
            self.config.file_permissions,
        );

        match result {
            Ok(()) => {
                debug!(states = snapshot.len(), "Registry flushed");
                Ok(())
            }
            Err(e) => {
                self.inner.lock()?.dirty = true;
                Err(e)
            }
        }
    }

    /// Whether there are changes not yet flushed
    pub fn is_dirty(&self) -> Result<bool> {
        Ok(self.inner.lock()?.dirty)
    }

    /// All states, ordered by identity
    pub fn snapshot(&self) -> Result<Vec<FileState>> {
        let inner = self.inner.lock()?;
        Ok(sorted(inner.states.values().cloned()))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.inner.lock()?.states.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.inner.lock()?.states.is_empty())
    }

    /// Read the registry without migrating or otherwise modifying it.
    pub fn inspect(config: &RegistryConfig) -> Result<(RegistryFormat, Vec<FileState>)> {
        let detected = Migrator::new(config).detect()?;
        let states = match detected.format {
            RegistryFormat::Empty => Vec::new(),
            RegistryFormat::Current => {
                let data_file = config.data_file();
                ensure_regular_file(&data_file)?;
                persistence::read_states(&data_file)?
            }
            _ => {
                let migrated = migrate::migrate(&detected.path)?;
                migrated.states.into_values().collect()
            }
        };
        Ok((detected.format, sorted(states)))
    }
}

fn load(config: &RegistryConfig) -> Result<HashMap<FileIdentity, FileState>> {
    Migrator::new(config).run()?;

    let data_file = config.data_file();
    ensure_regular_file(&data_file)?;

    let stale = remove_stale_temp_files(&data_file)?;
    if stale > 0 {
        warn!(
            "Removed {} incomplete registry write(s) next to {:?}",
            stale, data_file
        );
    }

    let loaded = persistence::read_states(&data_file)?;

    // TTLs follow the current cleanup settings, not the ones the state was
    // written under
    let ttl = config.default_ttl();
    let states = legacy::collapse(
        loaded
            .into_iter()
            .map(|state| state.with_ttl(ttl))
            .collect(),
    );

    if data_file.exists() {
        set_permissions(&data_file, config.file_permissions)?;
    }
    if read_meta(&config.meta_file())?.is_none() {
        fs::create_dir_all(config.store_dir())?;
        persistence::write_meta(&config.meta_file(), config.file_permissions)?;
    }

    Ok(states)
}

fn quarantine(path: &Path) -> Result<PathBuf> {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", Utc::now().timestamp()));
    let target = PathBuf::from(name);
    fs::rename(path, &target)?;
    Ok(target)
}

fn sorted(states: impl IntoIterator<Item = FileState>) -> Vec<FileState> {
    let mut states: Vec<_> = states.into_iter().collect();
    states.sort_by(|a, b| a.identity.cmp(&b.identity));
    states
}
