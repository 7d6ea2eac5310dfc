// SPDX-License-Identifier: Apache-2.0

//! Registry format detection and migration.
//!
//! Supported layouts, oldest first:
//! - 1.x: single file at the registry root, object keyed by path
//! - 5.x: single file at the registry root, array of states
//! - 6.x: single file at the registry root, array of states with `type`/`meta`
//! - directory version 0: `<root>/<store>/{meta.json,data.json}`, 6.x records
//! - directory version 1 (current): same layout, `identifier` records
//!
//! Migration rewrites the store in the current layout exactly once. A flat
//! file is parked at `<root>.old` while the directory is created, so an
//! interrupted migration resumes from the parked copy on the next start.

pub mod legacy;

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::registry::config::RegistryConfig;
use crate::registry::error::{Error, Result};
use crate::registry::persistence::{
    self, MetaFile, REGISTRY_VERSION, ensure_regular_file, read_meta,
};

pub use legacy::StateMap;

/// On-disk registry layouts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegistryFormat {
    /// Nothing persisted yet
    Empty,
    Flat1x,
    Flat5x,
    Flat6x,
    Directory0,
    Current,
}

impl RegistryFormat {
    pub fn is_flat(&self) -> bool {
        matches!(
            self,
            RegistryFormat::Flat1x | RegistryFormat::Flat5x | RegistryFormat::Flat6x
        )
    }
}

impl fmt::Display for RegistryFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RegistryFormat::Empty => "empty",
            RegistryFormat::Flat1x => "flat file (1.x)",
            RegistryFormat::Flat5x => "flat file (5.x)",
            RegistryFormat::Flat6x => "flat file (6.x)",
            RegistryFormat::Directory0 => "directory (version 0)",
            RegistryFormat::Current => "directory (version 1)",
        };
        f.write_str(name)
    }
}

/// Result of format detection: the format and where its data lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detected {
    pub format: RegistryFormat,
    pub path: PathBuf,
}

/// States recovered from a legacy registry
#[derive(Debug)]
pub struct Migrated {
    pub format: RegistryFormat,
    pub states: StateMap,
}

/// Detects and upgrades the registry described by a [`RegistryConfig`]
pub struct Migrator<'a> {
    config: &'a RegistryConfig,
}

impl<'a> Migrator<'a> {
    pub fn new(config: &'a RegistryConfig) -> Self {
        Self { config }
    }

    /// Work out which layout is on disk. Does not modify anything.
    pub fn detect(&self) -> Result<Detected> {
        let root = self.config.root();

        match fs::metadata(&root) {
            Ok(metadata) if metadata.is_file() => {
                let format = detect_flat(&root)?;
                return Ok(Detected { format, path: root });
            }
            Ok(metadata) if !metadata.is_dir() => {
                return Err(Error::NotRegularFile(root));
            }
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let meta_path = self.config.meta_file();
        if let Some(meta) = read_meta(&meta_path)? {
            let format = match meta.version.as_str() {
                REGISTRY_VERSION => RegistryFormat::Current,
                "0" => RegistryFormat::Directory0,
                other => {
                    return Err(Error::unsupported(
                        &meta_path,
                        format!("unknown registry version {:?}", other),
                    ));
                }
            };
            return Ok(Detected {
                format,
                path: self.config.store_dir(),
            });
        }

        // A parked flat file without a finished directory layout means a
        // migration was interrupted
        let backup = self.config.legacy_backup();
        if backup.is_file() {
            let format = detect_flat(&backup)?;
            return Ok(Detected {
                format,
                path: backup,
            });
        }

        let data_path = self.config.data_file();
        if data_path.exists() {
            return Err(Error::unsupported(
                &data_path,
                "registry data file exists without meta.json",
            ));
        }

        Ok(Detected {
            format: RegistryFormat::Empty,
            path: self.config.store_dir(),
        })
    }

    /// Upgrade a legacy registry to the current layout.
    ///
    /// Returns the detected legacy format when a migration ran and `None`
    /// when the registry was already current or empty.
    pub fn run(&self) -> Result<Option<RegistryFormat>> {
        let detected = self.detect()?;

        match detected.format {
            RegistryFormat::Empty => Ok(None),
            RegistryFormat::Current => {
                self.remove_leftover_backup()?;
                Ok(None)
            }
            format => {
                info!(
                    format = %format,
                    path = ?detected.path,
                    "Detected legacy registry, migrating to current format"
                );

                let migrated = migrate(&detected.path)?;
                if format.is_flat() && detected.path == self.config.root() {
                    let backup = self.config.legacy_backup();
                    debug!("Parking legacy registry file at {:?}", backup);
                    fs::rename(&detected.path, &backup)?;
                }

                self.write_current(&migrated.states)?;
                self.remove_leftover_backup()?;

                info!(
                    format = %format,
                    states = migrated.states.len(),
                    "Registry migration completed"
                );
                Ok(Some(format))
            }
        }
    }

    fn write_current(&self, states: &StateMap) -> Result<()> {
        let store_dir = self.config.store_dir();
        fs::create_dir_all(&store_dir)?;

        // Data first: the meta file is what marks the layout as current
        let mut ordered: Vec<_> = states.values().collect();
        ordered.sort_by(|a, b| a.identity.cmp(&b.identity));
        persistence::write_states(
            &self.config.data_file(),
            ordered,
            self.config.file_permissions,
        )?;
        persistence::write_meta(&self.config.meta_file(), self.config.file_permissions)
    }

    fn remove_leftover_backup(&self) -> Result<()> {
        let backup = self.config.legacy_backup();
        if backup.is_file() {
            warn!("Removing leftover legacy registry backup {:?}", backup);
            fs::remove_file(&backup)?;
        }
        Ok(())
    }
}

/// Parse a legacy registry into states without touching the disk.
///
/// `path` is either a flat registry file or a version 0 store directory.
/// Running it twice on the same input yields the same states.
pub fn migrate(path: &Path) -> Result<Migrated> {
    let metadata = fs::metadata(path)?;
    let written_at: DateTime<Utc> = metadata
        .modified()
        .map(DateTime::<Utc>::from)
        .unwrap_or_else(|_| Utc::now());

    if metadata.is_dir() {
        let meta_path = path.join(crate::registry::config::META_FILE_NAME);
        match read_meta(&meta_path)? {
            Some(MetaFile { version }) if version == "0" => {}
            Some(MetaFile { version }) => {
                return Err(Error::unsupported(
                    &meta_path,
                    format!("registry version {:?} is not a legacy layout", version),
                ));
            }
            None => return Err(Error::unsupported(path, "missing meta.json")),
        }

        let data_path = path.join(crate::registry::config::DATA_FILE_NAME);
        ensure_regular_file(&data_path)?;
        let states = match fs::read(&data_path) {
            Ok(bytes) => {
                let records = persistence::parse_records(&data_path, &bytes)?;
                legacy::parse_flat_6x(&data_path, records, written_at)?
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateMap::new(),
            Err(e) => return Err(e.into()),
        };
        return Ok(Migrated {
            format: RegistryFormat::Directory0,
            states,
        });
    }

    let document = read_document(path)?;
    let format = classify(path, &document)?;
    let states = match (format, document) {
        (RegistryFormat::Flat1x, document) => legacy::parse_flat_1x(path, document, written_at)?,
        (RegistryFormat::Flat5x, serde_json::Value::Array(records)) => {
            legacy::parse_flat_5x(path, records, written_at)?
        }
        (RegistryFormat::Flat6x, serde_json::Value::Array(records)) => {
            legacy::parse_flat_6x(path, records, written_at)?
        }
        _ => return Err(Error::unsupported(path, "unrecognized registry layout")),
    };
    Ok(Migrated { format, states })
}

fn read_document(path: &Path) -> Result<serde_json::Value> {
    let bytes = fs::read(path)?;
    if bytes.iter().all(|b| b.is_ascii_whitespace()) {
        return Err(Error::corrupt(path, "registry file is empty"));
    }
    serde_json::from_slice(&bytes).map_err(|e| Error::corrupt(path, e))
}

fn detect_flat(path: &Path) -> Result<RegistryFormat> {
    let document = read_document(path)?;
    classify(path, &document)
}

fn classify(path: &Path, document: &serde_json::Value) -> Result<RegistryFormat> {
    match document {
        serde_json::Value::Object(_) => Ok(RegistryFormat::Flat1x),
        serde_json::Value::Array(records) => {
            let mut has_6x_fields = false;
            for record in records {
                let serde_json::Value::Object(fields) = record else {
                    return Err(Error::unsupported(path, "registry entries must be objects"));
                };
                has_6x_fields |= fields.contains_key("type") || fields.contains_key("meta");
            }
            Ok(if has_6x_fields {
                RegistryFormat::Flat6x
            } else {
                RegistryFormat::Flat5x
            })
        }
        _ => Err(Error::unsupported(
            path,
            "expected a JSON object or array of states",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::identity::FileIdentity;
    use crate::registry::state::FileState;

    fn config(dir: &tempfile::TempDir) -> RegistryConfig {
        RegistryConfig::with_data_path(dir.path())
    }

    const FLAT_5X: &str = r#"[{"source":"/var/log/a.log","offset":10,
        "timestamp":"2017-01-01T00:00:00Z","ttl":-1,
        "FileStateOS":{"inode":1,"device":2}}]"#;

    #[test]
    fn test_detect_empty() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let detected = Migrator::new(&config).detect().unwrap();
        assert_eq!(detected.format, RegistryFormat::Empty);
        assert_eq!(Migrator::new(&config).run().unwrap(), None);
    }

    #[test]
    fn test_detect_flat_variants() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let root = config.root();

        fs::write(&root, r#"{"/a":{"offset":1,"FileStateOS":{"inode":1,"device":1}}}"#).unwrap();
        assert_eq!(Migrator::new(&config).detect().unwrap().format, RegistryFormat::Flat1x);

        fs::write(&root, FLAT_5X).unwrap();
        assert_eq!(Migrator::new(&config).detect().unwrap().format, RegistryFormat::Flat5x);

        fs::write(
            &root,
            r#"[{"source":"/a","offset":1,"type":"log","meta":null,
                 "FileStateOS":{"inode":1,"device":1}}]"#,
        )
        .unwrap();
        assert_eq!(Migrator::new(&config).detect().unwrap().format, RegistryFormat::Flat6x);
    }

    #[test]
    fn test_unknown_formats_are_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        let root = config.root();

        fs::write(&root, "42").unwrap();
        assert!(matches!(
            Migrator::new(&config).detect(),
            Err(Error::UnsupportedFormat { .. })
        ));

        fs::write(&root, "[1, 2]").unwrap();
        assert!(matches!(
            Migrator::new(&config).detect(),
            Err(Error::UnsupportedFormat { .. })
        ));

        fs::write(&root, "Hello World").unwrap();
        assert!(matches!(
            Migrator::new(&config).detect(),
            Err(Error::Corrupt { .. })
        ));

        fs::remove_file(&root).unwrap();
        fs::create_dir_all(config.store_dir()).unwrap();
        fs::write(config.meta_file(), r#"{"version":"7"}"#).unwrap();
        assert!(matches!(
            Migrator::new(&config).detect(),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_run_migrates_flat_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        fs::write(config.root(), FLAT_5X).unwrap();

        let migrated = Migrator::new(&config).run().unwrap();
        assert_eq!(migrated, Some(RegistryFormat::Flat5x));

        assert!(config.root().is_dir());
        assert!(!config.legacy_backup().exists());
        assert_eq!(
            Migrator::new(&config).detect().unwrap().format,
            RegistryFormat::Current
        );

        let states = persistence::read_states(&config.data_file()).unwrap();
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].identity, FileIdentity::new(2, 1));
        assert_eq!(states[0].offset, 10);

        // Second run is a no-op
        assert_eq!(Migrator::new(&config).run().unwrap(), None);
    }

    #[test]
    fn test_migrate_is_pure_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry");
        fs::write(&path, FLAT_5X).unwrap();

        let first = migrate(&path).unwrap();
        let second = migrate(&path).unwrap();
        assert_eq!(first.format, RegistryFormat::Flat5x);
        assert_eq!(first.states, second.states);
        assert_eq!(fs::read_to_string(&path).unwrap(), FLAT_5X);
    }

    #[test]
    fn test_resume_interrupted_migration() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);

        // Crash after parking the flat file, before meta.json was written
        fs::write(config.legacy_backup(), FLAT_5X).unwrap();
        fs::create_dir_all(config.store_dir()).unwrap();

        let detected = Migrator::new(&config).detect().unwrap();
        assert_eq!(detected.format, RegistryFormat::Flat5x);
        assert_eq!(detected.path, config.legacy_backup());

        assert_eq!(
            Migrator::new(&config).run().unwrap(),
            Some(RegistryFormat::Flat5x)
        );
        assert!(!config.legacy_backup().exists());
        assert_eq!(persistence::read_states(&config.data_file()).unwrap().len(), 1);
    }

    #[test]
    fn test_directory_v0_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        fs::create_dir_all(config.store_dir()).unwrap();
        fs::write(config.meta_file(), r#"{"version":"0"}"#).unwrap();
        fs::write(
            config.data_file(),
            r#"[{"source":"/var/log/a.log","offset":42,"timestamp":"2019-05-01T00:00:00Z",
                 "ttl":-1,"type":"log","meta":null,"FileStateOS":{"inode":8,"device":3}}]"#,
        )
        .unwrap();

        assert_eq!(
            Migrator::new(&config).run().unwrap(),
            Some(RegistryFormat::Directory0)
        );
        assert_eq!(
            read_meta(&config.meta_file()).unwrap(),
            Some(MetaFile::current())
        );

        let states = persistence::read_states(&config.data_file()).unwrap();
        assert_eq!(
            states,
            vec![FileState {
                identity: FileIdentity::new(3, 8),
                source: "/var/log/a.log".to_string(),
                offset: 42,
                timestamp: "2019-05-01T00:00:00Z".parse().unwrap(),
                ttl: crate::registry::state::Ttl::Never,
            }]
        );
    }

    #[test]
    fn test_data_without_meta_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(&dir);
        fs::create_dir_all(config.store_dir()).unwrap();
        fs::write(config.data_file(), "[]").unwrap();

        assert!(matches!(
            Migrator::new(&config).detect(),
            Err(Error::UnsupportedFormat { .. })
        ));
    }
}
