// SPDX-License-Identifier: Apache-2.0

//! Crash-safe file replacement.
//!
//! Data is written to a sibling temp file, synced, renamed over the target and
//! the parent directory is synced, so a reader sees either the previous or the
//! new complete file.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use portable_atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::registry::error::{Error, Result};

const TEMP_MARKER: &str = ".tmp.";

/// Replace `path` with `bytes` atomically, applying `permissions` (Unix mode
/// bits) to the new file.
pub fn atomic_write(path: &Path, bytes: &[u8], permissions: u32) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create directory {:?}: {}", parent, e))
            })?;
        }
    }

    // pid + counter keeps concurrent writers in one process apart
    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = temp_path_for(path, std::process::id(), unique_id);

    if let Err(e) = write_synced(&temp_path, bytes, permissions) {
        discard(&temp_path);
        return Err(e);
    }

    if let Err(e) = fs::rename(&temp_path, path) {
        discard(&temp_path);
        return Err(Error::Persistence(format!(
            "failed to rename {:?} to {:?}: {}",
            temp_path, path, e
        )));
    }

    sync_parent_dir(path);
    Ok(())
}

fn write_synced(temp_path: &Path, bytes: &[u8], permissions: u32) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(permissions);
    }

    let mut file = options.open(temp_path).map_err(|e| {
        Error::Persistence(format!("failed to create temp file {:?}: {}", temp_path, e))
    })?;

    file.write_all(bytes)
        .map_err(|e| Error::Persistence(format!("failed to write {:?}: {}", temp_path, e)))?;

    // The creation mode is filtered by the umask; set it explicitly
    set_permissions(temp_path, permissions)?;

    file.sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync {:?}: {}", temp_path, e)))?;

    Ok(())
}

#[cfg(unix)]
pub fn set_permissions(path: &Path, permissions: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::set_permissions(path, fs::Permissions::from_mode(permissions)).map_err(|e| {
        Error::Persistence(format!(
            "failed to set permissions {:o} on {:?}: {}",
            permissions, path, e
        ))
    })
}

#[cfg(not(unix))]
pub fn set_permissions(_path: &Path, _permissions: u32) -> Result<()> {
    Ok(())
}

fn temp_path_for(path: &Path, pid: u32, unique_id: u64) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{}{}{}.{}", file_name, TEMP_MARKER, pid, unique_id))
}

fn discard(temp_path: &Path) {
    if temp_path.exists() {
        if let Err(e) = fs::remove_file(temp_path) {
            warn!("Failed to remove temp file {:?}: {}", temp_path, e);
        }
    }
}

// Without this the rename itself may not survive a power loss
#[cfg(unix)]
fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        match fs::File::open(parent) {
            Ok(dir) => {
                if let Err(e) = dir.sync_all() {
                    debug!("Failed to sync directory {:?}: {}", parent, e);
                }
            }
            Err(e) => debug!("Failed to open directory {:?} for sync: {}", parent, e),
        }
    }
}

#[cfg(not(unix))]
fn sync_parent_dir(_path: &Path) {}

/// Delete temp files left behind by a writer that died before its rename.
/// Returns how many were removed.
pub fn remove_stale_temp_files(path: &Path) -> Result<usize> {
    let (Some(dir), Some(file_name)) = (path.parent(), path.file_name()) else {
        return Ok(0);
    };
    if !dir.is_dir() {
        return Ok(0);
    }

    let prefix = format!("{}{}", file_name.to_string_lossy(), TEMP_MARKER);
    let mut removed = 0;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_name().to_string_lossy().starts_with(&prefix) {
            debug!("Removing stale temp file {:?}", entry.path());
            fs::remove_file(entry.path())?;
            removed += 1;
        }
    }
    Ok(removed)
}
