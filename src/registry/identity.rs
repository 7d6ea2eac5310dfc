// SPDX-License-Identifier: Apache-2.0

//! Path-independent identity of a tracked file.
//!
//! The registry keys every state by the device and inode of the file (volume
//! serial number and file index on Windows), so a state follows its file
//! through renames and rotations.

use serde::{Deserialize, Serialize};
use std::fs::{File, Metadata};
use std::io;
use std::path::Path;

/// Device + inode pair identifying a physical file.
///
/// On Unix systems, this is the device ID + inode number.
/// On Windows, this is the volume serial number + 64-bit file index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileIdentity {
    /// Device ID (Unix) or volume serial number (Windows)
    pub device: u64,
    /// Inode number (Unix) or file index (Windows)
    pub inode: u64,
}

impl FileIdentity {
    pub fn new(device: u64, inode: u64) -> Self {
        Self { device, inode }
    }

    /// Identity from the metadata of an already opened file.
    #[cfg(unix)]
    pub fn from_metadata(metadata: &Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;

        Self {
            device: metadata.dev(),
            inode: metadata.ino(),
        }
    }

    /// Identity of an open file handle.
    #[cfg(unix)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        Ok(Self::from_metadata(&file.metadata()?))
    }

    /// Identity of an open file handle.
    #[cfg(windows)]
    pub fn from_file(file: &File) -> io::Result<Self> {
        use std::os::windows::io::AsRawHandle;
        use windows_sys::Win32::Foundation::HANDLE;
        use windows_sys::Win32::Storage::FileSystem::{
            BY_HANDLE_FILE_INFORMATION, GetFileInformationByHandle,
        };

        let handle = file.as_raw_handle() as HANDLE;
        let mut info: BY_HANDLE_FILE_INFORMATION = unsafe { std::mem::zeroed() };

        let result = unsafe { GetFileInformationByHandle(handle, &mut info) };
        if result == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Self::from_windows_parts(
            info.nFileIndexHigh,
            info.nFileIndexLow,
            info.dwVolumeSerialNumber,
        ))
    }

    /// Identity of the file currently found at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = File::open(path)?;
        Self::from_file(&file)
    }

    /// Folds the Windows triple (file index high/low, volume serial) into the
    /// two logical fields.
    pub fn from_windows_parts(idx_hi: u32, idx_lo: u32, vol: u32) -> Self {
        Self {
            device: vol as u64,
            inode: ((idx_hi as u64) << 32) | idx_lo as u64,
        }
    }
}

impl std::fmt::Display for FileIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.inode, self.device)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_identity_same_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(b"test content").unwrap();
        file.flush().unwrap();

        let id1 = FileIdentity::from_path(file.path()).unwrap();
        let id2 = FileIdentity::from_file(&file.reopen().unwrap()).unwrap();

        assert_eq!(id1, id2);
        assert!(id1.device > 0 || id1.inode > 0);
    }

    #[test]
    fn test_identity_different_files() {
        let file1 = NamedTempFile::new().unwrap();
        let file2 = NamedTempFile::new().unwrap();

        let id1 = FileIdentity::from_path(file1.path()).unwrap();
        let id2 = FileIdentity::from_path(file2.path()).unwrap();

        assert_ne!(id1, id2);
    }

    #[test]
    fn test_identity_stable_across_rename() {
        let dir = tempfile::tempdir().unwrap();
        let original = dir.path().join("app.log");
        let rotated = dir.path().join("app.log.1");
        std::fs::write(&original, b"line\n").unwrap();

        let before = FileIdentity::from_path(&original).unwrap();
        std::fs::rename(&original, &rotated).unwrap();
        let after = FileIdentity::from_path(&rotated).unwrap();

        assert_eq!(before, after);
    }

    #[test]
    fn test_windows_parts() {
        let id = FileIdentity::from_windows_parts(1, 2, 77);
        assert_eq!(id.device, 77);
        assert_eq!(id.inode, (1u64 << 32) | 2);
    }

    #[test]
    fn test_identity_display() {
        let id = FileIdentity::new(123, 456);
        assert_eq!(id.to_string(), "456-123");
    }
}
