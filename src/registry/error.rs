// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Error loading state from {path:?}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Unsupported registry format at {path:?}: {reason}")]
    UnsupportedFormat { path: PathBuf, reason: String },

    #[error("Registry file path is not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Registry lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn corrupt(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::Corrupt {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unsupported(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Error::UnsupportedFormat {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for Error {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        Error::Poisoned
    }
}
