// SPDX-License-Identifier: Apache-2.0

use std::collections::HashSet;
use std::path::PathBuf;

use glob::{Pattern, glob};
use tracing::debug;

use crate::registry::error::{Error, Result};

/// Finds regular files matching the include globs and none of the excludes
#[derive(Debug, Clone)]
pub struct FileFinder {
    include: Vec<String>,
    exclude: Vec<Pattern>,
}

impl FileFinder {
    /// Patterns are validated here so a typo fails at startup, not on the
    /// first scan.
    pub fn new(include: Vec<String>, exclude: Vec<String>) -> Result<Self> {
        for pattern in &include {
            Pattern::new(pattern).map_err(|e| Error::InvalidGlob(format!("{}: {}", pattern, e)))?;
        }
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { include, exclude })
    }

    /// Current matches, in glob order, without duplicates.
    pub fn find_files(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut paths = Vec::new();

        for pattern in &self.include {
            let matches = glob(pattern).map_err(|e| Error::InvalidGlob(e.to_string()))?;

            for entry in matches {
                let path = match entry {
                    Ok(path) => path,
                    // Unreadable directory entries are skipped, not fatal
                    Err(e) => {
                        debug!("Skipping unreadable path during scan: {}", e);
                        continue;
                    }
                };

                if !path.is_file() {
                    continue;
                }
                if self.exclude.iter().any(|p| p.matches_path(&path)) {
                    continue;
                }
                if seen.insert(path.clone()) {
                    paths.push(path);
                }
            }
        }

        Ok(paths)
    }
}
