//! Snapshot files on local disk.
//!
//! Each snapshot is named for the last transaction it holds:
//! `snapshot-<id, 20 digits>.dbee`. Zero padding keeps lexical and numeric
//! order identical. Files that do not match the pattern, including
//! in-progress `.tmp` files, are ignored.

use dbeekeeper_core::{DbeeError, TransactionId};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const PREFIX: &str = "snapshot-";
const SUFFIX: &str = ".dbee";

/// A snapshot found in the catalog.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotFile {
    /// Last transaction held by the snapshot.
    pub id: TransactionId,
    /// Location of the file.
    pub path: PathBuf,
}

/// Index of the snapshots in one directory.
#[derive(Debug, Clone)]
pub struct SnapshotCatalog {
    dir: PathBuf,
}

impl SnapshotCatalog {
    /// Creates a catalog over `dir`. The directory need not exist yet.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Returns the catalog directory.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Creates the catalog directory if needed.
    pub fn create_dir(&self) -> Result<(), DbeeError> {
        fs::create_dir_all(&self.dir)?;
        Ok(())
    }

    /// Returns where the snapshot for `id` is stored.
    #[must_use]
    pub fn path_for(&self, id: TransactionId) -> PathBuf {
        self.dir.join(format!("{PREFIX}{:020}{SUFFIX}", id.as_u64()))
    }

    /// Lists snapshots, newest first.
    pub fn list(&self) -> Result<Vec<SnapshotFile>, DbeeError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut snapshots = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            if let Some(id) = name.to_str().and_then(parse_name) {
                snapshots.push(SnapshotFile {
                    id,
                    path: entry.path(),
                });
            }
        }
        snapshots.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(snapshots)
    }

    /// Returns the newest snapshot.
    pub fn latest(&self) -> Result<Option<SnapshotFile>, DbeeError> {
        Ok(self.list()?.into_iter().next())
    }
}

fn parse_name(name: &str) -> Option<TransactionId> {
    let digits = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    if digits.len() != 20 || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok().map(TransactionId::new)
}
