//! Recovery coordinator configuration.

use std::path::{Path, PathBuf};

/// Configuration for a [`crate::RecoveryCoordinator`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeeperConfig {
    /// Directory holding this replica's snapshots.
    pub snapshot_dir: PathBuf,

    /// Applied transactions between periodic snapshots (0 = never).
    pub snapshot_every: u64,

    /// Consecutive fatal dbee errors tolerated before recovery gives up.
    pub max_recovery_attempts: u32,
}

impl KeeperConfig {
    /// Creates a configuration with default tuning.
    pub fn new(snapshot_dir: impl AsRef<Path>) -> Self {
        Self {
            snapshot_dir: snapshot_dir.as_ref().to_path_buf(),
            snapshot_every: 1000,
            max_recovery_attempts: 3,
        }
    }

    /// Sets how many applied transactions trigger a snapshot.
    #[must_use]
    pub const fn snapshot_every(mut self, transactions: u64) -> Self {
        self.snapshot_every = transactions;
        self
    }

    /// Sets how many consecutive recoveries may fail before giving up.
    #[must_use]
    pub const fn max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts;
        self
    }
}
