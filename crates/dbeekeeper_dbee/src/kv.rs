//! In-memory key/value dbee.

use crate::command::Command;
use crate::config::DbeeConfig;
use crate::engine::Dbee;
use crate::phase::{Phase, PhaseCell, PhaseGuard};
use crate::snapshot;
use dbeekeeper_core::{Callback, ClientError, DbeeError, KeeperResult, Transaction};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tracing::{debug, info, warn};

/// The key/value table held by a [`KvDbee`].
pub type Table = BTreeMap<String, String>;

/// Reference dbee: a string table driven by [`Command`] transactions.
///
/// The table is copy-on-write. A snapshot captures the table as of the
/// `snapshot` call by cloning the `Arc`, so executions that follow copy the
/// table once and never block on the writer thread.
#[derive(Debug)]
pub struct KvDbee {
    config: DbeeConfig,
    table: Arc<Table>,
    phase: PhaseCell,
}

impl KvDbee {
    /// Creates an empty dbee.
    #[must_use]
    pub fn new(config: DbeeConfig) -> Self {
        Self {
            config,
            table: Arc::new(Table::new()),
            phase: PhaseCell::new(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &DbeeConfig {
        &self.config
    }

    /// Returns the value stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.table.get(key).map(String::as_str)
    }

    /// Returns the number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Returns the whole table.
    #[must_use]
    pub fn table(&self) -> &Table {
        &self.table
    }

    fn apply(&mut self, command: Command) -> KeeperResult<()> {
        if let Some(key) = command.key() {
            if key.len() > self.config.max_key_len {
                return Err(ClientError::InvalidTransaction(format!(
                    "key of {} bytes exceeds limit of {}",
                    key.len(),
                    self.config.max_key_len
                ))
                .into());
            }
        }

        match command {
            Command::Set { key, value } => {
                if let Some(capacity) = self.config.max_entries {
                    if !self.table.contains_key(&key) && self.table.len() >= capacity {
                        return Err(DbeeError::StorageFull { capacity }.into());
                    }
                }
                Arc::make_mut(&mut self.table).insert(key, value);
            }
            Command::Delete { key } => {
                if self.table.contains_key(&key) {
                    Arc::make_mut(&mut self.table).remove(&key);
                }
            }
            Command::Clear => {
                if !self.table.is_empty() {
                    self.table = Arc::new(Table::new());
                }
            }
        }
        Ok(())
    }
}

impl Default for KvDbee {
    fn default() -> Self {
        Self::new(DbeeConfig::default())
    }
}

impl Dbee for KvDbee {
    fn execute(&mut self, transaction: &Transaction) -> KeeperResult<()> {
        let command = Command::try_from(transaction)?;
        self.apply(command)
    }

    fn snapshot(&mut self, path: &Path, callback: Callback<PathBuf>) {
        let path = path.to_path_buf();
        let guard = match self.phase.try_begin(Phase::Snapshotting) {
            Ok(guard) => guard,
            Err(busy) => {
                debug!(path = %path.display(), "snapshot rejected: {busy}");
                let result: KeeperResult<PathBuf> = Err(busy.into());
                // Rejections still complete off the caller's thread.
                if let Err(e) = thread::Builder::new()
                    .name("dbee-snapshot".into())
                    .spawn(move || callback(result))
                {
                    warn!("failed to spawn snapshot thread: {e}");
                }
                return;
            }
        };

        let table = Arc::clone(&self.table);
        let sync = self.config.sync_snapshots;
        let slot = Arc::new(Mutex::new(Some((callback, guard))));
        let worker_slot = Arc::clone(&slot);
        let target = path.clone();

        let spawned = thread::Builder::new()
            .name("dbee-snapshot".into())
            .spawn(move || {
                let Some((callback, guard)) = worker_slot.lock().take() else {
                    return;
                };
                let result = write_snapshot(&target, &table, sync, guard);
                callback(result.map(|()| target).map_err(Into::into));
            });

        if let Err(e) = spawned {
            if let Some((callback, guard)) = slot.lock().take() {
                drop(guard);
                callback(Err(DbeeError::Io(e).into()));
            }
        }
    }

    fn restore(&mut self, path: &Path) -> KeeperResult<()> {
        let _guard = self.phase.try_begin(Phase::Restoring)?;
        let (metadata, table) = snapshot::read_file(path)?;
        self.table = Arc::new(table);
        info!(
            path = %path.display(),
            entries = metadata.entry_count,
            "restored dbee from snapshot"
        );
        Ok(())
    }

    fn phase(&self) -> Phase {
        self.phase.get()
    }
}

/// Writes `table` and releases the phase before the caller is notified.
fn write_snapshot(
    path: &Path,
    table: &Table,
    sync: bool,
    guard: PhaseGuard,
) -> Result<(), DbeeError> {
    let result = snapshot::write_file(path, table, sync);
    drop(guard);
    match result {
        Ok(metadata) => {
            info!(
                path = %path.display(),
                entries = metadata.entry_count,
                bytes = metadata.size,
                "wrote dbee snapshot"
            );
            Ok(())
        }
        Err(e) => {
            warn!(path = %path.display(), "snapshot failed: {e}");
            Err(e)
        }
    }
}
