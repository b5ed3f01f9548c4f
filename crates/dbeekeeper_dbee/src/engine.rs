//! The dbee contract.

use crate::phase::Phase;
use dbeekeeper_core::{Callback, KeeperResult, Transaction};
use std::path::{Path, PathBuf};

/// A local state machine that applies transactions from a dbeelog.
///
/// # Access
///
/// A dbee is driven by exactly one logical thread of control. Every
/// operation takes `&mut self`, so the handle cannot be shared between
/// concurrent callers; callers that need shared access wrap it in their own
/// serializing owner. Implementations perform no locking between `execute`
/// calls.
///
/// # Transactions
///
/// Transactions must be idempotent. Snapshots are fuzzy: a snapshot holds
/// every transaction executed before `snapshot` was called, and may or may
/// not hold transactions executed while it is being written. Recovery
/// therefore replays every transaction since the snapshot's baseline.
///
/// # Implementors
///
/// - [`crate::KvDbee`] - in-memory key/value engine
pub trait Dbee: Send {
    /// Applies one transaction synchronously.
    ///
    /// This does not persist the transaction; the caller keeps it in the
    /// dbeelog until a snapshot covers it.
    ///
    /// # Errors
    ///
    /// - [`dbeekeeper_core::ClientError`] for malformed or invalid
    ///   transactions. State is unaffected.
    /// - [`dbeekeeper_core::DbeeError`] for storage faults. These are fatal:
    ///   the caller must recover.
    fn execute(&mut self, transaction: &Transaction) -> KeeperResult<()>;

    /// Starts writing a snapshot to `path` without blocking.
    ///
    /// The callback is invoked exactly once from a background thread with
    /// the snapshot's path or the error. A snapshot or restore already in
    /// flight makes the request fail with
    /// [`dbeekeeper_core::ClientError::Busy`].
    fn snapshot(&mut self, path: &Path, callback: Callback<PathBuf>);

    /// Replaces the whole state with the contents of a snapshot.
    ///
    /// Blocks until the restore is complete.
    ///
    /// # Errors
    ///
    /// - [`dbeekeeper_core::DbeeError`] if the snapshot is unreadable or
    ///   corrupt
    /// - [`dbeekeeper_core::ClientError::Busy`] while a snapshot is in flight
    fn restore(&mut self, path: &Path) -> KeeperResult<()>;

    /// Returns whether a snapshot or restore is in flight.
    fn phase(&self) -> Phase;
}

impl<D: Dbee + ?Sized> Dbee for Box<D> {
    fn execute(&mut self, transaction: &Transaction) -> KeeperResult<()> {
        (**self).execute(transaction)
    }

    fn snapshot(&mut self, path: &Path, callback: Callback<PathBuf>) {
        (**self).snapshot(path, callback);
    }

    fn restore(&mut self, path: &Path) -> KeeperResult<()> {
        (**self).restore(path)
    }

    fn phase(&self) -> Phase {
        (**self).phase()
    }
}
