//! Fault injection for dbees.

use dbeekeeper_core::{Callback, DbeeError, KeeperResult, Transaction};
use dbeekeeper_dbee::{Dbee, Phase};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Faults armed on a [`FaultyDbee`].
///
/// Shared through an `Arc`, so a test can arm faults after handing the dbee
/// to a coordinator.
#[derive(Debug, Default)]
pub struct Faults {
    execute_trigger: Mutex<Option<String>>,
    restore_failures: AtomicUsize,
    injected: AtomicU64,
}

impl Faults {
    /// Fails the next execution of `payload` with a storage error.
    pub fn fail_execute_on(&self, payload: &str) {
        *self.execute_trigger.lock() = Some(payload.to_string());
    }

    /// Fails the next `count` restores with a corruption error.
    pub fn fail_restores(&self, count: usize) {
        self.restore_failures.store(count, Ordering::SeqCst);
    }

    /// Returns how many faults have fired.
    pub fn injected(&self) -> u64 {
        self.injected.load(Ordering::SeqCst)
    }

    fn take_execute(&self, transaction: &Transaction) -> bool {
        let mut trigger = self.execute_trigger.lock();
        if trigger.as_deref() == Some(transaction.as_str()) {
            *trigger = None;
            self.injected.fetch_add(1, Ordering::SeqCst);
            true
        } else {
            false
        }
    }

    fn take_restore(&self) -> bool {
        let fired = self
            .restore_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fired {
            self.injected.fetch_add(1, Ordering::SeqCst);
        }
        fired
    }
}

/// Wraps a dbee and injects one-shot fatal errors.
pub struct FaultyDbee<D> {
    inner: D,
    faults: Arc<Faults>,
}

impl<D: Dbee> FaultyDbee<D> {
    /// Wraps `inner` with no faults armed.
    pub fn new(inner: D) -> Self {
        Self {
            inner,
            faults: Arc::new(Faults::default()),
        }
    }

    /// Returns the shared fault switches.
    pub fn faults(&self) -> Arc<Faults> {
        Arc::clone(&self.faults)
    }

    /// Returns the wrapped dbee.
    pub fn inner(&self) -> &D {
        &self.inner
    }
}

impl<D: Dbee> Dbee for FaultyDbee<D> {
    fn execute(&mut self, transaction: &Transaction) -> KeeperResult<()> {
        if self.faults.take_execute(transaction) {
            return Err(DbeeError::Storage(format!("injected fault on {transaction:?}")).into());
        }
        self.inner.execute(transaction)
    }

    fn snapshot(&mut self, path: &Path, callback: Callback<PathBuf>) {
        self.inner.snapshot(path, callback);
    }

    fn restore(&mut self, path: &Path) -> KeeperResult<()> {
        if self.faults.take_restore() {
            let message = format!("injected fault restoring {}", path.display());
            return Err(DbeeError::corrupted(message).into());
        }
        self.inner.restore(path)
    }

    fn phase(&self) -> Phase {
        self.inner.phase()
    }
}
