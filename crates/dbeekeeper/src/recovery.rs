//! Restore, resubscribe, replay and periodic snapshotting for one replica.

use crate::catalog::SnapshotCatalog;
use crate::config::KeeperConfig;
use dbeekeeper_core::{
    completion, Completion, DbeeError, DbeelogError, KeeperError, KeeperResult, LogEntry, StartAt,
    Transaction, TransactionId,
};
use dbeekeeper_dbee::Dbee;
use dbeekeeper_log::TransactionLog;
use std::path::PathBuf;
use std::sync::mpsc::{self, RecvTimeoutError, TryRecvError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Counters describing a coordinator's work so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeeperStats {
    /// Transactions executed successfully.
    pub applied: u64,
    /// Transactions the dbee rejected with a client error.
    pub rejected: u64,
    /// Completed recoveries, including the initial one.
    pub recoveries: u64,
    /// Snapshots written.
    pub snapshots: u64,
    /// Checkpoints acknowledged by the dbeelog.
    pub checkpoints: u64,
}

struct PendingSnapshot {
    id: TransactionId,
    done: Completion<PathBuf>,
}

struct PendingCheckpoint {
    id: TransactionId,
    done: Completion<TransactionId>,
}

/// Keeps one dbee in step with a dbeelog.
///
/// The coordinator owns the dbee, so every `execute`, `snapshot` and
/// `restore` happens on the thread driving the coordinator. Subscription
/// deliveries are queued on a channel and applied by [`pump`].
///
/// Recovery restores the newest readable snapshot and subscribes from the id
/// it embeds. The snapshot's own transaction is delivered again, which is
/// harmless because transactions are idempotent.
///
/// The dbee handed to [`new`] must be empty: on a cold start with no
/// snapshot on disk, its state becomes the baseline at
/// [`TransactionId::ORIGIN`].
///
/// [`pump`]: RecoveryCoordinator::pump
/// [`new`]: RecoveryCoordinator::new
pub struct RecoveryCoordinator<D: Dbee, L: TransactionLog + ?Sized> {
    config: KeeperConfig,
    catalog: SnapshotCatalog,
    dbee: D,
    log: Arc<L>,
    deliveries: Option<mpsc::Receiver<KeeperResult<LogEntry>>>,
    last_applied: TransactionId,
    since_snapshot: u64,
    failures: u32,
    pending_snapshot: Option<PendingSnapshot>,
    pending_checkpoints: Vec<PendingCheckpoint>,
    stats: KeeperStats,
}

impl<D: Dbee, L: TransactionLog + ?Sized> RecoveryCoordinator<D, L> {
    /// Creates a coordinator. Nothing is restored until [`Self::recover`].
    pub fn new(config: KeeperConfig, dbee: D, log: Arc<L>) -> Self {
        let catalog = SnapshotCatalog::new(&config.snapshot_dir);
        Self {
            config,
            catalog,
            dbee,
            log,
            deliveries: None,
            last_applied: TransactionId::ORIGIN,
            since_snapshot: 0,
            failures: 0,
            pending_snapshot: None,
            pending_checkpoints: Vec::new(),
            stats: KeeperStats::default(),
        }
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &KeeperConfig {
        &self.config
    }

    /// Returns the snapshot catalog.
    #[must_use]
    pub fn catalog(&self) -> &SnapshotCatalog {
        &self.catalog
    }

    /// Returns the dbee.
    #[must_use]
    pub fn dbee(&self) -> &D {
        &self.dbee
    }

    /// Returns the dbeelog handle.
    #[must_use]
    pub fn log(&self) -> &Arc<L> {
        &self.log
    }

    /// Returns the highest transaction id applied to the dbee.
    #[must_use]
    pub fn last_applied(&self) -> TransactionId {
        self.last_applied
    }

    /// Returns work counters.
    #[must_use]
    pub fn stats(&self) -> KeeperStats {
        self.stats
    }

    /// Consumes the coordinator and returns the dbee.
    ///
    /// An in-flight snapshot keeps running in the background.
    pub fn into_dbee(self) -> D {
        self.dbee
    }

    /// Appends a transaction through the dbeelog.
    ///
    /// The transaction reaches the dbee when a later [`Self::pump`] delivers
    /// it.
    pub fn submit(&self, transaction: Transaction) -> Completion<TransactionId> {
        let (callback, done) = completion();
        self.log.append(transaction, callback);
        done
    }

    /// Restores the newest readable snapshot and subscribes from its id.
    ///
    /// Returns the id the dbee was restored to. Snapshots that fail to
    /// restore with a fatal dbee error are skipped in favour of older ones.
    ///
    /// # Errors
    ///
    /// - [`DbeeError`] if no snapshot can be restored
    /// - The subscription error if the dbeelog refuses the range (for
    ///   example because it was truncated past every local snapshot)
    pub fn recover(&mut self) -> KeeperResult<TransactionId> {
        self.deliveries = None;
        self.finish_pending_snapshot();
        self.catalog.create_dir()?;

        let mut snapshots = self.catalog.list()?;
        if snapshots.is_empty() && self.stats.recoveries == 0 {
            self.write_baseline()?;
            snapshots = self.catalog.list()?;
        }

        let mut restored = None;
        for snapshot in snapshots {
            match self.dbee.restore(&snapshot.path) {
                Ok(()) => {
                    restored = Some(snapshot.id);
                    break;
                }
                Err(e) if e.is_fatal() => {
                    warn!(
                        path = %snapshot.path.display(),
                        "skipping unrestorable snapshot: {e}"
                    );
                }
                Err(e) => return Err(e),
            }
        }
        let id = restored.ok_or_else(|| {
            DbeeError::Storage(format!(
                "no restorable snapshot in {}",
                self.catalog.dir().display()
            ))
        })?;

        let (tx, rx) = mpsc::channel::<KeeperResult<LogEntry>>();
        self.log.subscribe(
            StartAt::From(id),
            Box::new(move |delivery| {
                // The coordinator drops the receiver when it resubscribes.
                let _ = tx.send(delivery);
            }),
        )?;

        self.deliveries = Some(rx);
        self.last_applied = id;
        self.since_snapshot = 0;
        self.stats.recoveries += 1;
        info!(
            client = %self.log.client_id(),
            txn = %id,
            "recovered dbee, replaying dbeelog"
        );
        Ok(id)
    }

    /// Applies delivered transactions.
    ///
    /// Blocks for up to `timeout` waiting for the first delivery, then
    /// applies whatever else is already queued. Returns the number of
    /// deliveries handled. Calls [`Self::recover`] first if the coordinator
    /// is not subscribed.
    ///
    /// Client errors from the dbee are logged and skipped. Fatal dbee errors
    /// trigger recovery, up to `max_recovery_attempts` times in a row.
    ///
    /// # Errors
    ///
    /// - The terminal error that ended the subscription. The coordinator is
    ///   then unsubscribed; the next call recovers.
    /// - The fatal dbee error that exhausted the recovery attempts
    /// - A fatal error from a checkpoint
    pub fn pump(&mut self, timeout: Duration) -> KeeperResult<usize> {
        if self.deliveries.is_none() {
            self.recover()?;
        }
        self.poll_background()?;

        let mut handled = 0;
        let mut wait = Some(timeout);
        loop {
            let Some(rx) = self.deliveries.as_ref() else {
                break;
            };
            let delivery = match wait.take() {
                Some(timeout) => match rx.recv_timeout(timeout) {
                    Ok(delivery) => delivery,
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return Err(self.closed()),
                },
                None => match rx.try_recv() {
                    Ok(delivery) => delivery,
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => return Err(self.closed()),
                },
            };

            match delivery {
                Ok(entry) => self.apply(&entry)?,
                Err(e) => {
                    self.deliveries = None;
                    error!(client = %self.log.client_id(), "subscription ended: {e}");
                    return Err(e);
                }
            }
            handled += 1;
        }

        self.poll_background()?;
        Ok(handled)
    }

    /// Pumps until `target` has been applied.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn run_until(&mut self, target: TransactionId, timeout: Duration) -> KeeperResult<bool> {
        let deadline = Instant::now() + timeout;
        while self.last_applied < target {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            self.pump((deadline - now).min(Duration::from_millis(50)))?;
        }
        Ok(true)
    }

    /// Starts a snapshot at the last applied id.
    ///
    /// Returns false without doing anything if a snapshot is already in
    /// flight.
    pub fn snapshot_now(&mut self) -> KeeperResult<bool> {
        self.poll_background()?;
        if self.pending_snapshot.is_some() {
            return Ok(false);
        }
        self.start_snapshot();
        Ok(true)
    }

    /// Waits for the in-flight snapshot and checkpoints to complete.
    ///
    /// Returns false if `timeout` elapsed first.
    pub fn flush(&mut self, timeout: Duration) -> KeeperResult<bool> {
        let deadline = Instant::now() + timeout;
        loop {
            self.poll_background()?;
            if self.pending_snapshot.is_none() && self.pending_checkpoints.is_empty() {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            thread::sleep((deadline - now).min(Duration::from_millis(2)));
        }
    }

    fn apply(&mut self, entry: &LogEntry) -> KeeperResult<()> {
        match self.dbee.execute(&entry.transaction) {
            Ok(()) => {
                self.stats.applied += 1;
                self.failures = 0;
            }
            Err(e) if e.is_client_error() => {
                warn!(
                    client = %self.log.client_id(),
                    txn = %entry.id,
                    appender = %entry.client_id,
                    "dbee rejected transaction: {e}"
                );
                self.stats.rejected += 1;
            }
            Err(e) => {
                error!(client = %self.log.client_id(), txn = %entry.id, "fatal dbee error: {e}");
                return self.recover_from(e);
            }
        }

        if entry.id > self.last_applied {
            self.last_applied = entry.id;
        }
        self.since_snapshot += 1;
        if self.config.snapshot_every > 0
            && self.since_snapshot >= self.config.snapshot_every
            && self.pending_snapshot.is_none()
        {
            self.start_snapshot();
        }
        Ok(())
    }

    fn recover_from(&mut self, cause: KeeperError) -> KeeperResult<()> {
        self.failures += 1;
        if self.failures > self.config.max_recovery_attempts {
            error!(
                client = %self.log.client_id(),
                attempts = self.config.max_recovery_attempts,
                "giving up on recovery"
            );
            return Err(cause);
        }
        self.recover().map(|_| ())
    }

    fn start_snapshot(&mut self) {
        let id = self.last_applied;
        let path = self.catalog.path_for(id);
        let (callback, done) = completion();
        debug!(client = %self.log.client_id(), txn = %id, "starting snapshot");
        self.dbee.snapshot(&path, callback);
        self.pending_snapshot = Some(PendingSnapshot { id, done });
        self.since_snapshot = 0;
    }

    fn write_baseline(&mut self) -> KeeperResult<()> {
        let path = self.catalog.path_for(TransactionId::ORIGIN);
        let (callback, done) = completion();
        self.dbee.snapshot(&path, callback);
        done.wait()?;
        self.stats.snapshots += 1;
        info!(path = %path.display(), "wrote baseline snapshot");
        Ok(())
    }

    /// Blocks until the in-flight snapshot, if any, completes.
    ///
    /// Used before a restore, which a running snapshot would block. A failed
    /// snapshot needs no further handling since recovery is already under
    /// way.
    fn finish_pending_snapshot(&mut self) {
        if let Some(pending) = self.pending_snapshot.take() {
            let result = pending.done.wait();
            if let Some(e) = self.snapshot_finished(pending.id, result) {
                warn!(txn = %pending.id, "discarding failed snapshot: {e}");
            }
        }
    }

    fn poll_background(&mut self) -> KeeperResult<()> {
        if let Some(result) = self
            .pending_snapshot
            .as_ref()
            .and_then(|pending| pending.done.try_result())
        {
            if let Some(pending) = self.pending_snapshot.take() {
                if let Some(e) = self.snapshot_finished(pending.id, result) {
                    self.recover_from(e)?;
                }
            }
        }

        let mut fatal = None;
        let client = self.log.client_id().clone();
        let stats = &mut self.stats;
        self.pending_checkpoints.retain(|pending| match pending.done.try_result() {
            None => true,
            Some(Ok(id)) => {
                stats.checkpoints += 1;
                debug!(client = %client, txn = %id, "checkpoint acknowledged");
                false
            }
            Some(Err(e)) if e.is_client_error() => {
                warn!(client = %client, txn = %pending.id, "checkpoint rejected: {e}");
                false
            }
            Some(Err(e)) => {
                fatal.get_or_insert(e);
                false
            }
        });
        match fatal {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    /// Checkpoints a completed snapshot. Returns the error of a snapshot
    /// that failed fatally.
    fn snapshot_finished(
        &mut self,
        id: TransactionId,
        result: KeeperResult<PathBuf>,
    ) -> Option<KeeperError> {
        match result {
            Ok(path) => {
                self.stats.snapshots += 1;
                debug!(path = %path.display(), txn = %id, "snapshot complete, checkpointing");
                let (callback, done) = completion();
                self.log.checkpoint(id, callback);
                self.pending_checkpoints.push(PendingCheckpoint { id, done });
                None
            }
            Err(e) if e.is_client_error() => {
                warn!(txn = %id, "snapshot rejected: {e}");
                None
            }
            Err(e) => {
                error!(txn = %id, "snapshot failed: {e}");
                Some(e)
            }
        }
    }

    fn closed(&mut self) -> KeeperError {
        self.deliveries = None;
        DbeelogError::Closed.into()
    }
}
