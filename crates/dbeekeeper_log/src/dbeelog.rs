//! The transaction log contract and its substrate-backed implementation.

use crate::checkpoint::retain;
use crate::config::{LogConfig, MIN_POLL_INTERVAL};
use crate::subscription::{Delivery, Receiver, SubscriptionSlot};
use crate::substrate::{Substrate, SubstrateError};
use dbeekeeper_core::{
    Callback, ClientError, ClientId, DbeelogError, DbeelogId, KeeperError, KeeperResult,
    StartAt, Transaction, TransactionId,
};
use std::collections::BTreeMap;
use std::sync::mpsc::{self, Sender};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Retained checkpoints, keyed by client.
pub type CheckpointMap = BTreeMap<ClientId, TransactionId>;

/// A distributed, append-only transaction log.
///
/// One handle belongs to one client. Asynchronous operations never return
/// errors directly: every outcome, success or failure, goes through the
/// callback, which is invoked exactly once and never on the caller's stack.
pub trait TransactionLog: Send + Sync {
    /// The log instance this handle belongs to.
    fn dbeelog_id(&self) -> &DbeelogId;

    /// The client owning this handle.
    fn client_id(&self) -> &ClientId;

    /// Number of client checkpoints required before truncation.
    fn min_checkpoints(&self) -> usize;

    /// Appends a transaction and reports the id it was assigned.
    ///
    /// Appends from every client of the log serialize into one linear order.
    fn append(&self, transaction: Transaction, callback: Callback<TransactionId>);

    /// Registers this client's single live subscription.
    ///
    /// Every transaction at or after `start` is delivered in strictly
    /// increasing id order from one thread. A later call supersedes this one:
    /// once it returns, the previous receiver gets no further deliveries.
    ///
    /// # Errors
    ///
    /// - [`ClientError::Truncated`] if `start` is below the truncation floor
    /// - [`ClientError::UnknownTransaction`] if `start` is past the log end
    /// - [`DbeelogError`] if the substrate is unavailable
    fn subscribe(&self, start: StartAt, receiver: Receiver) -> KeeperResult<()>;

    /// Records that this client has durably captured every transaction up to
    /// and including `transaction_id`.
    ///
    /// Checkpoints never move backwards; a lower id fails with
    /// [`ClientError::CheckpointRegression`] and leaves the stored value alone.
    fn checkpoint(&self, transaction_id: TransactionId, callback: Callback<TransactionId>);

    /// Reports the currently retained checkpoints.
    fn get_checkpoints(&self, callback: Callback<CheckpointMap>);
}

impl From<SubstrateError> for KeeperError {
    fn from(e: SubstrateError) -> Self {
        match e {
            SubstrateError::Truncated { requested, first } => ClientError::Truncated {
                requested,
                first_retained: first,
            }
            .into(),
            other => DbeelogError::from(other).into(),
        }
    }
}

/// Work handed to the log's worker thread.
enum Request {
    Append {
        transaction: Transaction,
        callback: Callback<TransactionId>,
    },
    Checkpoint {
        transaction_id: TransactionId,
        callback: Callback<TransactionId>,
    },
    GetCheckpoints {
        callback: Callback<CheckpointMap>,
    },
}

impl Request {
    /// Completes the request with an error without running it.
    fn fail(self, error: DbeelogError) {
        match self {
            Request::Append { callback, .. } | Request::Checkpoint { callback, .. } => {
                callback(Err(error.into()))
            }
            Request::GetCheckpoints { callback } => callback(Err(error.into())),
        }
    }
}

/// State shared between the handle and its worker.
struct Shared<S: ?Sized> {
    config: LogConfig,
    substrate: Arc<S>,
}

impl<S: Substrate + ?Sized> Shared<S> {
    fn serve(&self, request: Request) {
        match request {
            Request::Append {
                transaction,
                callback,
            } => callback(self.append(&transaction)),
            Request::Checkpoint {
                transaction_id,
                callback,
            } => callback(self.checkpoint(transaction_id)),
            Request::GetCheckpoints { callback } => callback(self.get_checkpoints()),
        }
    }

    fn append(&self, transaction: &Transaction) -> KeeperResult<TransactionId> {
        let id = self.substrate.append(
            &self.config.dbeelog_id,
            &self.config.client_id,
            transaction,
        )?;
        debug!(client = %self.config.client_id, txn = %id, "appended transaction");
        Ok(id)
    }

    fn checkpoint(&self, transaction_id: TransactionId) -> KeeperResult<TransactionId> {
        let log = &self.config.dbeelog_id;
        let client = &self.config.client_id;

        let bounds = self.substrate.bounds(log)?;
        if transaction_id > bounds.last() {
            return Err(ClientError::UnknownTransaction(transaction_id).into());
        }

        loop {
            let records = self.substrate.checkpoints(log)?;
            let current = records.iter().find(|r| &r.client_id == client);
            if let Some(current) = current {
                if transaction_id < current.transaction_id {
                    return Err(ClientError::CheckpointRegression {
                        current: current.transaction_id,
                        requested: transaction_id,
                    }
                    .into());
                }
                if transaction_id == current.transaction_id {
                    return Ok(transaction_id);
                }
            }

            let expected = current.map(|r| r.version);
            match self
                .substrate
                .put_checkpoint(log, client, transaction_id, expected)
            {
                Ok(_) => break,
                Err(SubstrateError::VersionConflict { .. }) => {
                    debug!(client = %client, "checkpoint raced, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        debug!(client = %client, txn = %transaction_id, "checkpointed");
        // The checkpoint is stored; the next one recomputes the floor.
        if let Err(e) = self.truncate() {
            warn!(
                client = %client,
                txn = %transaction_id,
                "truncation after checkpoint failed: {e}"
            );
        }
        Ok(transaction_id)
    }

    /// Discards entries below the floor of the retained checkpoints.
    fn truncate(&self) -> KeeperResult<()> {
        let log = &self.config.dbeelog_id;
        let records = self.substrate.checkpoints(log)?;
        let retention = retain(&records, self.config.min_checkpoints);
        if let Some(floor) = retention.floor {
            let removed = self.substrate.truncate_before(log, floor)?;
            if removed > 0 {
                info!(log = %log, floor = %floor, removed, "truncated dbeelog");
            }
        }
        Ok(())
    }

    fn get_checkpoints(&self) -> KeeperResult<CheckpointMap> {
        let records = self.substrate.checkpoints(&self.config.dbeelog_id)?;
        Ok(retain(&records, self.config.min_checkpoints).to_map())
    }
}

/// A dbeelog handle backed by a [`Substrate`].
///
/// The handle runs one worker thread that serializes this client's appends,
/// checkpoints and checkpoint queries and invokes their callbacks. Each
/// subscription gets its own delivery thread.
///
/// # Example
///
/// ```rust
/// use dbeekeeper_core::{completion, Transaction, TransactionId};
/// use dbeekeeper_log::{Dbeelog, LogConfig, MemorySubstrate, TransactionLog};
/// use std::sync::Arc;
///
/// let substrate = Arc::new(MemorySubstrate::new());
/// let log = Dbeelog::open(LogConfig::new("orders", "replica-1"), substrate).unwrap();
///
/// let (callback, done) = completion();
/// log.append(Transaction::new("set k v"), callback);
/// assert_eq!(done.wait().unwrap(), TransactionId::new(1));
/// ```
pub struct Dbeelog<S: Substrate + ?Sized + 'static> {
    shared: Arc<Shared<S>>,
    requests: Option<Sender<Request>>,
    worker: Option<JoinHandle<()>>,
    slot: Arc<SubscriptionSlot>,
}

impl<S: Substrate + ?Sized + 'static> Dbeelog<S> {
    /// Opens a handle on a substrate.
    ///
    /// # Errors
    ///
    /// Returns [`DbeelogError::Substrate`] if `min_checkpoints` is zero or the
    /// worker thread cannot be started.
    pub fn open(config: LogConfig, substrate: Arc<S>) -> Result<Self, DbeelogError> {
        if config.min_checkpoints == 0 {
            return Err(DbeelogError::Substrate(
                "min_checkpoints must be at least 1".into(),
            ));
        }

        let shared = Arc::new(Shared { config, substrate });
        let (tx, rx) = mpsc::channel::<Request>();
        let worker_shared = Arc::clone(&shared);
        let worker = thread::Builder::new()
            .name(format!("dbeelog-{}-worker", shared.config.client_id))
            .spawn(move || {
                for request in rx {
                    worker_shared.serve(request);
                }
            })
            .map_err(|e| DbeelogError::Substrate(format!("failed to start worker: {e}")))?;

        Ok(Self {
            shared,
            requests: Some(tx),
            worker: Some(worker),
            slot: Arc::new(SubscriptionSlot::default()),
        })
    }

    /// Returns the handle's configuration.
    pub fn config(&self) -> &LogConfig {
        &self.shared.config
    }

    /// Returns the substrate backing this handle.
    pub fn substrate(&self) -> &Arc<S> {
        &self.shared.substrate
    }

    fn submit(&self, request: Request) {
        match &self.requests {
            Some(tx) => {
                if let Err(mpsc::SendError(request)) = tx.send(request) {
                    request.fail(DbeelogError::Closed);
                }
            }
            None => request.fail(DbeelogError::Closed),
        }
    }
}

impl<S: Substrate + ?Sized + 'static> TransactionLog for Dbeelog<S> {
    fn dbeelog_id(&self) -> &DbeelogId {
        &self.shared.config.dbeelog_id
    }

    fn client_id(&self) -> &ClientId {
        &self.shared.config.client_id
    }

    fn min_checkpoints(&self) -> usize {
        self.shared.config.min_checkpoints
    }

    fn append(&self, transaction: Transaction, callback: Callback<TransactionId>) {
        self.submit(Request::Append {
            transaction,
            callback,
        });
    }

    fn subscribe(&self, start: StartAt, receiver: Receiver) -> KeeperResult<()> {
        let config = &self.shared.config;
        let bounds = self.shared.substrate.bounds(&config.dbeelog_id)?;

        let cursor = match start {
            StartAt::Tail => bounds.next,
            StartAt::From(requested) => {
                let cursor = requested.max(TransactionId::new(1));
                if cursor < bounds.first {
                    return Err(ClientError::Truncated {
                        requested,
                        first_retained: bounds.first,
                    }
                    .into());
                }
                if cursor > bounds.next {
                    return Err(ClientError::UnknownTransaction(requested).into());
                }
                cursor
            }
        };

        // Holding the gate keeps this handle's current receiver from firing
        // between the two registrations.
        let (generation, node) = {
            let _gate = self.slot.lock();
            let node = self
                .shared
                .substrate
                .register_subscriber(&config.dbeelog_id, &config.client_id)?;
            (self.slot.register(), node)
        };
        if node > 1 {
            debug!(client = %config.client_id, generation = node, "replacing subscription");
        }

        Delivery {
            substrate: Arc::clone(&self.shared.substrate),
            log: config.dbeelog_id.clone(),
            client_id: config.client_id.clone(),
            slot: Arc::clone(&self.slot),
            generation,
            node,
            cursor,
            read_batch: config.read_batch,
            poll_interval: config.poll_interval.max(MIN_POLL_INTERVAL),
            receiver,
        }
        .spawn()
        .map_err(|e| DbeelogError::Substrate(format!("failed to start delivery: {e}")))?;
        Ok(())
    }

    fn checkpoint(&self, transaction_id: TransactionId, callback: Callback<TransactionId>) {
        self.submit(Request::Checkpoint {
            transaction_id,
            callback,
        });
    }

    fn get_checkpoints(&self, callback: Callback<CheckpointMap>) {
        self.submit(Request::GetCheckpoints { callback });
    }
}

impl<S: Substrate + ?Sized + 'static> Drop for Dbeelog<S> {
    fn drop(&mut self) {
        self.slot.invalidate();
        // Closing the channel lets the worker drain queued requests and exit.
        drop(self.requests.take());
        if let Some(worker) = self.worker.take() {
            if worker.thread().id() != thread::current().id() && worker.join().is_err() {
                warn!(client = %self.shared.config.client_id, "dbeelog worker panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemorySubstrate;
    use crate::substrate::{CheckpointRecord, LogBounds, SubstrateResult};
    use dbeekeeper_core::{completion, LogEntry};
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Memory substrate with injectable checkpoint races and truncation
    /// failures.
    #[derive(Default)]
    struct Interfering {
        inner: MemorySubstrate,
        /// Checkpoint another writer stores just before the next put.
        competing: Mutex<Option<TransactionId>>,
        conflicts: AtomicUsize,
        fail_truncate: AtomicBool,
    }

    impl Substrate for Interfering {
        fn append(
            &self,
            log: &DbeelogId,
            client_id: &ClientId,
            transaction: &Transaction,
        ) -> SubstrateResult<TransactionId> {
            self.inner.append(log, client_id, transaction)
        }

        fn read(
            &self,
            log: &DbeelogId,
            from: TransactionId,
            limit: usize,
        ) -> SubstrateResult<Vec<LogEntry>> {
            self.inner.read(log, from, limit)
        }

        fn bounds(&self, log: &DbeelogId) -> SubstrateResult<LogBounds> {
            self.inner.bounds(log)
        }

        fn wait_for_append(
            &self,
            log: &DbeelogId,
            next: TransactionId,
            timeout: Duration,
        ) -> SubstrateResult<bool> {
            self.inner.wait_for_append(log, next, timeout)
        }

        fn checkpoints(&self, log: &DbeelogId) -> SubstrateResult<Vec<CheckpointRecord>> {
            self.inner.checkpoints(log)
        }

        fn put_checkpoint(
            &self,
            log: &DbeelogId,
            client_id: &ClientId,
            transaction_id: TransactionId,
            expected_version: Option<u64>,
        ) -> SubstrateResult<CheckpointRecord> {
            if let Some(competing) = self.competing.lock().take() {
                self.inner
                    .put_checkpoint(log, client_id, competing, expected_version)?;
            }
            let result = self
                .inner
                .put_checkpoint(log, client_id, transaction_id, expected_version);
            if matches!(result, Err(SubstrateError::VersionConflict { .. })) {
                self.conflicts.fetch_add(1, Ordering::SeqCst);
            }
            result
        }

        fn truncate_before(&self, log: &DbeelogId, floor: TransactionId) -> SubstrateResult<usize> {
            if self.fail_truncate.load(Ordering::SeqCst) {
                return Err(SubstrateError::Unavailable("truncate refused".into()));
            }
            self.inner.truncate_before(log, floor)
        }

        fn register_subscriber(&self, log: &DbeelogId, client_id: &ClientId) -> SubstrateResult<u64> {
            self.inner.register_subscriber(log, client_id)
        }

        fn subscriber_generation(
            &self,
            log: &DbeelogId,
            client_id: &ClientId,
        ) -> SubstrateResult<u64> {
            self.inner.subscriber_generation(log, client_id)
        }
    }

    fn open_interfering(substrate: &Arc<Interfering>, client: &str) -> Dbeelog<Interfering> {
        let config = LogConfig::new("test", client).with_min_checkpoints(1);
        Dbeelog::open(config, Arc::clone(substrate)).unwrap()
    }

    fn open(substrate: &Arc<MemorySubstrate>, client: &str, min: usize) -> Dbeelog<MemorySubstrate> {
        let config = LogConfig::new("test", client)
            .with_min_checkpoints(min)
            .with_poll_interval(Duration::from_millis(5));
        Dbeelog::open(config, Arc::clone(substrate)).unwrap()
    }

    fn append(log: &impl TransactionLog, payload: &str) -> TransactionId {
        let (callback, done) = completion();
        log.append(Transaction::new(payload), callback);
        done.wait().unwrap()
    }

    fn checkpoint(log: &impl TransactionLog, id: u64) -> KeeperResult<TransactionId> {
        let (callback, done) = completion();
        log.checkpoint(TransactionId::new(id), callback);
        done.wait()
    }

    fn checkpoints(log: &impl TransactionLog) -> CheckpointMap {
        let (callback, done) = completion();
        log.get_checkpoints(callback);
        done.wait().unwrap()
    }

    #[test]
    fn rejects_zero_quorum() {
        let substrate = Arc::new(MemorySubstrate::new());
        let config = LogConfig::new("test", "a").with_min_checkpoints(0);
        assert!(Dbeelog::open(config, substrate).is_err());
    }

    #[test]
    fn append_returns_sequential_ids() {
        let substrate = Arc::new(MemorySubstrate::new());
        let a = open(&substrate, "a", 1);
        let b = open(&substrate, "b", 1);
        assert_eq!(append(&a, "one"), TransactionId::new(1));
        assert_eq!(append(&b, "two"), TransactionId::new(2));
        assert_eq!(append(&a, "three"), TransactionId::new(3));
    }

    #[test]
    fn append_reports_unavailable_substrate() {
        let substrate = Arc::new(MemorySubstrate::new());
        let log = open(&substrate, "a", 1);
        substrate.set_available(false);

        let (callback, done) = completion();
        log.append(Transaction::new("x"), callback);
        let err = done.wait().unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            err,
            KeeperError::Dbeelog(DbeelogError::Unavailable(_))
        ));
    }

    #[test]
    fn checkpoint_is_monotone() {
        let substrate = Arc::new(MemorySubstrate::new());
        let log = open(&substrate, "a", 3);
        for i in 0..5 {
            append(&log, &format!("t{i}"));
        }

        assert_eq!(checkpoint(&log, 4).unwrap(), TransactionId::new(4));
        assert_eq!(checkpoint(&log, 4).unwrap(), TransactionId::new(4));

        let err = checkpoint(&log, 2).unwrap_err();
        assert_eq!(
            err.as_client_error(),
            Some(&ClientError::CheckpointRegression {
                current: TransactionId::new(4),
                requested: TransactionId::new(2),
            })
        );
        assert_eq!(checkpoints(&log)[&ClientId::new("a")], TransactionId::new(4));
    }

    #[test]
    fn checkpoint_past_log_end_is_rejected() {
        let substrate = Arc::new(MemorySubstrate::new());
        let log = open(&substrate, "a", 1);
        append(&log, "t");
        let err = checkpoint(&log, 2).unwrap_err();
        assert!(err.is_client_error());
        assert!(checkpoints(&log).is_empty());
    }

    #[test]
    fn no_truncation_below_quorum() {
        let substrate = Arc::new(MemorySubstrate::new());
        let a = open(&substrate, "a", 3);
        let b = open(&substrate, "b", 3);
        for i in 0..10 {
            append(&a, &format!("t{i}"));
        }
        checkpoint(&a, 9).unwrap();
        checkpoint(&b, 10).unwrap();
        assert_eq!(substrate.retained(a.dbeelog_id()), 10);
    }

    #[test]
    fn truncates_below_quorum_floor() {
        let substrate = Arc::new(MemorySubstrate::new());
        let logs: Vec<_> = (1..=5)
            .map(|i| open(&substrate, &format!("client{i}"), 3))
            .collect();
        for i in 0..8 {
            append(&logs[0], &format!("t{i}"));
        }

        for (log, id) in logs.iter().zip([5, 1, 3, 6, 4]) {
            checkpoint(log, id).unwrap();
        }

        let bounds = substrate.bounds(logs[0].dbeelog_id()).unwrap();
        assert_eq!(bounds.first, TransactionId::new(4));

        let map = checkpoints(&logs[0]);
        assert_eq!(map.len(), 3);
        assert_eq!(map[&ClientId::new("client1")], TransactionId::new(5));
        assert_eq!(map[&ClientId::new("client4")], TransactionId::new(6));
        assert_eq!(map[&ClientId::new("client5")], TransactionId::new(4));
    }

    #[test]
    fn checkpoint_retries_after_a_lost_race() {
        let substrate = Arc::new(Interfering::default());
        let log = open_interfering(&substrate, "a");
        for i in 0..6 {
            append(&log, &format!("t{i}"));
        }
        checkpoint(&log, 2).unwrap();

        *substrate.competing.lock() = Some(TransactionId::new(3));
        assert_eq!(checkpoint(&log, 5).unwrap(), TransactionId::new(5));
        assert_eq!(substrate.conflicts.load(Ordering::SeqCst), 1);
        assert_eq!(checkpoints(&log)[&ClientId::new("a")], TransactionId::new(5));
    }

    #[test]
    fn checkpoint_overtaken_during_a_race_is_a_regression() {
        let substrate = Arc::new(Interfering::default());
        let log = open_interfering(&substrate, "a");
        for i in 0..6 {
            append(&log, &format!("t{i}"));
        }

        *substrate.competing.lock() = Some(TransactionId::new(6));
        let err = checkpoint(&log, 4).unwrap_err();
        assert_eq!(
            err.as_client_error(),
            Some(&ClientError::CheckpointRegression {
                current: TransactionId::new(6),
                requested: TransactionId::new(4),
            })
        );
        assert_eq!(substrate.conflicts.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn failed_truncation_keeps_the_checkpoint() {
        let substrate = Arc::new(Interfering::default());
        let log = open_interfering(&substrate, "a");
        for i in 0..6 {
            append(&log, &format!("t{i}"));
        }

        substrate.fail_truncate.store(true, Ordering::SeqCst);
        assert_eq!(checkpoint(&log, 4).unwrap(), TransactionId::new(4));
        assert_eq!(checkpoints(&log)[&ClientId::new("a")], TransactionId::new(4));
        assert_eq!(substrate.inner.retained(log.dbeelog_id()), 6);

        // The next checkpoint truncates up to its own floor.
        substrate.fail_truncate.store(false, Ordering::SeqCst);
        checkpoint(&log, 5).unwrap();
        assert_eq!(substrate.bounds(log.dbeelog_id()).unwrap().first, TransactionId::new(5));
    }

    #[test]
    fn subscribe_rejects_truncated_and_future_ranges() {
        let substrate = Arc::new(MemorySubstrate::new());
        let log = open(&substrate, "a", 1);
        for i in 0..5 {
            append(&log, &format!("t{i}"));
        }
        checkpoint(&log, 3).unwrap();

        let err = log
            .subscribe(StartAt::From(TransactionId::new(2)), Box::new(|_| {}))
            .unwrap_err();
        assert_eq!(
            err.as_client_error(),
            Some(&ClientError::Truncated {
                requested: TransactionId::new(2),
                first_retained: TransactionId::new(3),
            })
        );

        let err = log
            .subscribe(StartAt::From(TransactionId::new(9)), Box::new(|_| {}))
            .unwrap_err();
        assert!(err.is_client_error());

        assert!(log
            .subscribe(StartAt::From(TransactionId::new(3)), Box::new(|_| {}))
            .is_ok());
    }

    #[test]
    fn subscribe_reports_unavailable_substrate() {
        let substrate = Arc::new(MemorySubstrate::new());
        let log = open(&substrate, "a", 1);
        substrate.set_available(false);
        let err = log.subscribe(StartAt::Tail, Box::new(|_| {})).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn closed_request_fails_with_closed() {
        let (callback, done) = completion::<TransactionId>();
        Request::Append {
            transaction: Transaction::new("x"),
            callback,
        }
        .fail(DbeelogError::Closed);
        assert!(matches!(
            done.wait(),
            Err(KeeperError::Dbeelog(DbeelogError::Closed))
        ));
    }
}
