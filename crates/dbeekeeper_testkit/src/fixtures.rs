//! Dbeelog fixtures and polling helpers.
//!
//! Helpers here panic on failure, which is what tests want.

use dbeekeeper_core::{completion, KeeperResult, LogEntry, StartAt, Transaction, TransactionId};
use dbeekeeper_log::{CheckpointMap, Dbeelog, LogConfig, MemorySubstrate, TransactionLog};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// How long [`wait_for`] polls before failing the test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(10);

/// Deliveries gathered by [`collect`].
pub type Deliveries = Arc<Mutex<Vec<KeeperResult<LogEntry>>>>;

/// Several dbeelog clients sharing one in-memory substrate.
pub struct LogCluster {
    substrate: Arc<MemorySubstrate>,
    dbeelog_id: String,
    min_checkpoints: usize,
}

impl LogCluster {
    /// Creates a cluster whose clients use the given checkpoint quorum.
    pub fn new(min_checkpoints: usize) -> Self {
        Self {
            substrate: Arc::new(MemorySubstrate::new()),
            dbeelog_id: "testlog".to_string(),
            min_checkpoints,
        }
    }

    /// Returns the shared substrate.
    pub fn substrate(&self) -> &Arc<MemorySubstrate> {
        &self.substrate
    }

    /// Returns the configuration a client of this cluster uses.
    pub fn config(&self, client: &str) -> LogConfig {
        LogConfig::new(self.dbeelog_id.as_str(), client)
            .with_min_checkpoints(self.min_checkpoints)
            .with_read_batch(16)
            .with_poll_interval(Duration::from_millis(5))
    }

    /// Opens a client handle.
    pub fn client(&self, client: &str) -> Arc<Dbeelog<MemorySubstrate>> {
        let log = Dbeelog::open(self.config(client), Arc::clone(&self.substrate))
            .expect("Failed to open dbeelog");
        Arc::new(log)
    }

    /// Returns the number of entries the substrate still holds.
    pub fn retained(&self) -> usize {
        self.substrate.retained(&self.dbeelog_id.as_str().into())
    }
}

/// Creates a temporary snapshot directory, removed when dropped.
pub fn temp_snapshot_dir() -> TempDir {
    TempDir::new().expect("Failed to create temp directory")
}

/// Appends a transaction and waits for its id.
pub fn append(log: &(impl TransactionLog + ?Sized), payload: &str) -> TransactionId {
    let (callback, done) = completion();
    log.append(Transaction::new(payload), callback);
    done.wait().expect("append failed")
}

/// Checkpoints and waits for the outcome.
pub fn checkpoint(log: &(impl TransactionLog + ?Sized), id: u64) -> KeeperResult<TransactionId> {
    let (callback, done) = completion();
    log.checkpoint(TransactionId::new(id), callback);
    done.wait()
}

/// Returns the retained checkpoints.
pub fn checkpoints(log: &(impl TransactionLog + ?Sized)) -> CheckpointMap {
    let (callback, done) = completion();
    log.get_checkpoints(callback);
    done.wait().expect("get_checkpoints failed")
}

/// Subscribes and gathers every delivery into a shared vector.
pub fn collect(log: &(impl TransactionLog + ?Sized), start: StartAt) -> Deliveries {
    let seen: Deliveries = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    log.subscribe(start, Box::new(move |delivery| sink.lock().push(delivery)))
        .expect("subscribe failed");
    seen
}

/// Returns the ids of the successful deliveries.
pub fn delivered_ids(seen: &Deliveries) -> Vec<u64> {
    seen.lock()
        .iter()
        .filter_map(|d| d.as_ref().ok().map(|e| e.id.as_u64()))
        .collect()
}

/// Polls `done` until it holds, failing the test after [`WAIT_TIMEOUT`].
pub fn wait_for(what: &str, mut done: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_TIMEOUT;
    while !done() {
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(2));
    }
}
