//! In-memory coordination substrate.

use crate::substrate::{CheckpointRecord, LogBounds, Substrate, SubstrateError, SubstrateResult};
use dbeekeeper_core::{ClientId, DbeelogId, LogEntry, Transaction, TransactionId};
use parking_lot::{Condvar, Mutex};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Per-log state held by the substrate.
#[derive(Debug)]
struct LogState {
    /// Retained entries; `entries[i].id == bounds.first + i`.
    entries: VecDeque<LogEntry>,
    bounds: LogBounds,
    checkpoints: BTreeMap<ClientId, CheckpointRecord>,
    /// Live subscriber generation per client.
    subscribers: HashMap<ClientId, u64>,
}

impl LogState {
    fn new() -> Self {
        Self {
            entries: VecDeque::new(),
            bounds: LogBounds::EMPTY,
            checkpoints: BTreeMap::new(),
            subscribers: HashMap::new(),
        }
    }
}

#[derive(Debug)]
struct Inner {
    logs: HashMap<DbeelogId, LogState>,
    /// Substrate-wide modification counter.
    modified: u64,
}

impl Inner {
    fn log(&mut self, id: &DbeelogId) -> &mut LogState {
        self.logs.entry(id.clone()).or_insert_with(LogState::new)
    }
}

/// An in-memory substrate.
///
/// This substrate keeps every log in process memory and is suitable for:
/// - Unit and integration tests
/// - Several replicas living in one process
///
/// Logs are created on first use. Every operation goes through one mutex,
/// which makes appends and checkpoint writes linearizable.
///
/// # Example
///
/// ```rust
/// use dbeekeeper_core::{ClientId, DbeelogId, Transaction, TransactionId};
/// use dbeekeeper_log::{MemorySubstrate, Substrate};
///
/// let substrate = MemorySubstrate::new();
/// let log = DbeelogId::new("orders");
/// let id = substrate
///     .append(&log, &ClientId::new("a"), &Transaction::new("set k v"))
///     .unwrap();
/// assert_eq!(id, TransactionId::new(1));
/// ```
#[derive(Debug)]
pub struct MemorySubstrate {
    inner: Mutex<Inner>,
    appended: Condvar,
    available: AtomicBool,
}

impl MemorySubstrate {
    /// Creates an empty substrate.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                logs: HashMap::new(),
                modified: 0,
            }),
            appended: Condvar::new(),
            available: AtomicBool::new(true),
        }
    }

    /// Simulates losing or regaining the connection to the substrate.
    ///
    /// While unavailable every operation fails with
    /// [`SubstrateError::Unavailable`].
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
        // Wake watchers so they observe the outage.
        self.appended.notify_all();
    }

    /// Returns whether the substrate is reachable.
    #[must_use]
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::SeqCst)
    }

    /// Returns the number of retained entries in a log.
    #[must_use]
    pub fn retained(&self, log: &DbeelogId) -> usize {
        self.inner
            .lock()
            .logs
            .get(log)
            .map_or(0, |state| state.entries.len())
    }

    fn check_available(&self) -> SubstrateResult<()> {
        if self.is_available() {
            Ok(())
        } else {
            Err(SubstrateError::Unavailable(
                "in-memory substrate is offline".into(),
            ))
        }
    }
}

impl Default for MemorySubstrate {
    fn default() -> Self {
        Self::new()
    }
}

impl Substrate for MemorySubstrate {
    fn append(
        &self,
        log: &DbeelogId,
        client_id: &ClientId,
        transaction: &Transaction,
    ) -> SubstrateResult<TransactionId> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let state = inner.log(log);
        let id = state.bounds.next;
        state.entries.push_back(LogEntry {
            id,
            client_id: client_id.clone(),
            transaction: transaction.clone(),
        });
        state.bounds.next = id.next();
        drop(inner);
        self.appended.notify_all();
        Ok(id)
    }

    fn read(
        &self,
        log: &DbeelogId,
        from: TransactionId,
        limit: usize,
    ) -> SubstrateResult<Vec<LogEntry>> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let state = inner.log(log);
        if from < state.bounds.first {
            return Err(SubstrateError::Truncated {
                requested: from,
                first: state.bounds.first,
            });
        }
        let skip = (from.as_u64() - state.bounds.first.as_u64()) as usize;
        Ok(state
            .entries
            .iter()
            .skip(skip)
            .take(limit)
            .cloned()
            .collect())
    }

    fn bounds(&self, log: &DbeelogId) -> SubstrateResult<LogBounds> {
        self.check_available()?;
        Ok(self.inner.lock().log(log).bounds)
    }

    fn wait_for_append(
        &self,
        log: &DbeelogId,
        next: TransactionId,
        timeout: Duration,
    ) -> SubstrateResult<bool> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            self.check_available()?;
            if inner.log(log).bounds.next > next {
                return Ok(true);
            }
            if self.appended.wait_until(&mut inner, deadline).timed_out() {
                self.check_available()?;
                return Ok(inner.log(log).bounds.next > next);
            }
        }
    }

    fn checkpoints(&self, log: &DbeelogId) -> SubstrateResult<Vec<CheckpointRecord>> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .log(log)
            .checkpoints
            .values()
            .cloned()
            .collect())
    }

    fn put_checkpoint(
        &self,
        log: &DbeelogId,
        client_id: &ClientId,
        transaction_id: TransactionId,
        expected_version: Option<u64>,
    ) -> SubstrateResult<CheckpointRecord> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        inner.modified += 1;
        let modified = inner.modified;
        let state = inner.log(log);

        let actual = state.checkpoints.get(client_id).map(|r| r.version);
        if actual != expected_version {
            return Err(SubstrateError::VersionConflict {
                client_id: client_id.clone(),
                expected: expected_version,
                actual,
            });
        }

        let record = CheckpointRecord {
            client_id: client_id.clone(),
            transaction_id,
            version: actual.map_or(0, |v| v + 1),
            modified,
        };
        state.checkpoints.insert(client_id.clone(), record.clone());
        Ok(record)
    }

    fn truncate_before(&self, log: &DbeelogId, floor: TransactionId) -> SubstrateResult<usize> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let state = inner.log(log);
        // Never truncate past the end of the log or below the current floor.
        let floor = floor.min(state.bounds.next);
        if floor <= state.bounds.first {
            return Ok(0);
        }
        let removed = (floor.as_u64() - state.bounds.first.as_u64()) as usize;
        state.entries.drain(..removed);
        state.bounds.first = floor;
        Ok(removed)
    }

    fn register_subscriber(&self, log: &DbeelogId, client_id: &ClientId) -> SubstrateResult<u64> {
        self.check_available()?;
        let mut inner = self.inner.lock();
        let generation = inner
            .log(log)
            .subscribers
            .entry(client_id.clone())
            .or_insert(0);
        *generation += 1;
        Ok(*generation)
    }

    fn subscriber_generation(
        &self,
        log: &DbeelogId,
        client_id: &ClientId,
    ) -> SubstrateResult<u64> {
        self.check_available()?;
        Ok(self
            .inner
            .lock()
            .log(log)
            .subscribers
            .get(client_id)
            .copied()
            .unwrap_or(0))
    }
}
