//! Durable coordination substrate trait definition.

use dbeekeeper_core::{ClientId, DbeelogError, DbeelogId, LogEntry, Transaction, TransactionId};
use std::time::Duration;
use thiserror::Error;

/// Result type for substrate operations.
pub type SubstrateResult<T> = Result<T, SubstrateError>;

/// Errors reported by a substrate.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubstrateError {
    /// The substrate cannot be reached.
    #[error("substrate unavailable: {0}")]
    Unavailable(String),

    /// A read started below the truncation floor.
    #[error("read from {requested} but log starts at {first}")]
    Truncated {
        /// Requested start.
        requested: TransactionId,
        /// Oldest retained id.
        first: TransactionId,
    },

    /// A versioned write lost a race.
    #[error("version conflict on checkpoint of {client_id}: expected {expected:?}, found {actual:?}")]
    VersionConflict {
        /// Client whose checkpoint node was written.
        client_id: ClientId,
        /// Version the writer expected.
        expected: Option<u64>,
        /// Version actually stored.
        actual: Option<u64>,
    },
}

impl From<SubstrateError> for DbeelogError {
    fn from(e: SubstrateError) -> Self {
        match e {
            SubstrateError::Unavailable(message) => DbeelogError::Unavailable(message),
            other => DbeelogError::Substrate(other.to_string()),
        }
    }
}

/// The readable range of a log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LogBounds {
    /// Oldest id still readable. Everything below it has been truncated.
    pub first: TransactionId,
    /// Id the next append will receive.
    pub next: TransactionId,
}

impl LogBounds {
    /// Bounds of a log nothing has been appended to.
    pub const EMPTY: Self = Self {
        first: TransactionId(1),
        next: TransactionId(1),
    };

    /// Returns the id of the most recent append, or `ORIGIN` for an empty log.
    #[must_use]
    pub fn last(&self) -> TransactionId {
        TransactionId(self.next.0 - 1)
    }
}

/// A stored checkpoint node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    /// Client owning the checkpoint.
    pub client_id: ClientId,
    /// Highest transaction id the client has durably captured.
    pub transaction_id: TransactionId,
    /// Per-node version, incremented on every write.
    pub version: u64,
    /// Substrate-wide modification order of the last write.
    pub modified: u64,
}

/// An ordered, durable append + notify service.
///
/// Dbeelogs treat the substrate purely as an external collaborator. Any
/// service that offers the guarantees below is interchangeable.
///
/// # Invariants
///
/// - `append` assigns ids linearizably across every caller: 1, 2, 3, ...
///   with no gaps and no reuse
/// - `read` returns entries in id order and fails with
///   [`SubstrateError::Truncated`] when asked for an id below the floor
/// - `truncate_before` never lowers the floor
/// - `put_checkpoint` is a compare-and-set on the node version
/// - `register_subscriber` supersedes every earlier subscriber of the same
///   client, across handles
///
/// # Implementors
///
/// - [`crate::MemorySubstrate`] - in-process, for tests and single-host setups
pub trait Substrate: Send + Sync {
    /// Durably appends a transaction and returns its id.
    fn append(
        &self,
        log: &DbeelogId,
        client_id: &ClientId,
        transaction: &Transaction,
    ) -> SubstrateResult<TransactionId>;

    /// Reads up to `limit` entries with ids `>= from`.
    fn read(
        &self,
        log: &DbeelogId,
        from: TransactionId,
        limit: usize,
    ) -> SubstrateResult<Vec<LogEntry>>;

    /// Returns the readable range of the log.
    fn bounds(&self, log: &DbeelogId) -> SubstrateResult<LogBounds>;

    /// Blocks until an entry with id `>= next` exists or `timeout` elapses.
    ///
    /// Returns whether such an entry exists.
    fn wait_for_append(
        &self,
        log: &DbeelogId,
        next: TransactionId,
        timeout: Duration,
    ) -> SubstrateResult<bool>;

    /// Returns every stored checkpoint node.
    fn checkpoints(&self, log: &DbeelogId) -> SubstrateResult<Vec<CheckpointRecord>>;

    /// Writes a checkpoint node if its version still matches `expected_version`.
    ///
    /// `None` means the node must not exist yet.
    fn put_checkpoint(
        &self,
        log: &DbeelogId,
        client_id: &ClientId,
        transaction_id: TransactionId,
        expected_version: Option<u64>,
    ) -> SubstrateResult<CheckpointRecord>;

    /// Discards every entry with an id below `floor`.
    ///
    /// Returns the number of entries removed.
    fn truncate_before(&self, log: &DbeelogId, floor: TransactionId) -> SubstrateResult<usize>;

    /// Replaces the subscriber node of `client_id` and returns its
    /// generation.
    ///
    /// Generations of one client start at 1 and only grow, whichever handle
    /// registers them.
    fn register_subscriber(&self, log: &DbeelogId, client_id: &ClientId) -> SubstrateResult<u64>;

    /// Returns the generation of the live subscriber node of `client_id`, or
    /// 0 if the client never subscribed.
    fn subscriber_generation(&self, log: &DbeelogId, client_id: &ClientId)
        -> SubstrateResult<u64>;
}
