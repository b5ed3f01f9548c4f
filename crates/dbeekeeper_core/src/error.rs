//! Error taxonomy for dbeekeeper.
//!
//! There are exactly two kinds of failure:
//!
//! - [`ClientError`]: caller-attributable and non-fatal. The dbee and the
//!   dbeelog are left untouched and the caller may retry after correcting
//!   the request.
//! - [`DbeeError`] / [`DbeelogError`]: faults in the engine or in the
//!   replicated log. They are fatal to the local consistency assumption and
//!   must put the replica into recovery.
//!
//! [`KeeperError`] carries either kind. Conversions only ever go *into*
//! `KeeperError`; nothing turns a fatal error into a client error.

use crate::types::TransactionId;
use std::io;
use thiserror::Error;

/// Result type for dbeekeeper operations.
pub type KeeperResult<T> = Result<T, KeeperError>;

/// Non-fatal, caller-attributable errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The transaction could not be parsed.
    #[error("malformed transaction: {0}")]
    MalformedTransaction(String),

    /// The transaction parsed but is semantically invalid.
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    /// The requested range has already been truncated from the log.
    #[error("{requested} has been truncated, oldest retained is {first_retained}")]
    Truncated {
        /// The id the caller asked for.
        requested: TransactionId,
        /// The oldest id still held by the log.
        first_retained: TransactionId,
    },

    /// The transaction id has not been assigned by the log yet.
    #[error("unknown transaction {0}")]
    UnknownTransaction(TransactionId),

    /// A client tried to move its checkpoint backwards.
    #[error("checkpoint regression: already at {current}, requested {requested}")]
    CheckpointRegression {
        /// The stored checkpoint.
        current: TransactionId,
        /// The rejected checkpoint.
        requested: TransactionId,
    },

    /// A snapshot or restore is already in flight.
    #[error("cannot {requested} while {in_progress} is in progress")]
    Busy {
        /// The rejected operation.
        requested: &'static str,
        /// The operation holding the dbee.
        in_progress: &'static str,
    },
}

/// Fatal errors raised by a dbee.
#[derive(Debug, Error)]
pub enum DbeeError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Snapshot contents are corrupted or in an unknown format.
    #[error("snapshot corruption: {message}")]
    Corrupted {
        /// Description of the corruption.
        message: String,
    },

    /// Checksum mismatch detected while reading a snapshot.
    #[error("checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum.
        expected: u32,
        /// Computed checksum.
        actual: u32,
    },

    /// The storage layer ran out of space.
    #[error("storage full: capacity of {capacity} entries reached")]
    StorageFull {
        /// Configured capacity.
        capacity: usize,
    },

    /// Any other storage-layer fault.
    #[error("storage error: {0}")]
    Storage(String),

    /// Snapshot body could not be encoded or decoded.
    #[error("codec error: {0}")]
    Codec(String),
}

impl DbeeError {
    /// Creates a corruption error.
    pub fn corrupted(message: impl Into<String>) -> Self {
        Self::Corrupted {
            message: message.into(),
        }
    }
}

/// Fatal errors raised by a dbeelog.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DbeelogError {
    /// The coordination substrate cannot be reached.
    #[error("substrate unavailable: {0}")]
    Unavailable(String),

    /// The substrate rejected or failed an operation.
    #[error("substrate error: {0}")]
    Substrate(String),

    /// The dbeelog handle has shut down.
    #[error("dbeelog is closed")]
    Closed,
}

/// Classification of a [`KeeperError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Report to the caller; state is unaffected.
    Client,
    /// The local replica must recover.
    Fatal,
}

/// Any error surfaced by a dbeekeeper component.
#[derive(Debug, Error)]
pub enum KeeperError {
    /// Caller-attributable error.
    #[error(transparent)]
    Client(#[from] ClientError),

    /// Engine fault.
    #[error("dbee error: {0}")]
    Dbee(#[from] DbeeError),

    /// Log fault.
    #[error("dbeelog error: {0}")]
    Dbeelog(#[from] DbeelogError),

    /// The completion callback was dropped without being invoked.
    #[error("operation abandoned before completion")]
    Abandoned,
}

impl KeeperError {
    /// Returns the kind of this error.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            KeeperError::Client(_) => ErrorKind::Client,
            KeeperError::Dbee(_) | KeeperError::Dbeelog(_) | KeeperError::Abandoned => {
                ErrorKind::Fatal
            }
        }
    }

    /// Returns true if this is a non-fatal client error.
    #[must_use]
    pub fn is_client_error(&self) -> bool {
        self.kind() == ErrorKind::Client
    }

    /// Returns true if this error requires recovery.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Returns the client error, if this is one.
    #[must_use]
    pub fn as_client_error(&self) -> Option<&ClientError> {
        match self {
            KeeperError::Client(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for KeeperError {
    fn from(e: io::Error) -> Self {
        KeeperError::Dbee(DbeeError::Io(e))
    }
}
