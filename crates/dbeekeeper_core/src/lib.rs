//! # dbeekeeper core
//!
//! Types shared by every dbeekeeper component.
//!
//! This crate provides:
//! - Identifiers for transactions, clients and log instances
//! - The transaction payload and the log entry record
//! - The two-kind error taxonomy (client errors vs. fatal errors)
//! - Single-fire completion callbacks for asynchronous operations
//!
//! ## Error kinds
//!
//! Every failure is either a **client error** (non-fatal, reported to the
//! immediate caller, state untouched) or a **fatal** dbee/dbeelog error that
//! forces the local replica into recovery. See [`KeeperError::kind`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod completion;
mod error;
mod types;

pub use completion::{completion, Callback, Completion};
pub use error::{
    ClientError, DbeeError, DbeelogError, ErrorKind, KeeperError, KeeperResult,
};
pub use types::{ClientId, DbeelogId, LogEntry, StartAt, Transaction, TransactionId};
