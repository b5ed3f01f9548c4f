//! # dbeekeeper
//!
//! Replicated, log-backed storage: every replica runs a dbee that applies
//! the same ordered stream of transactions from a shared dbeelog, snapshots
//! at its own pace, and recovers by restoring a snapshot and replaying the
//! dbeelog from the snapshot's id.
//!
//! This crate provides:
//! - [`RecoveryCoordinator`], which sequences restore, resubscribe, replay,
//!   snapshot and checkpoint for one replica
//! - [`SnapshotCatalog`], the on-disk index of a replica's snapshots
//! - Re-exports of the core types, the dbeelog and the dbee contract
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dbeekeeper::{
//!     Dbeelog, KeeperConfig, KvDbee, LogConfig, MemorySubstrate, RecoveryCoordinator,
//!     Transaction,
//! };
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let substrate = Arc::new(MemorySubstrate::new());
//! let log = Arc::new(Dbeelog::open(LogConfig::new("orders", "replica-1"), substrate)?);
//! let mut keeper = RecoveryCoordinator::new(
//!     KeeperConfig::new("/var/lib/replica-1"),
//!     KvDbee::default(),
//!     log,
//! );
//!
//! keeper.recover()?;
//! let id = keeper.submit(Transaction::new("set greeting hello")).wait()?;
//! keeper.run_until(id, Duration::from_secs(1))?;
//! assert_eq!(keeper.dbee().get("greeting"), Some("hello"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod config;
mod recovery;

pub use catalog::{SnapshotCatalog, SnapshotFile};
pub use config::KeeperConfig;
pub use recovery::{KeeperStats, RecoveryCoordinator};

pub use dbeekeeper_core::{
    completion, Callback, ClientError, ClientId, Completion, DbeeError, DbeelogError, DbeelogId,
    ErrorKind, KeeperError, KeeperResult, LogEntry, StartAt, Transaction, TransactionId,
};
pub use dbeekeeper_dbee::{Command, Dbee, DbeeConfig, KvDbee, Phase};
pub use dbeekeeper_log::{
    CheckpointMap, Dbeelog, LogConfig, MemorySubstrate, Substrate, TransactionLog,
};
