//! # dbeekeeper dbee
//!
//! Local execution engines ("dbees") that apply transactions delivered by a
//! dbeelog.
//!
//! This crate provides:
//! - The [`Dbee`] contract (execute, snapshot, restore)
//! - The snapshot/restore [`Phase`] machine shared by implementations
//! - The snapshot file format ([`snapshot`])
//! - [`KvDbee`], an in-memory key/value engine driven by [`Command`]s
//!
//! ## Key Invariants
//!
//! - A failed `execute` with a client error leaves state unchanged
//! - At most one snapshot or restore is in flight per dbee
//! - A snapshot holds every transaction executed before it was requested
//! - A restore never leaves partially replaced state behind

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod command;
mod config;
mod engine;
mod kv;
mod phase;
pub mod snapshot;

pub use command::Command;
pub use config::DbeeConfig;
pub use engine::Dbee;
pub use kv::{KvDbee, Table};
pub use phase::{Phase, PhaseCell, PhaseGuard};
pub use snapshot::SnapshotMetadata;
