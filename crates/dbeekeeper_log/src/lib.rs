//! # dbeekeeper log
//!
//! The distributed transaction log ("dbeelog") that orders and replicates
//! transactions across independent dbeekeeper clients.
//!
//! This crate provides:
//! - The [`TransactionLog`] contract (append, subscribe, checkpoint,
//!   get_checkpoints)
//! - [`Dbeelog`], an implementation over any ordered append + notify
//!   [`Substrate`]
//! - [`MemorySubstrate`], an in-process substrate
//! - Checkpoint retention and truncation ([`retain`])
//!
//! ## Key Invariants
//!
//! - Ids are assigned in one linear order across every appender
//! - Each client has at most one live subscription; deliveries arrive in
//!   strictly increasing id order from a single thread
//! - A client's checkpoint never moves backwards
//! - Nothing at or above the floor of the `min_checkpoints` most recent
//!   checkpoints is ever truncated, and nothing is truncated until
//!   `min_checkpoints` clients have checkpointed

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod checkpoint;
mod config;
mod dbeelog;
mod memory;
mod subscription;
mod substrate;

pub use checkpoint::{retain, Retention};
pub use config::{LogConfig, MIN_POLL_INTERVAL};
pub use dbeelog::{CheckpointMap, Dbeelog, TransactionLog};
pub use memory::MemorySubstrate;
pub use subscription::Receiver;
pub use substrate::{CheckpointRecord, LogBounds, Substrate, SubstrateError, SubstrateResult};
