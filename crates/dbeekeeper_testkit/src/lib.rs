//! # dbeekeeper testkit
//!
//! Test utilities for dbeekeeper.
//!
//! This crate provides:
//! - Clusters of dbeelog clients sharing one in-memory substrate
//! - Delivery collectors and polling helpers
//! - Property-based generators for transactions
//! - A fault-injecting dbee wrapper
//!
//! ## Usage
//!
//! ```rust,ignore
//! use dbeekeeper_testkit::prelude::*;
//!
//! #[test]
//! fn replicas_agree() {
//!     let cluster = LogCluster::new(2);
//!     let a = cluster.client("a");
//!     let seen = collect(a.as_ref(), StartAt::Tail);
//!     append(a.as_ref(), "set k v");
//!     wait_for("delivery", || delivered_ids(&seen).len() == 1);
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod faulty;
pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::faulty::*;
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use dbeekeeper_core::{StartAt, Transaction, TransactionId};
}

pub use faulty::*;
pub use fixtures::*;
pub use generators::*;
