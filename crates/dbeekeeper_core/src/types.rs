//! Core type definitions for dbeekeeper.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier assigned to a transaction when it is appended to a dbeelog.
///
/// Transaction IDs are totally ordered, monotonically increasing and never
/// reused. The first appended transaction gets id 1; [`TransactionId::ORIGIN`]
/// stands for "nothing applied yet".
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// The position before the first transaction of every log.
    pub const ORIGIN: Self = Self(0);

    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the id immediately after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

impl FromStr for TransactionId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s.strip_prefix("txn:").unwrap_or(s);
        digits.parse().map(Self)
    }
}

/// Identifies a participant of a dbeelog.
///
/// Client IDs are assigned externally; the caller is responsible for their
/// uniqueness within a dbeelog.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClientId(String);

impl ClientId {
    /// Creates a client ID from a name.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Generates a random client ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("client-{}", uuid::Uuid::new_v4().simple()))
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ClientId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for ClientId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identifies a dbeelog instance within a dbeekeeper deployment.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DbeelogId(String);

impl DbeelogId {
    /// Creates a dbeelog ID.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DbeelogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DbeelogId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An opaque, idempotent instruction for a dbee.
///
/// Applying the same transaction twice must leave a dbee in the same state
/// as applying it once. Dbeelogs never interpret the payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Transaction(String);

impl Transaction {
    /// Wraps a transaction payload.
    pub fn new(payload: impl Into<String>) -> Self {
        Self(payload.into())
    }

    /// Returns the payload.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the transaction and returns its payload.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Transaction {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Transaction {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// A transaction as recorded in a dbeelog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Id assigned at append time.
    pub id: TransactionId,
    /// Client that appended the transaction.
    pub client_id: ClientId,
    /// The transaction payload.
    pub transaction: Transaction,
}

/// Where a subscription starts reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartAt {
    /// Only transactions appended after the subscription is registered.
    Tail,
    /// Every transaction with an id greater than or equal to this one.
    From(TransactionId),
}

impl From<TransactionId> for StartAt {
    fn from(id: TransactionId) -> Self {
        StartAt::From(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transaction_id_ordering() {
        let t1 = TransactionId::new(1);
        let t2 = t1.next();
        assert!(t1 < t2);
        assert!(TransactionId::ORIGIN < t1);
        assert_eq!(t2.as_u64(), 2);
    }

    #[test]
    fn transaction_id_display_and_parse() {
        let t = TransactionId::new(42);
        assert_eq!(t.to_string(), "txn:42");
        assert_eq!("txn:42".parse::<TransactionId>().unwrap(), t);
        assert_eq!("42".parse::<TransactionId>().unwrap(), t);
        assert!("txn:".parse::<TransactionId>().is_err());
    }

    #[test]
    fn generated_client_ids_differ() {
        let a = ClientId::generate();
        let b = ClientId::generate();
        assert_ne!(a, b);
        assert!(a.as_str().starts_with("client-"));
    }

    #[test]
    fn start_at_from_id() {
        let start: StartAt = TransactionId::new(7).into();
        assert_eq!(start, StartAt::From(TransactionId::new(7)));
    }
}
