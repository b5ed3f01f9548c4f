//! Transaction language of the key/value dbee.
//!
//! ```text
//! set <key> <value>   store value under key (value is the rest of the line)
//! del <key>           remove key
//! clear               remove every key
//! ```
//!
//! Every command is idempotent: applying it twice leaves the same table as
//! applying it once.

use dbeekeeper_core::{ClientError, Transaction};
use std::fmt;
use std::str::FromStr;

/// A parsed key/value transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Store `value` under `key`.
    Set {
        /// Key to write.
        key: String,
        /// Value to store.
        value: String,
    },
    /// Remove `key`.
    Delete {
        /// Key to remove.
        key: String,
    },
    /// Remove every key.
    Clear,
}

impl Command {
    /// Returns the key the command touches, if any.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        match self {
            Command::Set { key, .. } | Command::Delete { key } => Some(key),
            Command::Clear => None,
        }
    }

    /// Encodes the command as a transaction.
    #[must_use]
    pub fn to_transaction(&self) -> Transaction {
        Transaction::new(self.to_string())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::Set { key, value } => write!(f, "set {key} {value}"),
            Command::Delete { key } => write!(f, "del {key}"),
            Command::Clear => f.write_str("clear"),
        }
    }
}

impl FromStr for Command {
    type Err = ClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = |why: &str| ClientError::MalformedTransaction(format!("{why}: {s:?}"));

        let (verb, rest) = match s.split_once(' ') {
            Some((verb, rest)) => (verb, Some(rest)),
            None => (s, None),
        };

        match (verb, rest) {
            ("set", Some(rest)) => {
                let (key, value) = rest
                    .split_once(' ')
                    .ok_or_else(|| malformed("set needs a key and a value"))?;
                if key.is_empty() {
                    return Err(malformed("empty key"));
                }
                Ok(Command::Set {
                    key: key.to_string(),
                    value: value.to_string(),
                })
            }
            ("del", Some(key)) => {
                if key.is_empty() || key.contains(' ') {
                    return Err(malformed("del takes exactly one key"));
                }
                Ok(Command::Delete {
                    key: key.to_string(),
                })
            }
            ("clear", None) => Ok(Command::Clear),
            ("set" | "del", None) => Err(malformed("missing arguments")),
            ("clear", Some(_)) => Err(malformed("clear takes no arguments")),
            _ => Err(malformed("unknown command")),
        }
    }
}

impl TryFrom<&Transaction> for Command {
    type Error = ClientError;

    fn try_from(transaction: &Transaction) -> Result<Self, Self::Error> {
        transaction.as_str().parse()
    }
}
