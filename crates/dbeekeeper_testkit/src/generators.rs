//! Property-based test generators using proptest.
//!
//! Keys are drawn from a small alphabet so that generated sequences keep
//! overwriting and deleting the same keys.

use dbeekeeper_core::Transaction;
use dbeekeeper_dbee::Command;
use proptest::prelude::*;

/// Strategy for generating keys from a small, colliding key space.
pub fn key_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f][0-2]?").expect("Invalid regex")
}

/// Strategy for generating values, including empty ones and inner spaces.
pub fn value_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-z0-9]{0,4}( [a-z0-9]{1,4})?").expect("Invalid regex")
}

/// Strategy for generating valid key/value commands.
pub fn command_strategy() -> impl Strategy<Value = Command> {
    prop_oneof![
        6 => (key_strategy(), value_strategy())
            .prop_map(|(key, value)| Command::Set { key, value }),
        3 => key_strategy().prop_map(|key| Command::Delete { key }),
        1 => Just(Command::Clear),
    ]
}

/// Strategy for generating valid transactions.
pub fn transaction_strategy() -> impl Strategy<Value = Transaction> {
    command_strategy().prop_map(|command| command.to_transaction())
}

/// Strategy for generating transaction sequences.
pub fn transactions_strategy(max_len: usize) -> impl Strategy<Value = Vec<Transaction>> {
    prop::collection::vec(transaction_strategy(), 0..=max_len)
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn generated_transactions_parse(tx in transaction_strategy()) {
            prop_assert!(Command::try_from(&tx).is_ok());
        }
    }
}
