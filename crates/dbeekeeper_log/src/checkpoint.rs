//! Checkpoint retention and the truncation floor.
//!
//! A dbeelog keeps at least `min_checkpoints` of the most recent checkpoints,
//! ranked by checkpointed transaction id (ties go to the most recently
//! written node). The truncation floor is the lowest id in that retained
//! set: every transaction at or above it stays readable so that any retained
//! client can restore its snapshot and resubscribe.
//!
//! With `min_checkpoints = 3` and
//!
//! ```text
//! client1 => 5, client2 => 1, client3 => 3, client4 => 6, client5 => 4
//! ```
//!
//! the retained set is `{client4: 6, client1: 5, client5: 4}` and the floor
//! is 4.

use crate::substrate::CheckpointRecord;
use dbeekeeper_core::{ClientId, TransactionId};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Outcome of a retention pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retention {
    /// Checkpoints that must be kept, most recent first.
    pub retained: Vec<CheckpointRecord>,
    /// Entries below this id may be discarded. `None` until enough clients
    /// have checkpointed.
    pub floor: Option<TransactionId>,
}

impl Retention {
    /// Returns the retained checkpoints as a client → id map.
    #[must_use]
    pub fn to_map(&self) -> BTreeMap<ClientId, TransactionId> {
        self.retained
            .iter()
            .map(|r| (r.client_id.clone(), r.transaction_id))
            .collect()
    }
}

/// Computes the retained checkpoints and the truncation floor.
///
/// If fewer than `min_checkpoints` clients have checkpointed, every record
/// is retained and there is no floor.
#[must_use]
pub fn retain(records: &[CheckpointRecord], min_checkpoints: usize) -> Retention {
    let mut ranked = records.to_vec();
    ranked.sort_by_key(|r| (Reverse(r.transaction_id), Reverse(r.modified)));

    if min_checkpoints == 0 || ranked.len() < min_checkpoints {
        return Retention {
            retained: ranked,
            floor: None,
        };
    }

    ranked.truncate(min_checkpoints);
    let floor = ranked.last().map(|r| r.transaction_id);
    Retention {
        retained: ranked,
        floor,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn record(client: &str, id: u64, modified: u64) -> CheckpointRecord {
        CheckpointRecord {
            client_id: ClientId::new(client),
            transaction_id: TransactionId::new(id),
            version: 0,
            modified,
        }
    }

    #[test]
    fn keeps_most_recent_checkpoints() {
        let records = vec![
            record("client1", 5, 1),
            record("client2", 1, 2),
            record("client3", 3, 3),
            record("client4", 6, 4),
            record("client5", 4, 5),
        ];
        let retention = retain(&records, 3);
        assert_eq!(retention.floor, Some(TransactionId::new(4)));

        let map = retention.to_map();
        assert_eq!(map.len(), 3);
        assert_eq!(map[&ClientId::new("client1")], TransactionId::new(5));
        assert_eq!(map[&ClientId::new("client4")], TransactionId::new(6));
        assert_eq!(map[&ClientId::new("client5")], TransactionId::new(4));
    }

    #[test]
    fn no_floor_below_quorum() {
        let records = vec![record("a", 100, 1), record("b", 200, 2)];
        let retention = retain(&records, 3);
        assert_eq!(retention.floor, None);
        assert_eq!(retention.retained.len(), 2);
    }

    #[test]
    fn ties_go_to_most_recently_written() {
        let records = vec![
            record("old", 4, 1),
            record("new", 4, 9),
            record("top", 8, 2),
        ];
        let retention = retain(&records, 2);
        let clients: Vec<_> = retention
            .retained
            .iter()
            .map(|r| r.client_id.as_str().to_string())
            .collect();
        assert_eq!(clients, vec!["top", "new"]);
        assert_eq!(retention.floor, Some(TransactionId::new(4)));
    }

    #[test]
    fn empty_records() {
        let retention = retain(&[], 1);
        assert!(retention.retained.is_empty());
        assert_eq!(retention.floor, None);
    }

    fn records_strategy() -> impl Strategy<Value = Vec<CheckpointRecord>> {
        prop::collection::vec(0u64..1_000, 0..12).prop_map(|ids| {
            ids.into_iter()
                .enumerate()
                .map(|(i, id)| record(&format!("c{i}"), id, i as u64))
                .collect()
        })
    }

    proptest! {
        #[test]
        fn floor_never_exceeds_retained(records in records_strategy(), min in 1usize..6) {
            let retention = retain(&records, min);
            if records.len() < min {
                prop_assert_eq!(retention.floor, None);
                prop_assert_eq!(retention.retained.len(), records.len());
            } else {
                let floor = retention.floor.unwrap();
                prop_assert_eq!(retention.retained.len(), min);
                for r in &retention.retained {
                    prop_assert!(r.transaction_id >= floor);
                }
                // At least `min` clients cover everything at or above the floor.
                let covering = records.iter().filter(|r| r.transaction_id >= floor).count();
                prop_assert!(covering >= min);
            }
        }

        #[test]
        fn advancing_a_checkpoint_never_lowers_the_floor(
            records in records_strategy(),
            min in 1usize..6,
            pick in any::<prop::sample::Index>(),
            bump in 0u64..500,
        ) {
            prop_assume!(!records.is_empty());
            let before = retain(&records, min).floor;

            let mut advanced = records.clone();
            let i = pick.index(advanced.len());
            advanced[i].transaction_id = TransactionId::new(advanced[i].transaction_id.as_u64() + bump);
            advanced[i].modified = 10_000;
            let after = retain(&advanced, min).floor;

            prop_assert!(after >= before);
        }
    }
}
