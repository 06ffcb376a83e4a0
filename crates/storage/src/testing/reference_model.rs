//! Reference model for tracking expected tree state
//!
//! The reference model keeps a plain sorted copy of every committed version
//! of one tree, so tests can compare lookups and cursors of the real tree
//! against it at any sequence.
//!
//! # Example
//!
//! ```ignore
//! use tessera_storage::testing::ReferenceModel;
//!
//! let mut model = ReferenceModel::new(order);
//! model.apply(1, ops.clone());
//! tree.merge(1, ops, 0)?;
//!
//! let mismatches = model.compare(1, tree.cursor(pin, None, false));
//! assert!(mismatches.is_empty());
//! ```

use crate::btree::TreeOp;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use tessera_core::{Key, KeyOrder, Result, TreeValue, Value};

/// Reference model of one tree's committed versions
pub struct ReferenceModel {
    order: Arc<KeyOrder>,
    /// Full contents after each committed sequence
    versions: BTreeMap<u64, Vec<(Key, TreeValue)>>,
}

/// Difference between expected and actual contents
#[derive(Debug, Clone, PartialEq)]
pub enum StateMismatch {
    /// Expected entry absent from the tree
    Missing {
        /// Position in expected order
        position: usize,
        /// Expected key
        key: Key,
    },
    /// Tree yielded an entry the model does not have
    Unexpected {
        /// Position in actual order
        position: usize,
        /// Actual key
        key: Key,
    },
    /// Same position, different entry
    Differs {
        /// Position in cursor order
        position: usize,
        /// Expected entry
        expected: (Key, TreeValue),
        /// Actual entry
        actual: (Key, TreeValue),
    },
    /// Reading the tree failed
    ReadError(String),
}

impl ReferenceModel {
    /// Empty model at sequence 0
    pub fn new(order: Arc<KeyOrder>) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(0, Vec::new());
        ReferenceModel { order, versions }
    }

    /// Latest committed sequence
    pub fn latest_sequence(&self) -> u64 {
        self.versions.keys().next_back().copied().unwrap_or(0)
    }

    /// Apply one commit; the last operation on a key wins
    pub fn apply(&mut self, sequence: u64, ops: Vec<TreeOp>) {
        let mut entries = self.state_at(self.latest_sequence()).to_vec();
        for (key, op) in ops {
            let found = entries.binary_search_by(|(k, _)| self.order.compare(k, &key));
            match (found, op) {
                (Ok(i), Some(value)) => entries[i].1 = value,
                (Ok(i), None) => {
                    entries.remove(i);
                }
                (Err(i), Some(value)) => entries.insert(i, (key, value)),
                (Err(_), None) => {}
            }
        }
        self.versions.insert(sequence, entries);
    }

    /// Contents as of `sequence`
    pub fn state_at(&self, sequence: u64) -> &[(Key, TreeValue)] {
        self.versions
            .range(..=sequence)
            .next_back()
            .map(|(_, entries)| entries.as_slice())
            .unwrap_or(&[])
    }

    /// Exact lookup as of `sequence`
    pub fn get(&self, sequence: u64, key: &[Value]) -> Option<&TreeValue> {
        let entries = self.state_at(sequence);
        entries
            .binary_search_by(|(k, _)| self.order.compare(k, key))
            .ok()
            .map(|i| &entries[i].1)
    }

    /// Expected cursor output as of `sequence`
    pub fn scan(&self, sequence: u64, from: Option<&[Value]>, reverse: bool) -> Vec<(Key, TreeValue)> {
        let entries = self.state_at(sequence);
        let keep = |k: &Key| match from {
            None => true,
            Some(from) => {
                let ord = self.order.compare_prefix(k, from);
                if reverse {
                    ord != Ordering::Greater
                } else {
                    ord != Ordering::Less
                }
            }
        };
        let mut out: Vec<_> = entries.iter().filter(|(k, _)| keep(k)).cloned().collect();
        if reverse {
            out.reverse();
        }
        out
    }

    /// Compare a cursor's output against the expected scan
    pub fn compare<I>(&self, sequence: u64, from: Option<&[Value]>, reverse: bool, actual: I) -> Vec<StateMismatch>
    where
        I: IntoIterator<Item = Result<(Key, TreeValue)>>,
    {
        let expected = self.scan(sequence, from, reverse);
        let mut mismatches = Vec::new();
        let mut position = 0;
        for item in actual {
            match item {
                Ok(entry) => {
                    match expected.get(position) {
                        Some(want) if *want == entry => {}
                        Some(want) => mismatches.push(StateMismatch::Differs {
                            position,
                            expected: want.clone(),
                            actual: entry,
                        }),
                        None => mismatches.push(StateMismatch::Unexpected {
                            position,
                            key: entry.0,
                        }),
                    }
                    position += 1;
                }
                Err(e) => {
                    mismatches.push(StateMismatch::ReadError(e.to_string()));
                    return mismatches;
                }
            }
        }
        for (i, (key, _)) in expected.iter().enumerate().skip(position) {
            mismatches.push(StateMismatch::Missing {
                position: i,
                key: key.clone(),
            });
        }
        mismatches
    }
}
