//! Per-tree staging of uncommitted writes
//!
//! Staged entries live in one sorted map per tree, ordered by that tree's
//! comparators. `None` is a tombstone. Maps sit behind `Arc` so cursors and
//! staging snapshots can hold the staging as of their creation while the
//! mutator keeps writing (copy on write through `Arc::make_mut`).

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tessera_core::{Key, KeyOrder, Mutation, Op, TreeId, TreeValue, Value};

/// A key bundled with the order it sorts by
#[derive(Clone)]
pub struct OrderedKey {
    key: Key,
    order: Arc<KeyOrder>,
}

impl OrderedKey {
    /// Wrap a key
    pub fn new(key: Key, order: Arc<KeyOrder>) -> Self {
        OrderedKey { key, order }
    }

    /// The key
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Unwrap the key
    pub fn into_key(self) -> Key {
        self.key
    }
}

impl PartialEq for OrderedKey {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for OrderedKey {}

impl PartialOrd for OrderedKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OrderedKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order.compare(&self.key, &other.key)
    }
}

impl fmt::Debug for OrderedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.key.fmt(f)
    }
}

/// Staged entries of one tree; `None` marks a tombstone
pub type StagedMap = BTreeMap<OrderedKey, Option<TreeValue>>;

/// All staged writes of one mutator
#[derive(Clone, Default)]
pub struct Staging {
    trees: BTreeMap<TreeId, (Arc<KeyOrder>, Arc<StagedMap>)>,
}

impl Staging {
    /// Empty staging
    pub fn new() -> Self {
        Self::default()
    }

    /// Stage a set (`Some`) or tombstone (`None`), replacing any earlier
    /// staged entry for the key
    pub fn stage(&mut self, tree: TreeId, order: &Arc<KeyOrder>, key: Key, value: Option<TreeValue>) {
        let (_, map) = self
            .trees
            .entry(tree)
            .or_insert_with(|| (Arc::clone(order), Arc::new(StagedMap::new())));
        Arc::make_mut(map).insert(OrderedKey::new(key, Arc::clone(order)), value);
    }

    /// Staged entry for an exact key
    ///
    /// `Some(None)` is a tombstone, `None` means nothing is staged.
    pub fn get(&self, tree: TreeId, key: &[Value]) -> Option<Option<&TreeValue>> {
        let (order, map) = self.trees.get(&tree)?;
        let probe = OrderedKey::new(key.to_vec(), Arc::clone(order));
        map.get(&probe).map(Option::as_ref)
    }

    /// Shared handle to one tree's staged map
    pub fn tree(&self, tree: TreeId) -> Option<Arc<StagedMap>> {
        self.trees.get(&tree).map(|(_, map)| Arc::clone(map))
    }

    /// Number of staged entries, tombstones included
    pub fn len(&self) -> usize {
        self.trees.values().map(|(_, map)| map.len()).sum()
    }

    /// True when nothing is staged
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.trees.clear();
    }

    /// Flatten into WAL mutations, tree by tree in key order
    pub fn into_mutations(self) -> Vec<Mutation> {
        let mut mutations = Vec::with_capacity(self.len());
        for (tree, (_, map)) in self.trees {
            let map = Arc::try_unwrap(map).unwrap_or_else(|shared| (*shared).clone());
            for (key, value) in map {
                mutations.push(Mutation {
                    tree,
                    key: key.into_key(),
                    op: match value {
                        Some(value) => Op::Set(value),
                        None => Op::Unset,
                    },
                });
            }
        }
        mutations
    }
}

impl fmt::Debug for Staging {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.trees.iter().map(|(id, (_, map))| (id, map.len())))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tessera_core::{key, Comparator, Record};

    fn order() -> Arc<KeyOrder> {
        Arc::new(KeyOrder::canonical(1))
    }

    fn rec(v: i64) -> Option<TreeValue> {
        Some(TreeValue::Record(Record::new(Value::Int(v), 1)))
    }

    #[test]
    fn test_stage_overwrites_and_tombstones() {
        let order = order();
        let mut staging = Staging::new();
        staging.stage(TreeId(1), &order, key![1], rec(1));
        staging.stage(TreeId(1), &order, key![1], rec(2));
        staging.stage(TreeId(1), &order, key![2], None);

        assert_eq!(staging.len(), 2);
        let staged = staging.get(TreeId(1), &key![1]).unwrap().unwrap();
        assert_eq!(staged.as_record().unwrap().value, Value::Int(2));
        assert_eq!(staging.get(TreeId(1), &key![2]), Some(None));
        assert_eq!(staging.get(TreeId(1), &key![3]), None);
        assert_eq!(staging.get(TreeId(9), &key![1]), None);
    }

    #[test]
    fn test_snapshot_of_staging_is_isolated() {
        let order = order();
        let mut staging = Staging::new();
        staging.stage(TreeId(1), &order, key![1], rec(1));

        let frozen = staging.clone();
        staging.stage(TreeId(1), &order, key![2], rec(2));

        assert_eq!(frozen.len(), 1);
        assert_eq!(staging.len(), 2);
        assert!(frozen.get(TreeId(1), &key![2]).is_none());
    }

    #[test]
    fn test_staged_map_uses_tree_order() {
        let descending: Comparator = Arc::new(|a: &Value, b: &Value| b.canonical_cmp(a));
        let desc = Arc::new(KeyOrder::new(vec![descending]));
        let mut staging = Staging::new();
        for k in [1, 3, 2] {
            staging.stage(TreeId(1), &desc, key![k], rec(k));
        }
        let keys: Vec<i64> = staging
            .tree(TreeId(1))
            .unwrap()
            .keys()
            .map(|k| k.key()[0].as_int().unwrap())
            .collect();
        assert_eq!(keys, vec![3, 2, 1]);
    }

    #[test]
    fn test_into_mutations() {
        let order = order();
        let mut staging = Staging::new();
        staging.stage(TreeId(2), &order, key![5], None);
        staging.stage(TreeId(1), &order, key![7], rec(7));
        let mutations = staging.into_mutations();
        assert_eq!(mutations.len(), 2);
        assert_eq!(mutations[0].tree, TreeId(1));
        assert!(matches!(mutations[0].op, Op::Set(_)));
        assert_eq!(mutations[1].tree, TreeId(2));
        assert!(mutations[1].op.is_unset());
    }
}
