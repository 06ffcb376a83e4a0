//! Merge cursor and join operator
//!
//! A [`Cursor`] merges two sorted sources in the tree's comparator order:
//! the staged entries of the view and the committed [`TreeCursor`]. At each
//! step, with `s` the staged head and `c` the committed head (compared in
//! scan direction):
//!
//! - `s` before `c`: emit `s` unless it is a tombstone, advance staged
//! - `s == c`: emit `s` unless it is a tombstone, advance both
//! - `c` before `s`: emit `c`, advance committed
//!
//! Nothing is read until the first call to `next_entry`, `next_batch` or
//! `next`. `reverse()` flips direction and restarts from the original
//! starting key.

use crate::staging::{OrderedKey, StagedMap};
use crate::view::ReadView;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;
use std::sync::Arc;
use tessera_core::{Key, KeyOrder, Record, Result, TreeId, TreePath, TreeValue};
use tessera_storage::{BTree, TreeCursor};

/// Walks one tree's staged map in either direction
struct StagedIter {
    map: Option<Arc<StagedMap>>,
    order: Arc<KeyOrder>,
    from: Option<Key>,
    reverse: bool,
    last: Option<OrderedKey>,
    done: bool,
}

impl StagedIter {
    fn new(map: Option<Arc<StagedMap>>, order: Arc<KeyOrder>, from: Option<Key>, reverse: bool) -> Self {
        StagedIter {
            map,
            order,
            from,
            reverse,
            last: None,
            done: false,
        }
    }

    fn next(&mut self) -> Option<(Key, Option<TreeValue>)> {
        if self.done {
            return None;
        }
        let Some(map) = self.map.as_ref() else {
            self.done = true;
            return None;
        };

        let next = match (&self.last, self.reverse) {
            (None, false) => match &self.from {
                Some(from) => map
                    .range(OrderedKey::new(from.clone(), Arc::clone(&self.order))..)
                    .next(),
                None => map.iter().next(),
            },
            (None, true) => self.reverse_start(map),
            (Some(last), false) => map.range((Bound::Excluded(last), Bound::Unbounded)).next(),
            (Some(last), true) => map.range(..last).next_back(),
        };

        match next {
            Some((key, value)) => {
                let item = (key.key().clone(), value.clone());
                self.last = Some(key.clone());
                Some(item)
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    /// Last staged key whose prefix is `<= from`
    fn reverse_start<'a>(&self, map: &'a StagedMap) -> Option<(&'a OrderedKey, &'a Option<TreeValue>)> {
        let Some(from) = &self.from else {
            return map.iter().next_back();
        };
        let probe = OrderedKey::new(from.clone(), Arc::clone(&self.order));
        // Keys sharing the prefix sort at or after the bare prefix
        let within = map
            .range(&probe..)
            .take_while(|(key, _)| self.order.compare_prefix(key.key(), from) == Ordering::Equal)
            .last();
        within.or_else(|| map.range(..&probe).next_back())
    }
}

/// Merge of staged and committed entries for one tree
struct MergeState {
    staged: StagedIter,
    committed: TreeCursor,
    staged_head: Option<(Key, Option<TreeValue>)>,
    committed_head: Option<(Key, TreeValue)>,
}

impl MergeState {
    fn next(&mut self, order: &KeyOrder, reverse: bool) -> Result<Option<(Key, TreeValue)>> {
        loop {
            if self.staged_head.is_none() {
                self.staged_head = self.staged.next();
            }
            if self.committed_head.is_none() {
                self.committed_head = self.committed.next_entry()?;
            }

            let step = match (&self.staged_head, &self.committed_head) {
                (None, None) => return Ok(None),
                (Some(_), None) => Ordering::Less,
                (None, Some(_)) => Ordering::Greater,
                (Some((s, _)), Some((c, _))) => {
                    let ord = order.compare(s, c);
                    if reverse {
                        ord.reverse()
                    } else {
                        ord
                    }
                }
            };

            match step {
                Ordering::Greater => return Ok(self.committed_head.take()),
                Ordering::Equal => {
                    self.committed_head = None;
                }
                Ordering::Less => {}
            }
            if let Some((key, Some(value))) = self.staged_head.take() {
                return Ok(Some((key, value)));
            }
            // Tombstone: skip it (and the committed equal, already dropped)
        }
    }
}

/// Lazy, restartable, bidirectional scan over a store or index
pub struct Cursor {
    view: ReadView,
    tree: Arc<BTree>,
    store: TreeId,
    from: Option<Key>,
    reverse: bool,
    batch_size: usize,
    state: Option<MergeState>,
    failed: bool,
}

impl Cursor {
    pub(crate) fn new(view: ReadView, tree: Arc<BTree>, store: TreeId, from: Option<Key>) -> Self {
        let batch_size = view.batch_size();
        Cursor {
            view,
            tree,
            store,
            from,
            reverse: false,
            batch_size,
            state: None,
            failed: false,
        }
    }

    /// Flip the scan direction; iteration restarts from the starting key
    pub fn reverse(mut self) -> Self {
        self.reverse = !self.reverse;
        self.restart();
        self
    }

    /// Set the number of records `next_batch` returns
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// True when scanning in descending order
    pub fn is_reverse(&self) -> bool {
        self.reverse
    }

    /// Sequence of the committed state being scanned
    pub fn sequence(&self) -> u64 {
        self.view.sequence()
    }

    /// Start over from the beginning
    pub fn restart(&mut self) {
        self.state = None;
        self.failed = false;
    }

    fn open_state(&self) -> MergeState {
        let staged = StagedIter::new(
            self.view.staging().tree(self.tree.id()),
            Arc::clone(self.tree.order()),
            self.from.clone(),
            self.reverse,
        );
        MergeState {
            staged,
            committed: self.view.committed_cursor(&self.tree, self.from.clone(), self.reverse),
            staged_head: None,
            committed_head: None,
        }
    }

    /// Next entry as `(tree key, record)`; index entries resolve to the
    /// referenced record
    pub fn next_entry(&mut self) -> Result<Option<(Key, Record)>> {
        if self.failed {
            return Ok(None);
        }
        if self.state.is_none() {
            self.state = Some(self.open_state());
        }
        let order = Arc::clone(self.tree.order());
        let reverse = self.reverse;
        let Some(state) = self.state.as_mut() else {
            return Ok(None);
        };
        let entry = match state.next(&order, reverse) {
            Ok(entry) => entry,
            Err(e) => {
                self.failed = true;
                return Err(e);
            }
        };
        match entry {
            Some((key, value)) => {
                let record = self.view.resolve_value(self.store, value)?;
                Ok(Some((key, record)))
            }
            None => Ok(None),
        }
    }

    /// Up to `batch_size` records; empty once the scan is exhausted
    pub fn next_batch(&mut self) -> Result<Vec<Record>> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while batch.len() < self.batch_size {
            match self.next_entry()? {
                Some((_, record)) => batch.push(record),
                None => break,
            }
        }
        Ok(batch)
    }

    /// Inner-join every record of this cursor with one record of `right`
    ///
    /// `correlate` computes the lookup key for a left record; `None` drops
    /// the left record.
    pub fn join<F>(self, right: impl Into<TreePath>, correlate: F) -> Result<Join<F>>
    where
        F: FnMut(&Record) -> Option<Key>,
    {
        let right = right.into();
        // Fail on an unknown path now rather than at the first row
        self.view.resolve(&right)?;
        Ok(Join {
            left: self,
            right,
            correlate,
        })
    }
}

impl Iterator for Cursor {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_entry().map(|entry| entry.map(|(_, record)| record)).transpose()
    }
}

impl fmt::Debug for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cursor")
            .field("tree", &self.tree.id())
            .field("from", &self.from)
            .field("reverse", &self.reverse)
            .field("sequence", &self.view.sequence())
            .finish()
    }
}

/// Nested-loop inner join driven by a left cursor
pub struct Join<F> {
    left: Cursor,
    right: TreePath,
    correlate: F,
}

impl<F> Join<F>
where
    F: FnMut(&Record) -> Option<Key>,
{
    /// Next `(left, right)` pair, in left cursor order
    pub fn next_pair(&mut self) -> Result<Option<(Record, Record)>> {
        while let Some((_, left)) = self.left.next_entry()? {
            let Some(key) = (self.correlate)(&left) else {
                continue;
            };
            if let Some(right) = self.left.view.get(&self.right, &key)? {
                return Ok(Some((left, right)));
            }
        }
        Ok(None)
    }

    /// Up to the left cursor's batch size of pairs
    pub fn next_batch(&mut self) -> Result<Vec<(Record, Record)>> {
        let mut batch = Vec::with_capacity(self.left.batch_size);
        while batch.len() < self.left.batch_size {
            match self.next_pair()? {
                Some(pair) => batch.push(pair),
                None => break,
            }
        }
        Ok(batch)
    }
}

impl<F> Iterator for Join<F>
where
    F: FnMut(&Record) -> Option<Key>,
{
    type Item = Result<(Record, Record)>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_pair().transpose()
    }
}
