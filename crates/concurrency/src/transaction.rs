//! Mutators and snapshots
//!
//! A [`Mutator`] is the single read-write transaction. Its writes go to
//! in-memory staging overlaid on the committed state it started from; the
//! manager turns the staging into one WAL record when the closure returns.
//! A [`Snapshot`] is read-only and pinned to one committed sequence, or,
//! when opened from inside a mutator, to that sequence plus a frozen copy of
//! the mutator's staging.

use crate::cursor::Cursor;
use crate::view::{ReadView, Reader};
use std::cmp::Ordering;
use std::sync::Arc;
use tessera_core::{
    extract_index_key, extract_key, Error, Key, Mutation, Record, Result, TreePath, TreeValue, Value,
};
use tessera_storage::BTree;

/// Transaction lifecycle
///
/// `Active → Committing → Committed` for mutators that reach the WAL,
/// `Active → RolledBack` for closures that fail or call `rollback()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Running the caller's closure
    Active,
    /// Writing the WAL record and merging
    Committing,
    /// Durable and published
    Committed,
    /// Staging discarded, nothing written
    RolledBack,
}

/// Read-write transaction
pub struct Mutator {
    view: ReadView,
    sequence: u64,
    state: TransactionState,
}

impl Mutator {
    pub(crate) fn new(view: ReadView, sequence: u64) -> Self {
        Mutator {
            view,
            sequence,
            state: TransactionState::Active,
        }
    }

    /// Sequence this mutator commits at, used for `created_index` and
    /// `modified_index`
    pub fn commit_sequence(&self) -> u64 {
        self.sequence
    }

    /// Lifecycle state
    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub(crate) fn set_state(&mut self, state: TransactionState) {
        self.state = state;
    }

    /// Discard everything staged; nothing is written when the closure returns
    pub fn rollback(&mut self) {
        self.view.staging_mut().clear();
        self.state = TransactionState::RolledBack;
    }

    /// True once `rollback()` was called
    pub fn is_rolled_back(&self) -> bool {
        self.state == TransactionState::RolledBack
    }

    /// Number of staged entries, index entries and tombstones included
    pub fn staged_len(&self) -> usize {
        self.view.staging().len()
    }

    fn current_record(&self, tree: &BTree, key: &[Value]) -> Result<Option<Record>> {
        Ok(match self.view.lookup(tree, key)? {
            Some(TreeValue::Record(record)) => Some(record),
            _ => None,
        })
    }

    /// Insert or overwrite a document, returning its key
    ///
    /// The key comes from the store's declared fields. Overwrites keep the
    /// original `created_index`. Every index of the store is updated in
    /// staging: the entry for the previous document is removed and one for
    /// the new document is added. A rejected document stages nothing.
    pub fn set(&mut self, store: &str, document: Value) -> Result<Key> {
        let catalog = Arc::clone(self.view.catalog());
        let def = catalog.store(store)?;
        let key = extract_key(&document, &def.key)?;
        let tree = self.view.tree(def.id)?;

        let previous = self.current_record(&tree, &key)?;
        let record = match &previous {
            Some(old) => old.overwrite(document, self.sequence),
            None => Record::new(document, self.sequence),
        };

        let mut index_writes = Vec::with_capacity(def.indices.len());
        for index in def.indices.values() {
            let index_tree = self.view.tree(index.id)?;
            let new_key = extract_index_key(&record.value, &index.fields, &key);
            let reference = TreeValue::Ref(key.clone());
            index_tree.check_entry(&new_key, &reference)?;
            let stale = previous
                .as_ref()
                .map(|old| extract_index_key(&old.value, &index.fields, &key))
                .filter(|old_key| index_tree.order().compare(old_key, &new_key) != Ordering::Equal);
            index_writes.push((index_tree, stale, new_key, reference));
        }

        let value = TreeValue::Record(record);
        tree.check_entry(&key, &value)?;

        let staging = self.view.staging_mut();
        for (index_tree, stale, new_key, reference) in index_writes {
            if let Some(stale) = stale {
                staging.stage(index_tree.id(), index_tree.order(), stale, None);
            }
            staging.stage(index_tree.id(), index_tree.order(), new_key, Some(reference));
        }
        staging.stage(tree.id(), tree.order(), key.clone(), Some(value));
        Ok(key)
    }

    /// Delete the record at `key`, with its index entries
    ///
    /// Deleting an absent key is not an error and stages nothing. Returns
    /// whether a record was removed.
    pub fn unset(&mut self, store: &str, key: &[Value]) -> Result<bool> {
        let catalog = Arc::clone(self.view.catalog());
        let def = catalog.store(store)?;
        if key.len() != def.key.len() {
            return Err(Error::InvalidKey(format!(
                "store '{}' has {} key fields, got {}",
                store,
                def.key.len(),
                key.len()
            )));
        }
        let tree = self.view.tree(def.id)?;
        let Some(previous) = self.current_record(&tree, key)? else {
            return Ok(false);
        };

        let mut index_trees = Vec::with_capacity(def.indices.len());
        for index in def.indices.values() {
            index_trees.push((self.view.tree(index.id)?, &index.fields));
        }
        let staging = self.view.staging_mut();
        for (index_tree, fields) in index_trees {
            let stale = extract_index_key(&previous.value, fields, key);
            staging.stage(index_tree.id(), index_tree.order(), stale, None);
        }
        staging.stage(tree.id(), tree.order(), key.to_vec(), None);
        Ok(true)
    }

    /// Run `f` against a frozen copy of the current staging
    ///
    /// The snapshot sees this mutator's pending writes as of the call, and
    /// nothing staged afterward.
    pub fn snapshot<R>(&self, f: impl FnOnce(&Snapshot) -> Result<R>) -> Result<R> {
        let snapshot = Snapshot::new(self.view.clone());
        f(&snapshot)
    }

    /// First record matching `key` in a store or index, staging first
    pub fn get(&self, path: impl Into<TreePath>, key: &[Value]) -> Result<Option<Record>> {
        Reader::get(self, path, key)
    }

    /// Merged scan over staging and committed state
    pub fn cursor(&self, path: impl Into<TreePath>, from: impl Into<Option<Key>>) -> Result<Cursor> {
        Reader::cursor(self, path, from)
    }

    /// Drain staging into mutations
    pub(crate) fn take_mutations(&mut self) -> Vec<Mutation> {
        std::mem::take(self.view.staging_mut()).into_mutations()
    }
}

impl Reader for Mutator {
    fn view(&self) -> &ReadView {
        &self.view
    }
}

impl std::fmt::Debug for Mutator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mutator")
            .field("sequence", &self.sequence)
            .field("state", &self.state)
            .field("staged", &self.staged_len())
            .finish()
    }
}

/// Read-only transaction pinned to one sequence
#[derive(Debug, Clone)]
pub struct Snapshot {
    view: ReadView,
}

impl Snapshot {
    pub(crate) fn new(view: ReadView) -> Self {
        Snapshot { view }
    }

    /// Committed sequence this snapshot reads at
    pub fn sequence(&self) -> u64 {
        self.view.sequence()
    }

    /// First record matching `key` in a store or index
    pub fn get(&self, path: impl Into<TreePath>, key: &[Value]) -> Result<Option<Record>> {
        Reader::get(self, path, key)
    }

    /// Lazy scan of a store or index
    pub fn cursor(&self, path: impl Into<TreePath>, from: impl Into<Option<Key>>) -> Result<Cursor> {
        Reader::cursor(self, path, from)
    }
}

impl Reader for Snapshot {
    fn view(&self) -> &ReadView {
        &self.view
    }
}
