//! Read views: committed state at a pinned sequence, optionally overlaid
//! with a mutator's staging
//!
//! Every read path (mutator, snapshot, staging snapshot, cursor, join) goes
//! through a [`ReadView`]. Lookups consult staging first and fall back to the
//! B-tree at the pinned sequence.

use crate::cursor::Cursor;
use crate::staging::Staging;
use std::cmp::Ordering;
use std::sync::Arc;
use tessera_core::{Catalog, Error, Key, Record, Result, TreeId, TreePath, TreeValue, Value};
use tessera_storage::{BTree, SequencePin, TreeSet};

/// Records returned per `next_batch()` when not configured
pub const DEFAULT_BATCH_SIZE: usize = 64;

/// Consistent view of the database at one sequence
#[derive(Clone)]
pub struct ReadView {
    catalog: Arc<Catalog>,
    trees: Arc<TreeSet>,
    pin: SequencePin,
    staging: Staging,
    batch_size: usize,
}

impl ReadView {
    /// View of the committed state at `pin`, with nothing staged
    pub fn new(catalog: Arc<Catalog>, trees: Arc<TreeSet>, pin: SequencePin, batch_size: usize) -> Self {
        ReadView {
            catalog,
            trees,
            pin,
            staging: Staging::new(),
            batch_size: batch_size.max(1),
        }
    }

    /// Sequence the committed state is read at
    pub fn sequence(&self) -> u64 {
        self.pin.sequence()
    }

    /// Catalog of the open version
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Records per cursor batch
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub(crate) fn staging(&self) -> &Staging {
        &self.staging
    }

    pub(crate) fn staging_mut(&mut self) -> &mut Staging {
        &mut self.staging
    }

    pub(crate) fn tree(&self, id: TreeId) -> Result<Arc<BTree>> {
        self.trees.tree(id)
    }

    /// Resolve a path to `(tree read from, store tree the records live in)`
    pub(crate) fn resolve(&self, path: &TreePath) -> Result<(Arc<BTree>, TreeId)> {
        let resolved = self.catalog.resolve(path)?;
        Ok((self.tree(resolved.tree())?, resolved.store.id))
    }

    /// Exact lookup: staging first, then the tree at the pinned sequence
    pub(crate) fn lookup(&self, tree: &BTree, key: &[Value]) -> Result<Option<TreeValue>> {
        match self.staging.get(tree.id(), key) {
            Some(staged) => Ok(staged.cloned()),
            None => tree.get(self.sequence(), key),
        }
    }

    /// Turn a tree value into the record it stands for
    ///
    /// Index entries are followed to the store; a dangling reference means
    /// the index and store disagree, which is corruption.
    pub(crate) fn resolve_value(&self, store: TreeId, value: TreeValue) -> Result<Record> {
        match value {
            TreeValue::Record(record) => Ok(record),
            TreeValue::Ref(primary) => {
                let tree = self.tree(store)?;
                match self.lookup(&tree, &primary)? {
                    Some(TreeValue::Record(record)) => Ok(record),
                    _ => Err(Error::corruption(format!(
                        "index entry references missing record {:?} in tree {}",
                        primary, store
                    ))),
                }
            }
        }
    }

    /// First record whose key starts with `key`
    ///
    /// A full-length key is an exact lookup; a shorter one (e.g. an index
    /// key without the primary key suffix) returns the first match in tree
    /// order.
    pub fn get(&self, path: &TreePath, key: &[Value]) -> Result<Option<Record>> {
        let (tree, store) = self.resolve(path)?;
        if key.len() >= tree.order().arity() {
            return match self.lookup(&tree, key)? {
                Some(value) => self.resolve_value(store, value).map(Some),
                None => Ok(None),
            };
        }

        let order = Arc::clone(tree.order());
        let mut cursor = Cursor::new(self.clone(), tree, store, Some(key.to_vec()));
        match cursor.next_entry()? {
            Some((found, record)) if order.compare_prefix(&found, key) == Ordering::Equal => {
                Ok(Some(record))
            }
            _ => Ok(None),
        }
    }

    /// Lazy merged scan of a store or index
    pub fn cursor(&self, path: &TreePath, from: Option<Key>) -> Result<Cursor> {
        let (tree, store) = self.resolve(path)?;
        Ok(Cursor::new(self.clone(), tree, store, from))
    }

    pub(crate) fn committed_cursor(&self, tree: &Arc<BTree>, from: Option<Key>, reverse: bool) -> tessera_storage::TreeCursor {
        tree.cursor(self.pin.clone(), from, reverse)
    }
}

impl std::fmt::Debug for ReadView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadView")
            .field("sequence", &self.sequence())
            .field("staging", &self.staging)
            .finish()
    }
}

/// Read operations shared by mutators and snapshots
pub trait Reader {
    /// The view reads are served from
    fn view(&self) -> &ReadView;

    /// Sequence the committed state is read at
    fn sequence(&self) -> u64 {
        self.view().sequence()
    }

    /// First record matching `key` in a store or index
    fn get(&self, path: impl Into<TreePath>, key: &[Value]) -> Result<Option<Record>> {
        self.view().get(&path.into(), key)
    }

    /// Merged scan of a store or index, optionally starting at `from`
    fn cursor(&self, path: impl Into<TreePath>, from: impl Into<Option<Key>>) -> Result<Cursor> {
        self.view().cursor(&path.into(), from.into())
    }
}
