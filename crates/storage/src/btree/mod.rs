//! Copy-on-write B-tree
//!
//! A tree never modifies a written page. Each batch merge writes new pages
//! for the touched path, retires the replaced ones and publishes a new
//! `(sequence, root)` version. Readers resolve the root for their pinned
//! sequence and walk immutable pages from there.
//!
//! Retired slots return to the free list once they are older than both the
//! oldest pinned read sequence and the last flush.

mod cursor;
mod merge;

pub use cursor::TreeCursor;
pub use merge::TreeOp;

use crate::cache::PageCache;
use crate::page::{encode_page, entry_size, max_item_size, Node, PageAddr};
use crate::page_file::{PageFile, RootState};
use crate::pins::SequencePin;
use parking_lot::{Mutex, RwLock};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{Error, Key, KeyOrder, Result, TreeId, TreeValue, Value};
use tessera_durability::DatabasePaths;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Version {
    sequence: u64,
    root: Option<PageAddr>,
}

#[derive(Debug, Clone)]
struct WriteState {
    next_slot: u64,
    free: Vec<PageAddr>,
    /// `(sequence that replaced the page, slot)`
    retired: Vec<(u64, PageAddr)>,
    applied_sequence: u64,
    durable_sequence: u64,
}

/// One persistent ordered tree
pub struct BTree {
    id: TreeId,
    order: Arc<KeyOrder>,
    file: PageFile,
    root_path: PathBuf,
    cache: Arc<PageCache>,
    versions: RwLock<VecDeque<Version>>,
    state: Mutex<WriteState>,
}

impl BTree {
    /// Open the tree stored in `dir`, creating it if absent
    ///
    /// A new tree records `sequence` as already applied, so replay never
    /// feeds it commits from before its creation.
    pub fn open(
        id: TreeId,
        order: Arc<KeyOrder>,
        dir: &Path,
        cache: Arc<PageCache>,
        page_size: usize,
        sequence: u64,
    ) -> Result<Self> {
        let root_path = DatabasePaths::root_file(dir, id);
        let existing = if root_path.exists() {
            Some(RootState::load(&root_path)?)
        } else {
            None
        };
        let page_size = existing.as_ref().map_or(page_size, |s| s.page_size);
        let file = PageFile::open(&DatabasePaths::pages_file(dir, id), page_size)?;

        let root_state = match existing {
            Some(state) => state,
            None => {
                let state = RootState::empty(page_size, sequence);
                state.persist(&root_path)?;
                debug!(target: "tessera::btree", tree = %id, "Created tree");
                state
            }
        };

        // No reader survives a restart: every retired slot is free
        let mut free = root_state.free;
        free.extend(root_state.retired);

        let version = Version {
            sequence: root_state.applied_sequence,
            root: root_state.root,
        };
        Ok(BTree {
            id,
            order,
            file,
            root_path,
            cache,
            versions: RwLock::new(VecDeque::from(vec![version])),
            state: Mutex::new(WriteState {
                next_slot: root_state.next_slot,
                free,
                retired: Vec::new(),
                applied_sequence: root_state.applied_sequence,
                durable_sequence: root_state.applied_sequence,
            }),
        })
    }

    /// Tree identifier
    pub fn id(&self) -> TreeId {
        self.id
    }

    /// Key order of this tree
    pub fn order(&self) -> &Arc<KeyOrder> {
        &self.order
    }

    /// Page size of this tree
    pub fn page_size(&self) -> usize {
        self.file.page_size()
    }

    /// Shared page cache
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Highest sequence merged into this tree
    pub fn applied_sequence(&self) -> u64 {
        self.state.lock().applied_sequence
    }

    /// Sequence of the last flushed root
    pub fn durable_sequence(&self) -> u64 {
        self.state.lock().durable_sequence
    }

    /// Number of versions still retained for readers
    pub fn version_count(&self) -> usize {
        self.versions.read().len()
    }

    /// Root page as of `sequence`
    pub fn root_at(&self, sequence: u64) -> Option<PageAddr> {
        let versions = self.versions.read();
        versions
            .iter()
            .rev()
            .find(|v| v.sequence <= sequence)
            .or_else(|| versions.front())
            .and_then(|v| v.root)
    }

    fn latest_root(&self) -> Option<PageAddr> {
        self.versions.read().back().and_then(|v| v.root)
    }

    pub(crate) fn load(&self, addr: PageAddr) -> Result<Arc<Node>> {
        self.cache.fetch((self.id, addr), || self.file.read(addr))
    }

    /// Largest encoded `(key, value)` entry a page holds
    pub fn max_entry_size(&self) -> usize {
        max_item_size(self.page_size())
    }

    /// Reject entries that cannot fit in a single page
    pub fn check_entry(&self, key: &Key, value: &TreeValue) -> Result<()> {
        let size = entry_size(key, value)?;
        let max = self.max_entry_size();
        if size > max {
            return Err(Error::EntryTooLarge { size, max });
        }
        Ok(())
    }

    /// Exact-match lookup as of `sequence`
    ///
    /// The caller must hold a pin at or below `sequence`.
    pub fn get(&self, sequence: u64, key: &[Value]) -> Result<Option<TreeValue>> {
        let Some(mut addr) = self.root_at(sequence) else {
            return Ok(None);
        };
        loop {
            let node = self.load(addr)?;
            match &*node {
                Node::Branch { children } => {
                    if children.is_empty() {
                        return Err(Error::Corruption(format!(
                            "empty branch {} in tree {}",
                            addr, self.id
                        )));
                    }
                    addr = children[Node::child_for(children, &self.order, key)].1;
                }
                Node::Leaf { entries } => {
                    return Ok(entries
                        .binary_search_by(|(k, _)| self.order.compare(k, key))
                        .ok()
                        .map(|i| entries[i].1.clone()));
                }
            }
        }
    }

    /// Lazy cursor over the version pinned by `pin`
    ///
    /// Forward cursors start at the first key whose prefix is at or after
    /// `from`; reverse cursors start at the last key whose prefix is at or
    /// before it. Without `from` they cover the whole tree.
    pub fn cursor(self: &Arc<Self>, pin: SequencePin, from: Option<Key>, reverse: bool) -> TreeCursor {
        TreeCursor::new(Arc::clone(self), pin, from, reverse)
    }

    fn reclaim(&self, state: &mut WriteState, pin_horizon: u64) -> usize {
        let horizon = pin_horizon.min(state.durable_sequence);
        let (ready, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut state.retired)
            .into_iter()
            .partition(|(seq, _)| *seq <= horizon);
        state.retired = pending;
        for (_, addr) in &ready {
            self.cache.invalidate((self.id, *addr));
            state.free.push(*addr);
        }
        ready.len()
    }

    fn prune_versions(&self, pin_horizon: u64) {
        let mut versions = self.versions.write();
        while versions.len() > 1 && versions[1].sequence <= pin_horizon {
            versions.pop_front();
        }
    }

    /// Write dirty pages and replace the root file
    ///
    /// Returns the number of pages written.
    pub fn flush(&self, durable_sequence: u64) -> Result<usize> {
        let mut state = self.state.lock();
        let dirty = self.cache.dirty_pages(self.id);
        if dirty.is_empty() && state.durable_sequence >= durable_sequence {
            return Ok(0);
        }
        debug_assert!(durable_sequence >= state.applied_sequence);

        let page_size = self.page_size();
        for (addr, node) in &dirty {
            self.file.write(*addr, &encode_page(node, page_size)?)?;
        }
        if !dirty.is_empty() {
            self.file.sync()?;
        }

        let root_state = RootState {
            page_size,
            root: self.latest_root(),
            next_slot: state.next_slot,
            free: state.free.clone(),
            retired: state.retired.iter().map(|(_, addr)| *addr).collect(),
            applied_sequence: durable_sequence,
        };
        root_state.persist(&self.root_path)?;

        let addrs: Vec<PageAddr> = dirty.iter().map(|(addr, _)| *addr).collect();
        self.cache.mark_clean(self.id, &addrs);
        state.durable_sequence = durable_sequence;

        debug!(
            target: "tessera::btree",
            tree = %self.id,
            pages = addrs.len(),
            durable_sequence,
            "Flushed tree"
        );
        Ok(addrs.len())
    }

    /// Slot accounting: `(next_slot, free, retired)`
    pub fn slot_usage(&self) -> (u64, usize, usize) {
        let state = self.state.lock();
        (state.next_slot, state.free.len(), state.retired.len())
    }
}

impl std::fmt::Debug for BTree {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BTree")
            .field("id", &self.id)
            .field("page_size", &self.page_size())
            .field("root", &self.latest_root())
            .finish()
    }
}
