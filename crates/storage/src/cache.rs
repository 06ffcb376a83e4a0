//! Page cache shared by all trees of one database version
//!
//! Frames hold decoded nodes behind `Arc`, so a reader keeps its node alive
//! even after the frame is evicted. Eviction is least-recently-used among
//! frames that are neither pinned nor dirty; dirty frames are the only copy
//! of a page until the next flush writes them out.

use crate::page::{Node, PageAddr};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tessera_core::{Result, TreeId};
use tracing::{debug, trace};

/// Cache key: tree and slot
pub type PageId = (TreeId, PageAddr);

/// Default number of resident pages
pub const DEFAULT_CACHE_PAGES: usize = 4096;

struct Frame {
    node: Arc<Node>,
    pin_count: u32,
    dirty: bool,
    last_access: u64,
}

#[derive(Default)]
struct CacheInner {
    frames: FxHashMap<PageId, Frame>,
    access_counter: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl CacheInner {
    fn next_access(&mut self) -> u64 {
        self.access_counter += 1;
        self.access_counter
    }

    fn maybe_evict(&mut self, capacity: usize) {
        while self.frames.len() > capacity {
            let victim = self
                .frames
                .iter()
                .filter(|(_, f)| f.pin_count == 0 && !f.dirty)
                .min_by_key(|(_, f)| f.last_access)
                .map(|(&id, _)| id);

            match victim {
                Some(id) => {
                    self.frames.remove(&id);
                    self.evictions += 1;
                    trace!(target: "tessera::cache", tree = %id.0, page = %id.1, "Evicted page");
                }
                None => {
                    debug!(
                        target: "tessera::cache",
                        resident = self.frames.len(),
                        capacity,
                        "Cache over capacity with every page pinned or dirty"
                    );
                    break;
                }
            }
        }
    }
}

/// Cache counters and occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    /// Lookups served from memory
    pub hits: u64,
    /// Lookups that read the slot file
    pub misses: u64,
    /// Frames dropped to respect capacity
    pub evictions: u64,
    /// Frames currently resident
    pub resident: usize,
    /// Resident frames not yet written to disk
    pub dirty: usize,
    /// Resident frames with a non-zero pin count
    pub pinned: usize,
}

/// LRU page cache with pinning and dirty tracking
pub struct PageCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

impl PageCache {
    /// Cache holding up to `capacity` clean, unpinned pages
    pub fn new(capacity: usize) -> Self {
        PageCache {
            capacity: capacity.max(1),
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Configured capacity in pages
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Return the cached node, or load it with `load` and cache it
    ///
    /// `load` runs without the cache lock held.
    pub fn fetch<F>(&self, id: PageId, load: F) -> Result<Arc<Node>>
    where
        F: FnOnce() -> Result<Node>,
    {
        {
            let mut inner = self.inner.lock();
            let ts = inner.next_access();
            if let Some(frame) = inner.frames.get_mut(&id) {
                frame.last_access = ts;
                let node = Arc::clone(&frame.node);
                inner.hits += 1;
                return Ok(node);
            }
            inner.misses += 1;
        }

        let node = Arc::new(load()?);

        let mut inner = self.inner.lock();
        let ts = inner.next_access();
        // Another reader may have loaded the same page meanwhile
        let node = Arc::clone(
            &inner
                .frames
                .entry(id)
                .or_insert(Frame {
                    node,
                    pin_count: 0,
                    dirty: false,
                    last_access: ts,
                })
                .node,
        );
        inner.maybe_evict(self.capacity);
        Ok(node)
    }

    /// Insert a newly written page; it stays resident until flushed
    pub fn insert_dirty(&self, id: PageId, node: Arc<Node>) {
        let mut inner = self.inner.lock();
        let ts = inner.next_access();
        inner.frames.insert(
            id,
            Frame {
                node,
                pin_count: 0,
                dirty: true,
                last_access: ts,
            },
        );
        inner.maybe_evict(self.capacity);
    }

    /// Dirty pages of `tree`, in slot order
    pub fn dirty_pages(&self, tree: TreeId) -> Vec<(PageAddr, Arc<Node>)> {
        let inner = self.inner.lock();
        let mut pages: Vec<_> = inner
            .frames
            .iter()
            .filter(|((t, _), f)| *t == tree && f.dirty)
            .map(|((_, addr), f)| (*addr, Arc::clone(&f.node)))
            .collect();
        pages.sort_by_key(|(addr, _)| *addr);
        pages
    }

    /// Mark pages of `tree` as written
    pub fn mark_clean(&self, tree: TreeId, addrs: &[PageAddr]) {
        let mut inner = self.inner.lock();
        for addr in addrs {
            if let Some(frame) = inner.frames.get_mut(&(tree, *addr)) {
                frame.dirty = false;
            }
        }
        inner.maybe_evict(self.capacity);
    }

    /// Pin a resident page so it cannot be evicted
    ///
    /// Returns false when the page is not resident.
    pub fn pin(&self, id: PageId) -> bool {
        let mut inner = self.inner.lock();
        match inner.frames.get_mut(&id) {
            Some(frame) => {
                frame.pin_count += 1;
                true
            }
            None => false,
        }
    }

    /// Release one pin
    pub fn unpin(&self, id: PageId) {
        let mut inner = self.inner.lock();
        if let Some(frame) = inner.frames.get_mut(&id) {
            frame.pin_count = frame.pin_count.saturating_sub(1);
        }
        inner.maybe_evict(self.capacity);
    }

    /// Drop a page regardless of its state (the slot is being reused)
    pub fn invalidate(&self, id: PageId) {
        self.inner.lock().frames.remove(&id);
    }

    /// Drop every page of `tree`
    pub fn invalidate_tree(&self, tree: TreeId) {
        self.inner.lock().frames.retain(|(t, _), _| *t != tree);
    }

    /// True when the page is resident
    pub fn contains(&self, id: PageId) -> bool {
        self.inner.lock().frames.contains_key(&id)
    }

    /// Number of dirty pages across all trees
    pub fn dirty_count(&self) -> usize {
        self.inner.lock().frames.values().filter(|f| f.dirty).count()
    }

    /// Counters and occupancy
    pub fn stats(&self) -> CacheStats {
        let inner = self.inner.lock();
        CacheStats {
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
            resident: inner.frames.len(),
            dirty: inner.frames.values().filter(|f| f.dirty).count(),
            pinned: inner.frames.values().filter(|f| f.pin_count > 0).count(),
        }
    }
}

impl std::fmt::Debug for PageCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageCache")
            .field("capacity", &self.capacity)
            .field("stats", &self.stats())
            .finish()
    }
}
