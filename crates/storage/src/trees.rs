//! The set of trees of one database version
//!
//! A `TreeSet` owns every tree stored in a version directory, the page
//! cache they share and the pin registry that guards their old versions.
//! Commits arrive as flat mutation lists and are routed to their trees.

use crate::btree::{BTree, TreeOp};
use crate::cache::{CacheStats, PageCache, DEFAULT_CACHE_PAGES};
use crate::page::{DEFAULT_PAGE_SIZE, MIN_PAGE_SIZE};
use crate::pins::PinRegistry;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tessera_core::{Error, KeyOrder, Mutation, Op, Result, TreeId};
use tracing::{debug, info};

/// Page and cache sizing
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Page size for newly created trees
    pub page_size: usize,
    /// Clean pages kept resident
    pub cache_pages: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            page_size: DEFAULT_PAGE_SIZE,
            cache_pages: DEFAULT_CACHE_PAGES,
        }
    }
}

impl StorageConfig {
    /// Small pages so tests exercise splits
    pub fn for_testing() -> Self {
        StorageConfig {
            page_size: 512,
            cache_pages: 64,
        }
    }

    /// Builder: page size
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    /// Builder: cache capacity
    pub fn with_cache_pages(mut self, cache_pages: usize) -> Self {
        self.cache_pages = cache_pages;
        self
    }

    /// Check limits
    pub fn validate(&self) -> Result<()> {
        if self.page_size < MIN_PAGE_SIZE {
            return Err(Error::Config(format!(
                "page_size {} is below the minimum of {}",
                self.page_size, MIN_PAGE_SIZE
            )));
        }
        if self.cache_pages == 0 {
            return Err(Error::Config("cache_pages must be at least 1".into()));
        }
        Ok(())
    }
}

/// All trees of one version directory
pub struct TreeSet {
    dir: PathBuf,
    config: StorageConfig,
    cache: Arc<PageCache>,
    pins: Arc<PinRegistry>,
    trees: RwLock<FxHashMap<TreeId, Arc<BTree>>>,
}

impl TreeSet {
    /// Open the listed trees in `dir`, creating any that do not exist yet
    pub fn open(
        dir: &Path,
        orders: impl IntoIterator<Item = (TreeId, Arc<KeyOrder>)>,
        config: StorageConfig,
        pins: Arc<PinRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(dir)?;
        let cache = Arc::new(PageCache::new(config.cache_pages));
        let created_at = pins.published();

        let mut trees = FxHashMap::default();
        for (id, order) in orders {
            let tree = BTree::open(
                id,
                order,
                dir,
                Arc::clone(&cache),
                config.page_size,
                created_at,
            )?;
            trees.insert(id, Arc::new(tree));
        }
        info!(
            target: "tessera::storage",
            dir = %dir.display(),
            trees = trees.len(),
            "Opened tree set"
        );

        Ok(TreeSet {
            dir: dir.to_path_buf(),
            config,
            cache,
            pins,
            trees: RwLock::new(trees),
        })
    }

    /// Version directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sizing in effect
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Shared pin registry
    pub fn pins(&self) -> &Arc<PinRegistry> {
        &self.pins
    }

    /// Shared page cache
    pub fn cache(&self) -> &Arc<PageCache> {
        &self.cache
    }

    /// Cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Create a new empty tree
    pub fn create_tree(&self, id: TreeId, order: Arc<KeyOrder>) -> Result<Arc<BTree>> {
        let mut trees = self.trees.write();
        if trees.contains_key(&id) {
            return Err(Error::schema(format!("tree {} already exists", id)));
        }
        let tree = Arc::new(BTree::open(
            id,
            order,
            &self.dir,
            Arc::clone(&self.cache),
            self.config.page_size,
            self.pins.published(),
        )?);
        trees.insert(id, Arc::clone(&tree));
        Ok(tree)
    }

    /// Look up a tree
    pub fn tree(&self, id: TreeId) -> Result<Arc<BTree>> {
        self.trees
            .read()
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::UnknownTree(format!("tree {}", id)))
    }

    /// Identifiers of all trees, sorted
    pub fn tree_ids(&self) -> Vec<TreeId> {
        let mut ids: Vec<TreeId> = self.trees.read().keys().copied().collect();
        ids.sort();
        ids
    }

    /// Merge one commit into its trees
    ///
    /// Returns the number of trees that changed. Trees that already reflect
    /// `sequence` are skipped.
    pub fn merge(&self, sequence: u64, mutations: &[Mutation]) -> Result<usize> {
        let mut by_tree: FxHashMap<TreeId, Vec<TreeOp>> = FxHashMap::default();
        for m in mutations {
            let value = match &m.op {
                Op::Set(value) => Some(value.clone()),
                Op::Unset => None,
            };
            by_tree.entry(m.tree).or_default().push((m.key.clone(), value));
        }

        let mut ids: Vec<TreeId> = by_tree.keys().copied().collect();
        ids.sort();

        let pin_horizon = self.pins.horizon();
        let mut changed = 0;
        for id in ids {
            let tree = self.tree(id)?;
            let ops = by_tree.remove(&id).unwrap_or_default();
            if tree.merge(sequence, ops, pin_horizon)? {
                changed += 1;
            }
        }
        Ok(changed)
    }

    /// Flush every tree as of `durable_sequence`
    ///
    /// The caller must have made the WAL durable through that sequence.
    pub fn flush(&self, durable_sequence: u64) -> Result<usize> {
        let trees: Vec<Arc<BTree>> = self.trees.read().values().cloned().collect();
        let mut pages = 0;
        for tree in trees {
            pages += tree.flush(durable_sequence)?;
        }
        if pages > 0 {
            debug!(
                target: "tessera::storage",
                pages,
                durable_sequence,
                "Flushed tree set"
            );
        }
        Ok(pages)
    }

    /// Highest sequence merged into any tree
    pub fn applied_sequence(&self) -> u64 {
        self.trees
            .read()
            .values()
            .map(|t| t.applied_sequence())
            .max()
            .unwrap_or(0)
    }

    /// Lowest sequence flushed by every tree
    pub fn durable_sequence(&self) -> u64 {
        self.trees
            .read()
            .values()
            .map(|t| t.durable_sequence())
            .min()
            .unwrap_or(0)
    }

    /// Pages written since the last flush
    pub fn dirty_pages(&self) -> usize {
        self.cache.dirty_count()
    }
}

impl std::fmt::Debug for TreeSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TreeSet")
            .field("dir", &self.dir)
            .field("trees", &self.tree_ids())
            .finish()
    }
}
