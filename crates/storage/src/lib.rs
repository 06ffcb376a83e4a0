//! Storage layer for Tessera
//!
//! This crate implements the persistent tree engine:
//! - Page format: checksummed fixed-size slots holding B-tree nodes
//! - BTree: copy-on-write batch merges publishing `(sequence, root)` versions
//! - TreeCursor: lazy bidirectional iteration with prefix seeks
//! - PageCache: LRU cache with pinning and dirty-page tracking
//! - PinRegistry: published sequence and snapshot pins gating page reuse
//! - TreeSet: every tree of one version directory, flushed together

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod btree;
pub mod cache;
pub mod page;
pub mod page_file;
pub mod pins;
pub mod testing;
pub mod trees;

pub use btree::{BTree, TreeCursor, TreeOp};
pub use cache::{CacheStats, PageCache, PageId};
pub use page::{Node, PageAddr, DEFAULT_PAGE_SIZE};
pub use pins::{PinRegistry, SequencePin};
pub use trees::{StorageConfig, TreeSet};
