//! Concurrency layer for Tessera
//!
//! This crate implements the MVCC transaction model:
//! - Staging: per-tree sorted overlay of uncommitted writes and tombstones
//! - ReadView / Reader: reads at a pinned sequence through staging
//! - Mutator / Snapshot: the single writer and any number of readers
//! - Cursor / Join: merged staged+committed scans and nested-loop joins
//! - TransactionManager: writer lock, commit pipeline, hooks, shutdown drain

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cursor;
pub mod manager;
pub mod staging;
pub mod transaction;
pub mod view;

pub use cursor::{Cursor, Join};
pub use manager::{
    CommitHook, TransactionConfig, TransactionManager, TransactionMetrics, DEFAULT_FLUSH_THRESHOLD,
};
pub use staging::{OrderedKey, StagedMap, Staging};
pub use transaction::{Mutator, Snapshot, TransactionState};
pub use view::{ReadView, Reader, DEFAULT_BATCH_SIZE};
