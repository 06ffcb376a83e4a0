//! Tessera - embedded ordered document store
//!
//! Tessera keeps JSON-like documents in named stores ordered by declared key
//! fields, with secondary indices, snapshot-isolated readers, a single
//! serialized writer and a write-ahead log. Schemas are versioned and
//! migrated declaratively when the database is opened.
//!
//! # Quick Start
//!
//! ```ignore
//! use serde_json::json;
//! use tessera::{key, Database, DatabaseConfig, Value};
//!
//! let db = Database::open(DatabaseConfig::new("/tmp/people"), |m| {
//!     if m.version().target == 1 {
//!         m.store("people", ["id"]);
//!         m.index(("people", "state"), ["state"]);
//!     }
//!     Ok(())
//! })?;
//!
//! db.mutator(|m| m.set("people", Value::from(json!({ "id": 1, "state": "VA" }))))?;
//! let first_in_va = db.snapshot(|s| s.get(("people", "state"), &key!["VA"]))?;
//! db.close()?;
//! ```
//!
//! # Architecture
//!
//! The layers live in their own crates and are re-exported here:
//! core types, durability (WAL and version marker), storage (B-trees and
//! page cache), concurrency (transactions, cursors, joins) and the engine
//! (open, recovery, migrations).

pub use tessera_concurrency::{Cursor, Join, Mutator, Reader, Snapshot, TransactionMetrics, TransactionState};
pub use tessera_core::{
    key, Comparator, ComparatorRegistry, Error, Key, KeyField, Mutation, Op, Record, Result,
    TreeId, TreePath, TreeValue, Value,
};
pub use tessera_durability::DurabilityMode;
pub use tessera_engine::{
    Database, DatabaseConfig, Migration, RecoveryStats, SchemaVersion, Tuning, CONFIG_FILE_NAME,
};
pub use tessera_storage::CacheStats;
