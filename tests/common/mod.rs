//! Shared test utilities for the integration suite.
//!
//! Import via `#[path = "../common/mod.rs"] mod common;` from a suite's
//! main.rs.

#![allow(dead_code)]

use serde_json::json;
use std::path::Path;
pub use tessera::{
    key, Database, DatabaseConfig, Error, Key, Migration, Reader, Record, Result, Tuning, Value,
};
use tempfile::TempDir;

// ============================================================================
// Schema
// ============================================================================

/// v1: `one` (id), `people` (id) with index `state`, `states` (code).
pub fn schema(m: &mut Migration) -> Result<()> {
    if m.version().target == 1 {
        m.store("one", ["id"])
            .store("people", ["id"])
            .index(("people", "state"), ["state"])
            .store("states", ["code"]);
    }
    Ok(())
}

/// Build a document from JSON
pub fn doc(v: serde_json::Value) -> Value {
    Value::from(v)
}

pub fn person(id: i64, state: &str) -> Value {
    doc(json!({ "id": id, "state": state, "name": format!("person-{}", id) }))
}

pub fn int_field(record: &Record, field: &str) -> i64 {
    record.value.get_path(field).and_then(Value::as_int).unwrap_or(i64::MIN)
}

pub fn str_field(record: &Record, field: &str) -> String {
    record
        .value
        .get_path(field)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

// ============================================================================
// TestDb - database in a temporary directory
// ============================================================================

/// Test database wrapper that can close and reopen the same directory.
pub struct TestDb {
    pub db: Option<Database>,
    pub dir: TempDir,
}

impl TestDb {
    /// Open a fresh database with test tuning and the shared schema.
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("Failed to create temp dir");
        let db = open_at(dir.path()).expect("Failed to create test database");
        TestDb { db: Some(db), dir }
    }

    pub fn db(&self) -> &Database {
        self.db.as_ref().expect("database is open")
    }

    /// Close and reopen the directory.
    pub fn reopen(&mut self) {
        if let Some(db) = self.db.take() {
            db.close().expect("close");
        }
        self.db = Some(open_at(self.dir.path()).expect("reopen"));
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

pub fn test_config(dir: &Path) -> DatabaseConfig {
    DatabaseConfig::new(dir).with_tuning(Tuning::for_testing())
}

pub fn open_at(dir: &Path) -> Result<Database> {
    Database::open(test_config(dir), schema)
}

/// All records of a store or index, in cursor order
pub fn scan<R: Reader>(reader: &R, path: impl Into<tessera::TreePath>) -> Result<Vec<Record>> {
    reader.cursor(path, None)?.collect()
}
