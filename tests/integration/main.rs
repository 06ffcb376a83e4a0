//! Integration Tests
//!
//! Cross-layer tests through the public `tessera` API:
//! - Properties: visibility, read-your-writes, rollback, index determinism
//! - Cursors: merged staged/committed scans, reverse, batches, joins
//! - Lifecycle: close, reopen, crash-style reopen, migrations
//! - Model: random mutator programs checked against an in-memory model

#[path = "../common/mod.rs"]
mod common;

mod cursors;
mod lifecycle;
mod model;
mod properties;
