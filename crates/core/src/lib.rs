//! Core types for Tessera
//!
//! This crate defines the foundational types used throughout the system:
//! - Value: Unified value enum for documents and key fields
//! - Key / KeyField: Composite keys and their declared fields
//! - ComparatorRegistry / KeyOrder: Named comparators and resolved key orders
//! - Record / TreeValue / Mutation: What trees store and what commits change
//! - TreePath: Store or index addressing
//! - Catalog / SchemaStep: Schema of one version and the migration interpreter
//! - Error: Error type shared by every crate

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod comparator;
pub mod error;
pub mod key;
pub mod path;
pub mod record;
pub mod schema;
pub mod value;

pub use comparator::{Comparator, ComparatorRegistry, KeyOrder, DEFAULT_COMPARATOR};
pub use error::{Error, Result};
pub use key::{extract_index_key, extract_key, Key, KeyField};
pub use path::TreePath;
pub use record::{Mutation, Op, Record, TreeValue};
pub use schema::{
    Catalog, IndexDef, MigrationPlan, ResolvedTree, SchemaEffect, SchemaStep, StoreDef, TreeId,
};
pub use value::Value;
