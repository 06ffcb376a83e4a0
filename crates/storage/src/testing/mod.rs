//! Testing utilities for the tree engine
//!
//! - **Reference Model**: sorted in-memory copy of every committed version,
//!   for comparing lookups and cursors against the real tree

mod reference_model;

pub use reference_model::{ReferenceModel, StateMismatch};
