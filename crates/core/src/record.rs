//! Records, tree values and mutations
//!
//! - `Record`: a stored document with its creation and modification sequence
//! - `TreeValue`: what a B-tree leaf holds (a record, or an index reference)
//! - `Mutation`: one staged or logged change to one tree

use crate::key::Key;
use crate::schema::TreeId;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A document stored in a store
///
/// `created_index <= modified_index` always holds: `created_index` is the
/// sequence of the mutator that first inserted the key, `modified_index` the
/// sequence of the last one that wrote it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// The document
    pub value: Value,
    /// Sequence at first insert
    pub created_index: u64,
    /// Sequence at last write
    pub modified_index: u64,
}

impl Record {
    /// Create a record written for the first time at `sequence`
    pub fn new(value: Value, sequence: u64) -> Self {
        Record {
            value,
            created_index: sequence,
            modified_index: sequence,
        }
    }

    /// Replace the document, keeping the creation sequence
    pub fn overwrite(&self, value: Value, sequence: u64) -> Self {
        Record {
            value,
            created_index: self.created_index,
            modified_index: sequence,
        }
    }
}

/// Value stored in a B-tree leaf
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeValue {
    /// Primary store entry
    Record(Record),
    /// Index entry: primary key of the referenced record
    Ref(Key),
}

impl TreeValue {
    /// The record, if this is a store entry
    pub fn as_record(&self) -> Option<&Record> {
        match self {
            TreeValue::Record(r) => Some(r),
            TreeValue::Ref(_) => None,
        }
    }

    /// The referenced primary key, if this is an index entry
    pub fn as_ref_key(&self) -> Option<&Key> {
        match self {
            TreeValue::Ref(k) => Some(k),
            TreeValue::Record(_) => None,
        }
    }
}

/// Operation of a mutation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Op {
    /// Insert or overwrite
    Set(TreeValue),
    /// Tombstone
    Unset,
}

impl Op {
    /// True for tombstones
    pub fn is_unset(&self) -> bool {
        matches!(self, Op::Unset)
    }
}

/// One change to one tree, as staged by a mutator and logged in the WAL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mutation {
    /// Target store or index tree
    pub tree: TreeId,
    /// Key within the tree
    pub key: Key,
    /// Set or unset
    pub op: Op,
}

impl Mutation {
    /// A set mutation
    pub fn set(tree: TreeId, key: Key, value: TreeValue) -> Self {
        Mutation {
            tree,
            key,
            op: Op::Set(value),
        }
    }

    /// An unset mutation
    pub fn unset(tree: TreeId, key: Key) -> Self {
        Mutation {
            tree,
            key,
            op: Op::Unset,
        }
    }
}
