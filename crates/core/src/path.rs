//! Store and index addressing
//!
//! A `TreePath` names either a store (`"employees"`) or one of its indices
//! (`["employees", "state"]`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// Path to a store or to an index of a store
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TreePath {
    /// Store name
    pub store: String,
    /// Index name, `None` for the store itself
    pub index: Option<String>,
}

impl TreePath {
    /// Path to a store
    pub fn store(name: impl Into<String>) -> Self {
        TreePath {
            store: name.into(),
            index: None,
        }
    }

    /// Path to an index of a store
    pub fn index(store: impl Into<String>, index: impl Into<String>) -> Self {
        TreePath {
            store: store.into(),
            index: Some(index.into()),
        }
    }

    /// True when this path names an index
    pub fn is_index(&self) -> bool {
        self.index.is_some()
    }
}

impl From<&str> for TreePath {
    fn from(store: &str) -> Self {
        TreePath::store(store)
    }
}

impl From<String> for TreePath {
    fn from(store: String) -> Self {
        TreePath::store(store)
    }
}

impl From<[&str; 2]> for TreePath {
    fn from([store, index]: [&str; 2]) -> Self {
        TreePath::index(store, index)
    }
}

impl From<(&str, &str)> for TreePath {
    fn from((store, index): (&str, &str)) -> Self {
        TreePath::index(store, index)
    }
}

impl From<&TreePath> for TreePath {
    fn from(path: &TreePath) -> Self {
        path.clone()
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.index {
            Some(index) => write!(f, "{}.{}", self.store, index),
            None => write!(f, "{}", self.store),
        }
    }
}
