//! Named field comparators
//!
//! Every key field of a store or index names the comparator that orders it.
//! The registry resolves those names once, when the catalog is loaded, into a
//! [`KeyOrder`] that the B-tree and the staging layer use for every key
//! comparison.
//!
//! Built-in names:
//!
//! | Name | Order |
//! |------|-------|
//! | `default`, `number`, `text`, `bytes`, `bool` | ascending canonical order |
//! | `text_desc` | descending canonical order |
//!
//! `text` sorts the lower value first. User comparators registered under an
//! existing name replace the built-in one.

use crate::error::{Error, Result};
use crate::key::KeyField;
use crate::value::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// A three-way comparison between two key field values
pub type Comparator = Arc<dyn Fn(&Value, &Value) -> Ordering + Send + Sync>;

/// Name of the comparator used when a key field does not name one
pub const DEFAULT_COMPARATOR: &str = "default";

/// Registry of comparators by name
#[derive(Clone)]
pub struct ComparatorRegistry {
    comparators: HashMap<String, Comparator>,
}

impl ComparatorRegistry {
    /// Registry holding only the built-in comparators
    pub fn new() -> Self {
        let mut comparators: HashMap<String, Comparator> = HashMap::new();
        let ascending: Comparator = Arc::new(|l: &Value, r: &Value| l.canonical_cmp(r));
        for name in [DEFAULT_COMPARATOR, "number", "text", "bytes", "bool"] {
            comparators.insert(name.to_string(), Arc::clone(&ascending));
        }
        comparators.insert(
            "text_desc".to_string(),
            Arc::new(|l: &Value, r: &Value| r.canonical_cmp(l)),
        );
        ComparatorRegistry { comparators }
    }

    /// Register (or replace) a named comparator
    pub fn register<F>(&mut self, name: impl Into<String>, cmp: F)
    where
        F: Fn(&Value, &Value) -> Ordering + Send + Sync + 'static,
    {
        self.comparators.insert(name.into(), Arc::new(cmp));
    }

    /// Register an already shared comparator
    pub fn register_shared(&mut self, name: impl Into<String>, cmp: Comparator) {
        self.comparators.insert(name.into(), cmp);
    }

    /// Look up a comparator by name
    pub fn get(&self, name: &str) -> Result<Comparator> {
        self.comparators
            .get(name)
            .cloned()
            .ok_or_else(|| Error::schema(format!("unknown comparator '{}'", name)))
    }

    /// Check whether a comparator is registered
    pub fn contains(&self, name: &str) -> bool {
        self.comparators.contains_key(name)
    }

    /// Resolve key fields into a key order
    pub fn resolve(&self, fields: &[KeyField]) -> Result<KeyOrder> {
        let comparators = fields
            .iter()
            .map(|f| self.get(&f.comparator))
            .collect::<Result<Vec<_>>>()?;
        Ok(KeyOrder { comparators })
    }
}

impl Default for ComparatorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ComparatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.comparators.keys().collect();
        names.sort();
        f.debug_struct("ComparatorRegistry")
            .field("names", &names)
            .finish()
    }
}

/// Resolved per-field comparators of one tree
///
/// Keys compare lexicographically field by field. When every shared field is
/// equal the shorter key sorts first, so a key prefix sorts before all of its
/// extensions.
#[derive(Clone)]
pub struct KeyOrder {
    comparators: Vec<Comparator>,
}

impl KeyOrder {
    /// Build an order from explicit comparators
    pub fn new(comparators: Vec<Comparator>) -> Self {
        KeyOrder { comparators }
    }

    /// Canonical ascending order for `arity` fields
    pub fn canonical(arity: usize) -> Self {
        let cmp: Comparator = Arc::new(|l: &Value, r: &Value| l.canonical_cmp(r));
        KeyOrder {
            comparators: vec![cmp; arity],
        }
    }

    /// Number of fields this order knows comparators for
    pub fn arity(&self) -> usize {
        self.comparators.len()
    }

    /// Concatenate two orders (index fields followed by primary key fields)
    pub fn concat(&self, suffix: &KeyOrder) -> KeyOrder {
        let mut comparators = self.comparators.clone();
        comparators.extend(suffix.comparators.iter().cloned());
        KeyOrder { comparators }
    }

    fn field_cmp(&self, idx: usize, a: &Value, b: &Value) -> Ordering {
        match self.comparators.get(idx) {
            Some(cmp) => cmp(a, b),
            None => a.canonical_cmp(b),
        }
    }

    /// Compare two full keys
    pub fn compare(&self, a: &[Value], b: &[Value]) -> Ordering {
        for (idx, (x, y)) in a.iter().zip(b.iter()).enumerate() {
            let ord = self.field_cmp(idx, x, y);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        a.len().cmp(&b.len())
    }

    /// Compare `key` against `prefix` over the prefix's fields only
    ///
    /// Returns `Equal` when `key` starts with `prefix`.
    pub fn compare_prefix(&self, key: &[Value], prefix: &[Value]) -> Ordering {
        for (idx, (x, y)) in key.iter().zip(prefix.iter()).enumerate() {
            let ord = self.field_cmp(idx, x, y);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        if key.len() < prefix.len() {
            Ordering::Less
        } else {
            Ordering::Equal
        }
    }
}

impl fmt::Debug for KeyOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyOrder")
            .field("arity", &self.comparators.len())
            .finish()
    }
}
