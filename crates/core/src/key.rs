//! Keys and key field declarations
//!
//! A key is the tuple of a record's key field values, in declaration order.
//! Store keys come from the store's declared fields; index keys are the
//! index fields followed by the store key, which keeps index keys unique.

use crate::comparator::DEFAULT_COMPARATOR;
use crate::error::{Error, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Composite key: one value per key field
pub type Key = Vec<Value>;

/// One declared key field: a field path and the comparator that orders it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyField {
    /// Field name, `.`-separated for nested objects
    pub field: String,
    /// Comparator name resolved through the comparator registry
    pub comparator: String,
}

impl KeyField {
    /// Key field with an explicit comparator
    pub fn new(field: impl Into<String>, comparator: impl Into<String>) -> Self {
        KeyField {
            field: field.into(),
            comparator: comparator.into(),
        }
    }

    /// Key field ordered by the default comparator
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new(field, DEFAULT_COMPARATOR)
    }
}

impl From<&str> for KeyField {
    fn from(field: &str) -> Self {
        KeyField::ascending(field)
    }
}

impl From<(&str, &str)> for KeyField {
    fn from((field, comparator): (&str, &str)) -> Self {
        KeyField::new(field, comparator)
    }
}

/// Extract a store key from a document
///
/// Every declared field must be present.
pub fn extract_key(document: &Value, fields: &[KeyField]) -> Result<Key> {
    fields
        .iter()
        .map(|f| {
            document.get_path(&f.field).cloned().ok_or_else(|| {
                Error::InvalidKey(format!("document is missing key field '{}'", f.field))
            })
        })
        .collect()
}

/// Extract an index key: index fields (missing ones as `Null`) then the
/// primary key.
pub fn extract_index_key(document: &Value, fields: &[KeyField], primary: &[Value]) -> Key {
    let mut key: Key = fields
        .iter()
        .map(|f| document.get_path(&f.field).cloned().unwrap_or(Value::Null))
        .collect();
    key.extend(primary.iter().cloned());
    key
}

/// Build a key from anything convertible into values
///
/// ```
/// use tessera_core::{key, Value};
/// assert_eq!(key![1, "a"], vec![Value::Int(1), Value::from("a")]);
/// ```
#[macro_export]
macro_rules! key {
    ($($v:expr),* $(,)?) => {
        vec![$($crate::Value::from($v)),*]
    };
}
