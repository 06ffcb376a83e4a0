//! Schema migrations
//!
//! `Database::open` calls the user's upgrade callback once per pending
//! version with a [`Migration`] builder. The builder only records
//! declarative [`SchemaStep`]s; `Catalog::apply` interprets them and the
//! runner materializes the result as a new version directory.

mod runner;

pub(crate) use runner::{discard_stale, MigrationRunner};

use tessera_core::{Error, KeyField, Result, SchemaStep, TreePath, Value};

/// The version step being applied
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchemaVersion {
    /// Last persisted version
    pub current: u64,
    /// Version this step produces
    pub target: u64,
}

/// Records the schema steps of one version
///
/// ```ignore
/// let db = Database::open(config, |m| {
///     if m.version().target == 1 {
///         m.store("people", ["id"]);
///         m.index(("people", "state"), ["state"]);
///         m.set("people", json!({ "id": 1, "state": "CA" }));
///     }
///     Ok(())
/// })?;
/// ```
#[derive(Debug)]
pub struct Migration {
    version: SchemaVersion,
    steps: Vec<SchemaStep>,
    invalid: Option<String>,
}

impl Migration {
    pub(crate) fn new(version: SchemaVersion) -> Self {
        Migration {
            version,
            steps: Vec::new(),
            invalid: None,
        }
    }

    /// The step being applied
    pub fn version(&self) -> SchemaVersion {
        self.version
    }

    /// Create a store keyed by `key`, in sort priority
    pub fn store<K>(&mut self, name: impl Into<String>, key: impl IntoIterator<Item = K>) -> &mut Self
    where
        K: Into<KeyField>,
    {
        self.steps.push(SchemaStep::CreateStore {
            name: name.into(),
            key: key.into_iter().map(Into::into).collect(),
        });
        self
    }

    /// Create the index `path` (`[store, index]`) over `fields`
    pub fn index<K>(&mut self, path: impl Into<TreePath>, fields: impl IntoIterator<Item = K>) -> &mut Self
    where
        K: Into<KeyField>,
    {
        let path = path.into();
        match path.index {
            Some(name) => self.steps.push(SchemaStep::CreateIndex {
                store: path.store,
                name,
                fields: fields.into_iter().map(Into::into).collect(),
            }),
            None => self.reject(format!(
                "index path '{}' must name a store and an index",
                path.store
            )),
        }
        self
    }

    /// Rename a store, or an index within its store
    pub fn rename(&mut self, from: impl Into<TreePath>, to: impl Into<String>) -> &mut Self {
        self.steps.push(SchemaStep::Rename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    /// Seed a record into a store
    pub fn set(&mut self, store: impl Into<String>, document: impl Into<Value>) -> &mut Self {
        self.steps.push(SchemaStep::Seed {
            store: store.into(),
            document: document.into(),
        });
        self
    }

    /// Steps recorded so far
    pub fn steps(&self) -> &[SchemaStep] {
        &self.steps
    }

    fn reject(&mut self, message: String) {
        if self.invalid.is_none() {
            self.invalid = Some(message);
        }
    }

    pub(crate) fn into_steps(self) -> Result<Vec<SchemaStep>> {
        match self.invalid {
            Some(message) => Err(Error::Schema(message)),
            None => Ok(self.steps),
        }
    }
}
