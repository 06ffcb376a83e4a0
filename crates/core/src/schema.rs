//! Schema catalog and migration step interpreter
//!
//! The catalog lists every store and index of one schema version, with the
//! `TreeId` of the B-tree that holds it. Migrations are recorded as a list of
//! [`SchemaStep`]s; [`Catalog::apply`] interprets them against a copy of the
//! catalog and returns the next catalog together with the physical work
//! ([`SchemaEffect`]) the engine must carry out. Nothing here touches disk.

use crate::comparator::{ComparatorRegistry, KeyOrder};
use crate::error::{Error, Result};
use crate::key::{extract_key, KeyField};
use crate::path::TreePath;
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

/// Identifier of one B-tree (a store or an index)
///
/// Ids are never reused within a database, so a renamed store keeps its tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TreeId(pub u32);

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Secondary index definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    /// Tree holding the index entries
    pub id: TreeId,
    /// Indexed fields; the store key is appended to every entry
    pub fields: Vec<KeyField>,
}

/// Store definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreDef {
    /// Tree holding the records
    pub id: TreeId,
    /// Declared key fields, in sort priority
    pub key: Vec<KeyField>,
    /// Indices by name
    pub indices: BTreeMap<String, IndexDef>,
}

/// A store or index resolved from a [`TreePath`]
#[derive(Debug, Clone, Copy)]
pub struct ResolvedTree<'a> {
    /// The store the path belongs to
    pub store: &'a StoreDef,
    /// The index, when the path names one
    pub index: Option<&'a IndexDef>,
}

impl ResolvedTree<'_> {
    /// Tree the path reads from
    pub fn tree(&self) -> TreeId {
        match self.index {
            Some(index) => index.id,
            None => self.store.id,
        }
    }
}

/// One declarative migration step
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaStep {
    /// Create a store with the given key fields
    CreateStore {
        /// Store name
        name: String,
        /// Key fields
        key: Vec<KeyField>,
    },
    /// Create an index over an existing store
    CreateIndex {
        /// Store name
        store: String,
        /// Index name
        name: String,
        /// Indexed fields
        fields: Vec<KeyField>,
    },
    /// Rename a store, or an index within its store
    Rename {
        /// Current path
        from: TreePath,
        /// New name (store name, or index name within the same store)
        to: String,
    },
    /// Write a record into a store
    Seed {
        /// Store name
        store: String,
        /// Document to write
        document: Value,
    },
}

/// Physical work produced by interpreting migration steps
#[derive(Debug, Clone, PartialEq)]
pub enum SchemaEffect {
    /// Create an empty tree
    CreateTree(TreeId),
    /// Populate an index by scanning its store
    BuildIndex {
        /// Source store tree
        store: TreeId,
        /// Index tree to fill
        index: TreeId,
    },
    /// Write a record (maintaining the store's indices)
    Seed {
        /// Target store tree
        store: TreeId,
        /// Document to write
        document: Value,
    },
}

/// Result of applying one version's steps
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    /// Catalog of the new version
    pub catalog: Catalog,
    /// Work to materialize, in step order
    pub effects: Vec<SchemaEffect>,
}

/// Stores and indices of one schema version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    version: u64,
    next_tree_id: u32,
    stores: BTreeMap<String, StoreDef>,
}

impl Catalog {
    /// Empty catalog at version 0 (a fresh database)
    pub fn new() -> Self {
        Catalog {
            version: 0,
            next_tree_id: 1,
            stores: BTreeMap::new(),
        }
    }

    /// Schema version this catalog describes
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Store definitions by name
    pub fn stores(&self) -> &BTreeMap<String, StoreDef> {
        &self.stores
    }

    /// Look up a store by name
    pub fn store(&self, name: &str) -> Result<&StoreDef> {
        self.stores
            .get(name)
            .ok_or_else(|| Error::UnknownTree(name.to_string()))
    }

    /// Find the store owning a tree, with its name
    pub fn store_by_id(&self, id: TreeId) -> Option<(&str, &StoreDef)> {
        self.stores
            .iter()
            .find(|(_, s)| s.id == id)
            .map(|(n, s)| (n.as_str(), s))
    }

    /// Resolve a store or index path
    pub fn resolve(&self, path: &TreePath) -> Result<ResolvedTree<'_>> {
        let store = self
            .stores
            .get(&path.store)
            .ok_or_else(|| Error::UnknownTree(path.to_string()))?;
        let index = match &path.index {
            Some(name) => Some(
                store
                    .indices
                    .get(name)
                    .ok_or_else(|| Error::UnknownTree(path.to_string()))?,
            ),
            None => None,
        };
        Ok(ResolvedTree { store, index })
    }

    /// Every tree id in the catalog
    pub fn tree_ids(&self) -> Vec<TreeId> {
        let mut ids = Vec::new();
        for store in self.stores.values() {
            ids.push(store.id);
            ids.extend(store.indices.values().map(|i| i.id));
        }
        ids.sort();
        ids
    }

    /// Resolve the key order of every tree
    ///
    /// An index orders by its own fields followed by its store's key fields.
    pub fn key_orders(&self, registry: &ComparatorRegistry) -> Result<HashMap<TreeId, Arc<KeyOrder>>> {
        let mut orders = HashMap::new();
        for store in self.stores.values() {
            let primary = registry.resolve(&store.key)?;
            for index in store.indices.values() {
                let order = registry.resolve(&index.fields)?.concat(&primary);
                orders.insert(index.id, Arc::new(order));
            }
            orders.insert(store.id, Arc::new(primary));
        }
        Ok(orders)
    }

    /// Serialize for `catalog.json`
    pub fn to_json(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec_pretty(self)?)
    }

    /// Parse `catalog.json`
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes).map_err(|e| Error::corruption(format!("catalog: {}", e)))
    }

    fn allocate(&mut self) -> TreeId {
        let id = TreeId(self.next_tree_id);
        self.next_tree_id += 1;
        id
    }

    /// Interpret the steps of migration `version` against a copy of this
    /// catalog.
    ///
    /// Fails with [`Error::Schema`] (or [`Error::InvalidKey`] for a seed
    /// missing its key) without changing `self`.
    pub fn apply(
        &self,
        version: u64,
        steps: &[SchemaStep],
        registry: &ComparatorRegistry,
    ) -> Result<MigrationPlan> {
        if version != self.version + 1 {
            return Err(Error::schema(format!(
                "cannot migrate from version {} to {}",
                self.version, version
            )));
        }
        let mut next = self.clone();
        next.version = version;
        let mut effects = Vec::new();
        for step in steps {
            next.apply_step(step, registry, &mut effects)?;
        }
        Ok(MigrationPlan {
            catalog: next,
            effects,
        })
    }

    fn apply_step(
        &mut self,
        step: &SchemaStep,
        registry: &ComparatorRegistry,
        effects: &mut Vec<SchemaEffect>,
    ) -> Result<()> {
        match step {
            SchemaStep::CreateStore { name, key } => {
                check_name(name)?;
                if key.is_empty() {
                    return Err(Error::schema(format!("store '{}' needs at least one key field", name)));
                }
                check_comparators(registry, key)?;
                if self.stores.contains_key(name) {
                    return Err(Error::schema(format!("store '{}' already exists", name)));
                }
                let id = self.allocate();
                self.stores.insert(
                    name.clone(),
                    StoreDef {
                        id,
                        key: key.clone(),
                        indices: BTreeMap::new(),
                    },
                );
                effects.push(SchemaEffect::CreateTree(id));
            }
            SchemaStep::CreateIndex {
                store,
                name,
                fields,
            } => {
                check_name(name)?;
                if fields.is_empty() {
                    return Err(Error::schema(format!("index '{}' needs at least one field", name)));
                }
                check_comparators(registry, fields)?;
                let id = self.allocate();
                let def = self.stores.get_mut(store).ok_or_else(|| {
                    Error::schema(format!("cannot index unknown store '{}'", store))
                })?;
                if def.indices.contains_key(name) {
                    return Err(Error::schema(format!(
                        "index '{}' already exists on store '{}'",
                        name, store
                    )));
                }
                def.indices.insert(
                    name.clone(),
                    IndexDef {
                        id,
                        fields: fields.clone(),
                    },
                );
                effects.push(SchemaEffect::CreateTree(id));
                effects.push(SchemaEffect::BuildIndex {
                    store: def.id,
                    index: id,
                });
            }
            SchemaStep::Rename { from, to } => {
                check_name(to)?;
                match &from.index {
                    None => {
                        if self.stores.contains_key(to) {
                            return Err(Error::schema(format!("store '{}' already exists", to)));
                        }
                        let def = self.stores.remove(&from.store).ok_or_else(|| {
                            Error::schema(format!("cannot rename unknown store '{}'", from.store))
                        })?;
                        self.stores.insert(to.clone(), def);
                    }
                    Some(index) => {
                        let def = self.stores.get_mut(&from.store).ok_or_else(|| {
                            Error::schema(format!("cannot rename index of unknown store '{}'", from.store))
                        })?;
                        if def.indices.contains_key(to) {
                            return Err(Error::schema(format!(
                                "index '{}' already exists on store '{}'",
                                to, from.store
                            )));
                        }
                        let index_def = def.indices.remove(index).ok_or_else(|| {
                            Error::schema(format!("cannot rename unknown index '{}'", from))
                        })?;
                        def.indices.insert(to.clone(), index_def);
                    }
                }
            }
            SchemaStep::Seed { store, document } => {
                let def = self.stores.get(store).ok_or_else(|| {
                    Error::schema(format!("cannot seed unknown store '{}'", store))
                })?;
                extract_key(document, &def.key)?;
                effects.push(SchemaEffect::Seed {
                    store: def.id,
                    document: document.clone(),
                });
            }
        }
        Ok(())
    }
}

impl Default for Catalog {
    fn default() -> Self {
        Self::new()
    }
}

fn check_name(name: &str) -> Result<()> {
    if name.is_empty() || name.contains('.') {
        return Err(Error::schema(format!("invalid name '{}'", name)));
    }
    Ok(())
}

fn check_comparators(registry: &ComparatorRegistry, fields: &[KeyField]) -> Result<()> {
    for field in fields {
        registry.get(&field.comparator)?;
    }
    Ok(())
}
