//! Materializes one schema version step
//!
//! ```text
//! stores/migrate-<n+1>/   <- tree files copied from versions/<n>/
//!   new trees created, indices built, seeds written, all flushed,
//!   catalog.json written
//! rename -> versions/<n+1>/
//! CURRENT <- n+1           (the switch; atomic replace)
//! remove versions/<n>/
//! ```
//!
//! Until `CURRENT` is replaced the old version is untouched, so a failure or
//! crash anywhere before that leaves the database at version `n`. Leftover
//! directories are removed by [`discard_stale`] on the next open.

use super::{Migration, SchemaVersion};
use crate::database::config::Tuning;
use std::path::Path;
use std::sync::Arc;
use tessera_concurrency::TransactionManager;
use tessera_core::{
    extract_index_key, Catalog, ComparatorRegistry, Error, MigrationPlan, Mutation, Result,
    SchemaEffect, TreeId, TreeValue, Value,
};
use tessera_durability::{sync_dir, write_atomic, DatabasePaths, DurabilityMode, VersionMarker, WalWriter};
use tessera_storage::{PinRegistry, TreeSet};
use tracing::{debug, info, warn};

/// Scratch WAL for seed commits, inside the staging directory
const SEED_WAL_DIR: &str = "seed-wal";

/// Result of one applied step
#[derive(Debug)]
pub(crate) struct StepOutcome {
    pub catalog: Catalog,
    /// Last sequence written by the step (unchanged when it wrote nothing)
    pub sequence: u64,
}

/// Runs version steps for one database directory
pub(crate) struct MigrationRunner<'a> {
    pub paths: &'a DatabasePaths,
    pub registry: &'a ComparatorRegistry,
    pub tuning: &'a Tuning,
    pub database_uuid: [u8; 16],
}

impl MigrationRunner<'_> {
    /// Apply the step from `catalog.version()` to the next version
    ///
    /// `catalog` must be the persisted catalog of the current version and
    /// its trees flushed through `published`.
    pub fn run_step<F>(&self, catalog: &Catalog, published: u64, upgrade: &mut F) -> Result<StepOutcome>
    where
        F: FnMut(&mut Migration) -> Result<()>,
    {
        let version = SchemaVersion {
            current: catalog.version(),
            target: catalog.version() + 1,
        };
        let mut migration = Migration::new(version);
        upgrade(&mut migration)?;
        let steps = migration.into_steps()?;
        let plan = catalog.apply(version.target, &steps, self.registry)?;

        let staging = self.paths.staging_dir(version.target);
        let sequence = match self.build(&staging, catalog, &plan, published) {
            Ok(sequence) => sequence,
            Err(e) => {
                warn!(
                    target: "tessera::schema",
                    from = version.current,
                    to = version.target,
                    error = %e,
                    "Migration failed, discarding staged version"
                );
                remove_dir_if_exists(&staging);
                return Err(e);
            }
        };

        self.install(&staging, version)?;
        info!(
            target: "tessera::schema",
            from = version.current,
            to = version.target,
            steps = steps.len(),
            effects = plan.effects.len(),
            sequence,
            "Schema migrated"
        );
        Ok(StepOutcome {
            catalog: plan.catalog,
            sequence,
        })
    }

    /// Populate the staging directory; returns the last sequence written
    fn build(&self, staging: &Path, catalog: &Catalog, plan: &MigrationPlan, published: u64) -> Result<u64> {
        remove_dir_if_exists(staging);
        std::fs::create_dir_all(staging)?;
        copy_trees(&self.paths.version_dir(catalog.version()), staging, catalog)?;

        // New trees are created here, at `published`
        let orders = plan.catalog.key_orders(self.registry)?;
        let trees = Arc::new(TreeSet::open(
            staging,
            orders,
            self.tuning.storage_config(),
            PinRegistry::new(published),
        )?);

        let mut sequence = published;
        let builds: Vec<(TreeId, TreeId)> = plan
            .effects
            .iter()
            .filter_map(|effect| match effect {
                SchemaEffect::BuildIndex { store, index } => Some((*store, *index)),
                _ => None,
            })
            .collect();
        let mutations = index_entries(&plan.catalog, &trees, &builds)?;
        if !mutations.is_empty() {
            sequence += 1;
            trees.merge(sequence, &mutations)?;
            trees.pins().publish(sequence);
            debug!(target: "tessera::schema", indices = builds.len(), entries = mutations.len(), "Built indices");
        }

        let seeds: Vec<(TreeId, &Value)> = plan
            .effects
            .iter()
            .filter_map(|effect| match effect {
                SchemaEffect::Seed { store, document } => Some((*store, document)),
                _ => None,
            })
            .collect();
        if !seeds.is_empty() {
            sequence = self.write_seeds(staging, &plan.catalog, &trees, &seeds)?;
        }

        trees.flush(sequence)?;
        write_atomic(&DatabasePaths::catalog_file(staging), &plan.catalog.to_json()?)?;
        drop(trees);
        sync_dir(staging)?;
        Ok(sequence)
    }

    /// Seeds go through a mutator so index entries are maintained the same
    /// way as for regular commits. Their WAL is scratch: the flush that
    /// follows makes them durable in the trees.
    fn write_seeds(
        &self,
        staging: &Path,
        catalog: &Catalog,
        trees: &Arc<TreeSet>,
        seeds: &[(TreeId, &Value)],
    ) -> Result<u64> {
        let wal_dir = staging.join(SEED_WAL_DIR);
        let mut wal = WalWriter::new(
            wal_dir.clone(),
            self.database_uuid,
            DurabilityMode::Always,
            self.tuning.wal_config(),
        )?;
        wal.set_last_sequence(trees.pins().published());

        let manager = TransactionManager::new(
            Arc::new(catalog.clone()),
            Arc::clone(trees),
            wal,
            self.tuning.transaction_config(),
        );
        manager.mutator(|m| {
            for (store, document) in seeds {
                let (name, _) = catalog
                    .store_by_id(*store)
                    .ok_or_else(|| Error::UnknownTree(format!("tree {}", store)))?;
                m.set(name, (*document).clone())?;
            }
            Ok(())
        })?;
        let sequence = manager.published();
        drop(manager);

        std::fs::remove_dir_all(&wal_dir)?;
        debug!(target: "tessera::schema", seeds = seeds.len(), sequence, "Wrote seed records");
        Ok(sequence)
    }

    /// Move the staged version into place and switch `CURRENT` to it
    fn install(&self, staging: &Path, version: SchemaVersion) -> Result<()> {
        let target_dir = self.paths.version_dir(version.target);
        remove_dir_if_exists(&target_dir);
        if let Err(e) = std::fs::rename(staging, &target_dir) {
            remove_dir_if_exists(staging);
            return Err(e.into());
        }
        let switched = sync_dir(&self.paths.versions_dir())
            .map_err(Error::from)
            .and_then(|_| {
                VersionMarker::new(version.target, self.database_uuid)
                    .persist(&self.paths.current())
                    .map_err(Error::from)
            });
        if let Err(e) = switched {
            remove_dir_if_exists(&target_dir);
            return Err(e);
        }

        let old = self.paths.version_dir(version.current);
        if let Err(e) = std::fs::remove_dir_all(&old) {
            // Stale and unreferenced; the next open retries
            warn!(target: "tessera::schema", dir = %old.display(), error = %e, "Failed to remove old version");
        }
        Ok(())
    }
}

/// Index entries for every record of each `(store, index)` pair
fn index_entries(catalog: &Catalog, trees: &TreeSet, builds: &[(TreeId, TreeId)]) -> Result<Vec<Mutation>> {
    let mut mutations = Vec::new();
    for (store, index) in builds {
        let (name, def) = catalog
            .store_by_id(*store)
            .ok_or_else(|| Error::UnknownTree(format!("tree {}", store)))?;
        let index_def = def
            .indices
            .values()
            .find(|i| i.id == *index)
            .ok_or_else(|| Error::UnknownTree(format!("index tree {} of '{}'", index, name)))?;

        let source = trees.tree(*store)?;
        let mut cursor = source.cursor(trees.pins().pin_published(), None, false);
        while let Some((primary, value)) = cursor.next_entry()? {
            let record = value.as_record().ok_or_else(|| {
                Error::corruption(format!("store '{}' holds an index entry", name))
            })?;
            let key = extract_index_key(&record.value, &index_def.fields, &primary);
            mutations.push(Mutation::set(*index, key, TreeValue::Ref(primary)));
        }
    }
    Ok(mutations)
}

/// Copy the page and root files of every tree in `catalog`
fn copy_trees(from: &Path, to: &Path, catalog: &Catalog) -> Result<()> {
    for id in catalog.tree_ids() {
        for (src, dst) in [
            (DatabasePaths::pages_file(from, id), DatabasePaths::pages_file(to, id)),
            (DatabasePaths::root_file(from, id), DatabasePaths::root_file(to, id)),
        ] {
            if !src.exists() {
                continue;
            }
            std::fs::copy(&src, &dst)?;
            std::fs::File::open(&dst)?.sync_all()?;
        }
    }
    Ok(())
}

/// Remove version and staging directories not referenced by `current`
pub(crate) fn discard_stale(paths: &DatabasePaths, current: u64) -> Result<()> {
    for version in paths.list_versions()? {
        if version != current {
            info!(target: "tessera::schema", version, "Removing stale version directory");
            std::fs::remove_dir_all(paths.version_dir(version))?;
        }
    }
    let stores = paths.stores_dir();
    if stores.exists() {
        for entry in std::fs::read_dir(&stores)? {
            let entry = entry?;
            info!(target: "tessera::schema", dir = %entry.path().display(), "Removing abandoned migration");
            std::fs::remove_dir_all(entry.path())?;
        }
    }
    Ok(())
}

fn remove_dir_if_exists(dir: &Path) {
    if dir.exists() {
        if let Err(e) = std::fs::remove_dir_all(dir) {
            warn!(target: "tessera::schema", dir = %dir.display(), error = %e, "Failed to remove directory");
        }
    }
}
