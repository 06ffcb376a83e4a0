//! Database handle and open/close lifecycle
//!
//! `Database::open` brings a directory to the requested schema version:
//!
//! 1. Create the layout and take the exclusive `.lock`
//! 2. Load `CURRENT` (or initialize an empty version 0)
//! 3. Open the version's trees and replay the WAL tail into them
//! 4. Checkpoint, then run each pending migration step
//! 5. Start the transaction manager (and, in Standard durability, the
//!    background WAL flush thread)
//!
//! Dropping an open handle closes it on a best-effort basis.

pub mod config;

pub use config::{DatabaseConfig, Tuning, CONFIG_FILE_NAME};

use crate::recovery::{RecoveryCoordinator, RecoveryStats};
use crate::schema::{discard_stale, Migration, MigrationRunner};
use parking_lot::Mutex;
use std::fs::File;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use tessera_concurrency::{Mutator, Snapshot, TransactionManager, TransactionMetrics};
use tessera_core::{Catalog, ComparatorRegistry, Error, Mutation, Result};
use tessera_durability::{
    new_database_uuid, write_atomic, DatabasePaths, DurabilityMode, VersionMarker, WalWriter,
};
use tessera_storage::{CacheStats, PinRegistry, TreeSet};
use tracing::{debug, info, warn};

/// An open database
pub struct Database {
    paths: DatabasePaths,
    version: u64,
    database_uuid: [u8; 16],
    durability: DurabilityMode,
    recovery: RecoveryStats,
    manager: Arc<TransactionManager>,
    open: AtomicBool,
    flush_shutdown: Arc<AtomicBool>,
    flush_handle: Mutex<Option<JoinHandle<()>>>,
    // Released when the handle drops
    _lock_file: File,
}

/// Catalog and trees of the active version
struct OpenVersion {
    catalog: Catalog,
    trees: TreeSet,
}

impl Database {
    /// Open (or create) the database in `config.directory` at
    /// `config.version`
    ///
    /// `upgrade` runs once per pending version step and is not called when
    /// the directory is already at the requested version. A failing step
    /// fails the open and leaves the persisted version unchanged.
    pub fn open<F>(config: DatabaseConfig, mut upgrade: F) -> Result<Self>
    where
        F: FnMut(&mut Migration) -> Result<()>,
    {
        config.validate()?;
        let paths = DatabasePaths::from_root(&config.directory);
        paths.create_directories()?;
        let lock_file = lock_directory(&paths)?;

        let tuning = config.resolve_tuning()?;
        let durability = tuning.durability_mode()?;
        let registry = &config.comparators;

        let marker = match VersionMarker::load(&paths.current())? {
            Some(marker) => marker,
            None => initialize(&paths)?,
        };
        if config.version < marker.version {
            return Err(Error::schema(format!(
                "database is at version {}, cannot open at older version {}",
                marker.version, config.version
            )));
        }
        discard_stale(&paths, marker.version)?;

        let active = open_version(&paths, marker.version, registry, &tuning)?;
        let recovery = RecoveryCoordinator::new(paths.wal_dir(), marker.database_uuid).recover(&active.trees)?;
        let published = active.trees.applied_sequence().max(recovery.last_sequence);
        active.trees.pins().publish(published);

        let mut wal = WalWriter::new(
            paths.wal_dir(),
            marker.database_uuid,
            durability,
            tuning.wal_config(),
        )?;
        wal.set_last_sequence(published);

        // Everything replayed goes to the trees before the WAL is cut back
        wal.flush()?;
        active.trees.flush(published)?;
        wal.checkpoint(published)?;

        let (catalog, trees, published) = if config.version > marker.version {
            let runner = MigrationRunner {
                paths: &paths,
                registry,
                tuning: &tuning,
                database_uuid: marker.database_uuid,
            };
            let OpenVersion { mut catalog, trees } = active;
            drop(trees);
            let mut published = published;
            while catalog.version() < config.version {
                let step = runner.run_step(&catalog, published, &mut upgrade)?;
                catalog = step.catalog;
                published = step.sequence;
            }
            let reopened = open_version(&paths, catalog.version(), registry, &tuning)?;
            reopened.trees.pins().publish(published);
            wal.set_last_sequence(published);
            (reopened.catalog, reopened.trees, published)
        } else {
            (active.catalog, active.trees, published)
        };

        let manager = Arc::new(TransactionManager::new(
            Arc::new(catalog),
            Arc::new(trees),
            wal,
            tuning.transaction_config(),
        ));

        let flush_shutdown = Arc::new(AtomicBool::new(false));
        let flush_handle = spawn_flush_thread(durability, &manager, &flush_shutdown)?;

        info!(
            target: "tessera::db",
            path = %paths.root().display(),
            version = config.version,
            sequence = published,
            replayed = recovery.records_replayed,
            durability = durability.description(),
            "Database opened"
        );

        Ok(Database {
            paths,
            version: config.version,
            database_uuid: marker.database_uuid,
            durability,
            recovery,
            manager,
            open: AtomicBool::new(true),
            flush_shutdown,
            flush_handle: Mutex::new(flush_handle),
            _lock_file: lock_file,
        })
    }

    /// Run a read-write transaction
    ///
    /// The closure's staged writes commit when it returns `Ok` and it did not
    /// call `rollback`. An `Err` discards them and is returned unchanged.
    ///
    /// With the default `always` durability, `Ok` means the commit is fsynced
    /// to the WAL. With `standard` durability, `Ok` only means the record was
    /// written: it is fsynced within the configured interval, and a crash
    /// before that loses it. `Err(Error::Unapplied)` reports a commit that is
    /// durable but not yet visible; it is applied on the next open.
    pub fn mutator<R>(&self, f: impl FnOnce(&mut Mutator) -> Result<R>) -> Result<R> {
        self.manager.mutator(f)
    }

    /// Run a read-only transaction at the latest committed sequence
    pub fn snapshot<R>(&self, f: impl FnOnce(&Snapshot) -> Result<R>) -> Result<R> {
        self.manager.snapshot(f)
    }

    /// Register a hook called with every commit after its WAL append and
    /// before it becomes visible
    pub fn on_commit<F>(&self, hook: F)
    where
        F: Fn(u64, &[Mutation]) + Send + Sync + 'static,
    {
        self.manager.on_commit(hook);
    }

    /// Schema version the database is open at
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Last committed sequence
    pub fn sequence(&self) -> u64 {
        self.manager.published()
    }

    /// Catalog of the open version
    pub fn catalog(&self) -> &Catalog {
        self.manager.catalog()
    }

    /// Database directory
    pub fn path(&self) -> &Path {
        self.paths.root()
    }

    /// Identity shared by the version marker and WAL segments
    pub fn database_uuid(&self) -> [u8; 16] {
        self.database_uuid
    }

    /// Durability mode in effect
    pub fn durability_mode(&self) -> DurabilityMode {
        self.durability
    }

    /// What WAL replay did during open
    pub fn recovery_stats(&self) -> &RecoveryStats {
        &self.recovery
    }

    /// Flush every dirty page and drop the WAL segments they cover
    ///
    /// Returns the sequence now durable in the trees.
    pub fn checkpoint(&self) -> Result<u64> {
        if !self.is_open() {
            return Err(Error::Shutdown);
        }
        self.manager.checkpoint()
    }

    /// Page cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.manager.cache_stats()
    }

    /// Transaction counters
    pub fn metrics(&self) -> TransactionMetrics {
        self.manager.metrics()
    }

    /// False after `close`, or after a failed merge left committed data
    /// that only a reopen can apply
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst) && self.manager.is_accepting()
    }

    /// Wait for running transactions, checkpoint and refuse new ones
    ///
    /// Later `mutator`/`snapshot` calls fail with `Error::Shutdown`. Closing
    /// twice is a no-op. Closing from inside a `mutator` or `snapshot`
    /// closure returns `Error::Shutdown` and leaves the database open.
    pub fn close(&self) -> Result<()> {
        if self.manager.in_transaction() {
            return Err(Error::Shutdown);
        }
        if !self.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        self.stop_flush_thread();
        self.manager.shutdown()?;
        info!(
            target: "tessera::db",
            path = %self.paths.root().display(),
            sequence = self.manager.published(),
            "Database closed"
        );
        Ok(())
    }

    fn stop_flush_thread(&self) {
        self.flush_shutdown.store(true, Ordering::SeqCst);
        if let Some(handle) = self.flush_handle.lock().take() {
            let _ = handle.join();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            warn!(target: "tessera::db", error = %e, "Close on drop failed");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.paths.root())
            .field("version", &self.version)
            .field("sequence", &self.sequence())
            .field("open", &self.is_open())
            .finish()
    }
}

/// Take the exclusive process lock on the directory
fn lock_directory(paths: &DatabasePaths) -> Result<File> {
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(paths.lock_file())?;
    fs2::FileExt::try_lock_exclusive(&lock_file)
        .map_err(|_| Error::Locked(paths.root().display().to_string()))?;
    Ok(lock_file)
}

/// Write an empty version 0 and its marker
fn initialize(paths: &DatabasePaths) -> Result<VersionMarker> {
    let marker = VersionMarker::new(0, new_database_uuid());
    let dir = paths.version_dir(0);
    std::fs::create_dir_all(&dir)?;
    write_atomic(&DatabasePaths::catalog_file(&dir), &Catalog::new().to_json()?)?;
    marker.persist(&paths.current())?;
    info!(target: "tessera::db", path = %paths.root().display(), "Initialized new database");
    Ok(marker)
}

fn open_version(
    paths: &DatabasePaths,
    version: u64,
    registry: &ComparatorRegistry,
    tuning: &Tuning,
) -> Result<OpenVersion> {
    let dir = paths.version_dir(version);
    let bytes = std::fs::read(DatabasePaths::catalog_file(&dir)).map_err(|e| {
        Error::corruption(format!("cannot read catalog of version {}: {}", version, e))
    })?;
    let catalog = Catalog::from_json(&bytes)?;
    if catalog.version() != version {
        return Err(Error::corruption(format!(
            "catalog in version directory {} claims version {}",
            version,
            catalog.version()
        )));
    }
    let orders = catalog.key_orders(registry)?;
    let trees = TreeSet::open(&dir, orders, tuning.storage_config(), PinRegistry::new(0))?;
    debug!(target: "tessera::db", version, trees = catalog.tree_ids().len(), "Opened version");
    Ok(OpenVersion { catalog, trees })
}

/// Background fsync for Standard durability
fn spawn_flush_thread(
    durability: DurabilityMode,
    manager: &Arc<TransactionManager>,
    shutdown: &Arc<AtomicBool>,
) -> Result<Option<JoinHandle<()>>> {
    let Some(interval) = durability.sync_interval() else {
        return Ok(None);
    };
    let manager = Arc::clone(manager);
    let shutdown = Arc::clone(shutdown);

    let handle = std::thread::Builder::new()
        .name("tessera-wal-flush".to_string())
        .spawn(move || {
            while !shutdown.load(Ordering::Relaxed) {
                std::thread::sleep(interval);
                if shutdown.load(Ordering::Relaxed) {
                    break;
                }
                if let Err(e) = manager.sync_wal_if_overdue() {
                    warn!(target: "tessera::wal", error = %e, "Background WAL sync failed");
                }
            }
        })?;
    Ok(Some(handle))
}
