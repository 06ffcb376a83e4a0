//! Transaction manager: single writer, concurrent readers
//!
//! Commit pipeline for a mutator whose closure returned `Ok` with staged
//! writes:
//!
//! ```text
//! 1. Staging -> mutations, sequence = last WAL sequence + 1
//! 2. WAL append (durability point)
//! 3. Commit hooks (sequence, mutations)
//! 4. Merge into the trees (new root versions at `sequence`)
//! 5. Publish `sequence` (visibility point)
//! 6. Flush dirty pages and checkpoint the WAL when over the threshold
//! ```
//!
//! A crash before step 2 loses the mutator entirely; after step 2 recovery
//! replays it. If steps 3 to 5 fail or unwind, the record is durable but the
//! trees are behind the log, so the manager stops accepting transactions
//! and the commit becomes visible on the next open. The writer lock (the WAL mutex) is held from the moment the
//! mutator opens until the commit finishes, so sequences follow call order.
//! Snapshots never take it.

use crate::transaction::{Mutator, Snapshot, TransactionState};
use crate::view::{ReadView, DEFAULT_BATCH_SIZE};
use parking_lot::{Condvar, Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tessera_core::{Catalog, Error, Mutation, Result};
use tessera_durability::{WalRecord, WalWriter};
use tessera_storage::{CacheStats, TreeSet};
use tracing::{debug, error, info, warn};

/// Callback run after the WAL append and before the merge of each commit
pub type CommitHook = Arc<dyn Fn(u64, &[Mutation]) + Send + Sync>;

/// Dirty pages that trigger a flush after commit, when not configured
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024;

/// Transaction manager settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Flush dirty pages and checkpoint the WAL once this many are dirty
    pub flush_threshold: usize,
    /// Records per cursor batch
    pub batch_size: usize,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        TransactionConfig {
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }
}

/// Transaction lifecycle counters
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionMetrics {
    /// Mutators and snapshots currently running
    pub active_count: u64,
    /// Mutators started
    pub total_started: u64,
    /// Mutators that wrote a WAL record
    pub total_committed: u64,
    /// Mutators that rolled back or failed
    pub total_rolled_back: u64,
    /// Snapshots started
    pub total_snapshots: u64,
    /// Committed share of finished mutators
    pub commit_rate: f64,
}

/// Decrements the active count when a transaction ends
struct ActiveGuard<'a> {
    manager: &'a TransactionManager,
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        let mut active = self.manager.active.lock();
        let current = std::thread::current().id();
        if let Some(pos) = active.iter().position(|id| *id == current) {
            active.swap_remove(pos);
        }
        if active.is_empty() {
            self.manager.idle.notify_all();
        }
    }
}

/// Stops the manager if a durable commit does not reach publish
struct UnappliedGuard<'a> {
    manager: &'a TransactionManager,
    sequence: u64,
    armed: bool,
}

impl Drop for UnappliedGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            error!(
                target: "tessera::txn",
                sequence = self.sequence,
                "Commit durable but not applied, refusing new transactions until reopen"
            );
            self.manager.stop_accepting();
        }
    }
}

/// Runs mutators and snapshots against one open version
pub struct TransactionManager {
    catalog: Arc<Catalog>,
    trees: Arc<TreeSet>,
    /// The writer lock
    wal: Mutex<WalWriter>,
    hooks: RwLock<Vec<CommitHook>>,
    config: TransactionConfig,

    /// One entry per running transaction, by calling thread
    active: Mutex<Vec<ThreadId>>,
    idle: Condvar,
    accepting: AtomicBool,

    total_started: AtomicU64,
    total_committed: AtomicU64,
    total_rolled_back: AtomicU64,
    total_snapshots: AtomicU64,
}

impl TransactionManager {
    /// Create a manager over recovered trees and an open WAL
    ///
    /// The trees' pin registry must already hold the last committed sequence.
    pub fn new(catalog: Arc<Catalog>, trees: Arc<TreeSet>, wal: WalWriter, config: TransactionConfig) -> Self {
        TransactionManager {
            catalog,
            trees,
            wal: Mutex::new(wal),
            hooks: RwLock::new(Vec::new()),
            config,
            active: Mutex::new(Vec::new()),
            idle: Condvar::new(),
            accepting: AtomicBool::new(true),
            total_started: AtomicU64::new(0),
            total_committed: AtomicU64::new(0),
            total_rolled_back: AtomicU64::new(0),
            total_snapshots: AtomicU64::new(0),
        }
    }

    /// Catalog of the open version
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Trees of the open version
    pub fn trees(&self) -> &Arc<TreeSet> {
        &self.trees
    }

    /// Last published sequence
    pub fn published(&self) -> u64 {
        self.trees.pins().published()
    }

    /// Page cache counters
    pub fn cache_stats(&self) -> CacheStats {
        self.trees.cache_stats()
    }

    /// False once shutdown started or a merge failed
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::SeqCst)
    }

    /// Register a commit hook
    pub fn on_commit<F>(&self, hook: F)
    where
        F: Fn(u64, &[Mutation]) + Send + Sync + 'static,
    {
        self.hooks.write().push(Arc::new(hook));
    }

    fn enter(&self) -> Result<ActiveGuard<'_>> {
        let mut active = self.active.lock();
        if !self.is_accepting() {
            return Err(Error::Shutdown);
        }
        active.push(std::thread::current().id());
        Ok(ActiveGuard { manager: self })
    }

    /// True when the calling thread is inside a mutator or snapshot closure
    pub fn in_transaction(&self) -> bool {
        let current = std::thread::current().id();
        self.active.lock().contains(&current)
    }

    fn stop_accepting(&self) {
        let _active = self.active.lock();
        self.accepting.store(false, Ordering::SeqCst);
    }

    fn view(&self) -> ReadView {
        ReadView::new(
            Arc::clone(&self.catalog),
            Arc::clone(&self.trees),
            self.trees.pins().pin_published(),
            self.config.batch_size,
        )
    }

    /// Run a read-only closure at the latest published sequence
    pub fn snapshot<R>(&self, f: impl FnOnce(&Snapshot) -> Result<R>) -> Result<R> {
        let _guard = self.enter()?;
        self.total_snapshots.fetch_add(1, Ordering::Relaxed);
        let snapshot = Snapshot::new(self.view());
        f(&snapshot)
    }

    /// Run a read-write closure and commit what it staged
    ///
    /// An `Err` from the closure, or a call to `Mutator::rollback`, discards
    /// the staging and writes nothing. A closure that staged nothing commits
    /// nothing and consumes no sequence.
    ///
    /// `Err(Error::Unapplied)` means the commit is durable in the WAL but
    /// was not merged; it becomes visible on the next open and the manager
    /// refuses new transactions until then. Any other error after the
    /// closure returned means nothing was written.
    ///
    /// Calling `mutator` again from inside the closure deadlocks on the
    /// writer lock. Calling [`TransactionManager::shutdown`] from inside
    /// any closure returns `Error::Shutdown`.
    pub fn mutator<R>(&self, f: impl FnOnce(&mut Mutator) -> Result<R>) -> Result<R> {
        let _guard = self.enter()?;
        let mut wal = self.wal.lock();
        self.total_started.fetch_add(1, Ordering::Relaxed);

        // The log, not the published counter, decides the next sequence: a
        // commit that is durable but unpublished still owns its number
        let sequence = wal.last_sequence().max(self.published()) + 1;
        let mut mutator = Mutator::new(self.view(), sequence);
        let output = match f(&mut mutator) {
            Ok(output) => output,
            Err(e) => {
                mutator.rollback();
                self.total_rolled_back.fetch_add(1, Ordering::Relaxed);
                debug!(target: "tessera::txn", sequence = mutator.commit_sequence(), error = %e, "Mutator rolled back on error");
                return Err(e);
            }
        };

        if mutator.is_rolled_back() {
            self.total_rolled_back.fetch_add(1, Ordering::Relaxed);
            debug!(target: "tessera::txn", sequence = mutator.commit_sequence(), "Mutator rolled back");
            return Ok(output);
        }

        let mutations = mutator.take_mutations();
        if mutations.is_empty() {
            mutator.set_state(TransactionState::Committed);
            debug!(target: "tessera::txn", "Mutator staged nothing, no commit");
            return Ok(output);
        }

        mutator.set_state(TransactionState::Committing);
        if let Err(e) = self.commit(&mut wal, sequence, &mutations) {
            self.total_rolled_back.fetch_add(1, Ordering::Relaxed);
            return Err(e);
        }
        mutator.set_state(TransactionState::Committed);
        self.total_committed.fetch_add(1, Ordering::Relaxed);
        Ok(output)
    }

    fn commit(&self, wal: &mut WalWriter, sequence: u64, mutations: &[Mutation]) -> Result<()> {
        let record = WalRecord::from_mutations(sequence, mutations)?;
        if let Err(e) = wal.append(&record) {
            if wal.is_poisoned() {
                error!(
                    target: "tessera::txn",
                    sequence,
                    "WAL writer poisoned, refusing new transactions until reopen"
                );
                self.stop_accepting();
            }
            return Err(e.into());
        }

        let mut unapplied = UnappliedGuard {
            manager: self,
            sequence,
            armed: true,
        };

        for hook in self.hooks.read().iter() {
            hook(sequence, mutations);
        }

        if let Err(e) = self.trees.merge(sequence, mutations) {
            return Err(Error::Unapplied {
                sequence,
                reason: e.to_string(),
            });
        }
        self.trees.pins().publish(sequence);
        unapplied.armed = false;
        debug!(target: "tessera::txn", sequence, mutations = mutations.len(), "Committed");

        if self.trees.dirty_pages() >= self.config.flush_threshold {
            if let Err(e) = self.flush(wal, sequence) {
                // Committed data is safe in the WAL; the next flush retries
                warn!(target: "tessera::txn", sequence, error = %e, "Background flush failed");
            }
        }
        Ok(())
    }

    fn flush(&self, wal: &mut WalWriter, sequence: u64) -> Result<usize> {
        wal.flush()?;
        let pages = self.trees.flush(sequence)?;
        let removed = wal.checkpoint(sequence)?;
        debug!(target: "tessera::txn", sequence, pages, segments_removed = removed, "Checkpoint");
        Ok(pages)
    }

    /// Write every dirty page and drop WAL segments they cover
    ///
    /// Returns the sequence now durable in the trees.
    pub fn checkpoint(&self) -> Result<u64> {
        let mut wal = self.wal.lock();
        let sequence = self.published();
        self.flush(&mut wal, sequence)?;
        Ok(sequence)
    }

    /// Fsync the WAL if the durability mode's interval has passed
    ///
    /// Waits for the writer lock, so a long-running mutator delays it.
    pub fn sync_wal_if_overdue(&self) -> Result<bool> {
        Ok(self.wal.lock().sync_if_overdue()?)
    }

    /// Wait until no transaction is running, up to `timeout`
    pub fn wait_for_idle(&self, timeout: Duration) -> bool {
        let mut active = self.active.lock();
        while !active.is_empty() {
            if self.idle.wait_for(&mut active, timeout).timed_out() {
                return active.is_empty();
            }
        }
        true
    }

    /// Refuse new transactions, wait for running ones, then checkpoint
    ///
    /// Called from inside a mutator or snapshot closure it would wait on
    /// itself, so it returns `Error::Shutdown` and changes nothing.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut active = self.active.lock();
            if active.contains(&std::thread::current().id()) {
                return Err(Error::Shutdown);
            }
            self.accepting.store(false, Ordering::SeqCst);
            while !active.is_empty() {
                self.idle.wait(&mut active);
            }
        }
        let sequence = self.checkpoint()?;
        info!(target: "tessera::txn", sequence, "Transaction manager shut down");
        Ok(())
    }

    /// Snapshot of the lifecycle counters
    pub fn metrics(&self) -> TransactionMetrics {
        let committed = self.total_committed.load(Ordering::Relaxed);
        let rolled_back = self.total_rolled_back.load(Ordering::Relaxed);
        let finished = committed + rolled_back;
        TransactionMetrics {
            active_count: self.active.lock().len() as u64,
            total_started: self.total_started.load(Ordering::Relaxed),
            total_committed: committed,
            total_rolled_back: rolled_back,
            total_snapshots: self.total_snapshots.load(Ordering::Relaxed),
            commit_rate: if finished == 0 {
                0.0
            } else {
                committed as f64 / finished as f64
            },
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("published", &self.published())
            .field("accepting", &self.is_accepting())
            .field("config", &self.config)
            .finish()
    }
}
