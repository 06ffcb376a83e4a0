//! Concurrent/Multi-threaded Tests for tessera-concurrency
//!
//! These tests verify correct behavior under actual concurrent execution:
//!
//! 1. **Visibility** - Snapshots opened before a commit never see it
//! 2. **Single Writer** - Mutators serialize; sequences follow commit order
//! 3. **Snapshot Isolation** - Readers see a consistent prefix under load
//! 4. **Shutdown** - `shutdown()` drains running transactions
//!
//! ## Running These Tests
//!
//! ```bash
//! cargo test --test concurrent_tests
//! cargo test --test concurrent_tests -- --nocapture --test-threads=1  # sequential for debugging
//! ```

use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;
use tempfile::TempDir;
use tessera_concurrency::{TransactionConfig, TransactionManager};
use tessera_core::{key, Catalog, ComparatorRegistry, Error, KeyField, SchemaStep, Value};
use tessera_durability::{new_database_uuid, DurabilityMode, WalConfig, WalWriter};
use tessera_storage::{PinRegistry, StorageConfig, TreeSet};

// ============================================================================
// Test Helpers
// ============================================================================

fn create_manager(dir: &Path) -> Arc<TransactionManager> {
    let registry = ComparatorRegistry::new();
    let steps = vec![SchemaStep::CreateStore {
        name: "counters".into(),
        key: vec![KeyField::from("id")],
    }];
    let plan = Catalog::new().apply(1, &steps, &registry).unwrap();
    let trees = TreeSet::open(
        &dir.join("versions").join("1"),
        plan.catalog.key_orders(&registry).unwrap(),
        StorageConfig::for_testing(),
        PinRegistry::new(0),
    )
    .unwrap();
    let wal = WalWriter::new(
        dir.join("wal"),
        new_database_uuid(),
        DurabilityMode::STANDARD,
        WalConfig::for_testing(),
    )
    .unwrap();
    let config = TransactionConfig {
        flush_threshold: 16,
        ..TransactionConfig::default()
    };
    Arc::new(TransactionManager::new(
        Arc::new(plan.catalog),
        Arc::new(trees),
        wal,
        config,
    ))
}

fn counter(value: &Value) -> i64 {
    value.get_path("n").and_then(Value::as_int).unwrap_or(0)
}

// ============================================================================
// SECTION 1: Visibility
// ============================================================================

mod visibility {
    use super::*;

    /// The reader opens its snapshot, then signals the writer. The writer
    /// commits, signals back, and the reader must still not see the write.
    #[test]
    fn test_snapshot_opened_before_commit_never_sees_it() {
        let dir = TempDir::new().unwrap();
        let manager = create_manager(dir.path());

        let (opened_tx, opened_rx) = mpsc::channel();
        let (committed_tx, committed_rx) = mpsc::channel();

        let reader = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager
                    .snapshot(|s| {
                        opened_tx.send(()).unwrap();
                        committed_rx.recv().unwrap();
                        assert!(s.get("counters", &key![1])?.is_none());
                        let all: Vec<_> = s.cursor("counters", None)?.collect::<tessera_core::Result<_>>()?;
                        assert!(all.is_empty());
                        Ok(s.sequence())
                    })
                    .unwrap()
            })
        };

        opened_rx.recv().unwrap();
        manager
            .mutator(|m| m.set("counters", Value::from(json!({ "id": 1, "n": 1 }))))
            .unwrap();
        committed_tx.send(()).unwrap();

        assert_eq!(reader.join().unwrap(), 0);

        // A snapshot opened after the commit sees it
        let seen = manager.snapshot(|s| s.get("counters", &key![1])).unwrap();
        assert!(seen.is_some());
    }
}

// ============================================================================
// SECTION 2: Single Writer
// ============================================================================

mod single_writer {
    use super::*;

    #[test]
    fn test_concurrent_increments_are_serialized() {
        let dir = TempDir::new().unwrap();
        let manager = create_manager(dir.path());
        let threads = 8;
        let per_thread = 25;
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    let mut sequences = Vec::new();
                    for _ in 0..per_thread {
                        let seq = manager
                            .mutator(|m| {
                                let current = m.get("counters", &key![1])?.map(|r| counter(&r.value)).unwrap_or(0);
                                m.set("counters", Value::from(json!({ "id": 1, "n": current + 1 })))?;
                                Ok(m.commit_sequence())
                            })
                            .unwrap();
                        sequences.push(seq);
                    }
                    sequences
                })
            })
            .collect();

        let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
        all.sort();
        let expected: Vec<u64> = (1..=(threads * per_thread) as u64).collect();
        assert_eq!(all, expected, "every commit gets a distinct, gapless sequence");

        let record = manager.snapshot(|s| s.get("counters", &key![1])).unwrap().unwrap();
        assert_eq!(counter(&record.value), (threads * per_thread) as i64);
        assert_eq!(record.created_index, 1);
        assert_eq!(record.modified_index, (threads * per_thread) as u64);
    }
}

// ============================================================================
// SECTION 3: Snapshot Isolation
// ============================================================================

mod snapshot_isolation {
    use super::*;

    /// Every commit writes the same counter into two records. A snapshot
    /// must always see them equal.
    #[test]
    fn test_readers_see_consistent_prefix_during_commits() {
        let dir = TempDir::new().unwrap();
        let manager = create_manager(dir.path());
        let done = Arc::new(AtomicBool::new(false));

        let readers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    let mut checks = 0u64;
                    while !done.load(Ordering::SeqCst) {
                        manager
                            .snapshot(|s| {
                                let a = s.get("counters", &key![1])?.map(|r| counter(&r.value));
                                let b = s.get("counters", &key![2])?.map(|r| counter(&r.value));
                                assert_eq!(a, b, "torn read at sequence {}", s.sequence());
                                if let Some(n) = a {
                                    assert_eq!(n as u64, s.sequence());
                                }
                                Ok(())
                            })
                            .unwrap();
                        checks += 1;
                    }
                    checks
                })
            })
            .collect();

        for n in 1..=200i64 {
            manager
                .mutator(|m| {
                    m.set("counters", Value::from(json!({ "id": 1, "n": n })))?;
                    m.set("counters", Value::from(json!({ "id": 2, "n": n })))?;
                    Ok(())
                })
                .unwrap();
        }
        done.store(true, Ordering::SeqCst);

        for reader in readers {
            reader.join().unwrap();
        }
        assert_eq!(manager.published(), 200);
    }

    #[test]
    fn test_long_snapshot_keeps_its_version_across_flushes() {
        let dir = TempDir::new().unwrap();
        let manager = create_manager(dir.path());
        for id in 0..50i64 {
            manager
                .mutator(|m| m.set("counters", Value::from(json!({ "id": id, "n": 0 }))))
                .unwrap();
        }

        manager
            .snapshot(|s| {
                let at = s.sequence();
                // Rewrite everything many times while the snapshot is open
                for round in 1..=5i64 {
                    manager.mutator(|m| {
                        for id in 0..50i64 {
                            m.set("counters", Value::from(json!({ "id": id, "n": round })))?;
                        }
                        Ok(())
                    })?;
                    manager.checkpoint()?;
                }
                let records: Vec<_> = s.cursor("counters", None)?.collect::<tessera_core::Result<_>>()?;
                assert_eq!(records.len(), 50);
                assert!(records.iter().all(|r| counter(&r.value) == 0));
                assert_eq!(s.sequence(), at);
                Ok(())
            })
            .unwrap();
    }
}

// ============================================================================
// SECTION 4: Shutdown
// ============================================================================

mod shutdown {
    use super::*;

    #[test]
    fn test_shutdown_waits_for_running_snapshot() {
        let dir = TempDir::new().unwrap();
        let manager = create_manager(dir.path());
        let (started_tx, started_rx) = mpsc::channel();

        let reader = {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                manager.snapshot(|_| {
                    started_tx.send(()).unwrap();
                    thread::sleep(Duration::from_millis(100));
                    Ok(())
                })
            })
        };

        started_rx.recv().unwrap();
        assert!(!manager.wait_for_idle(Duration::from_millis(1)));
        manager.shutdown().unwrap();
        // The snapshot finished before shutdown returned
        assert_eq!(manager.metrics().active_count, 0);
        assert!(reader.join().unwrap().is_ok());
        assert!(matches!(manager.snapshot(|_| Ok(())), Err(Error::Shutdown)));
    }
}
