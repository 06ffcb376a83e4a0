//! Close, reopen, crash-style reopen, commit hooks and migrations

use crate::common::*;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;
use tessera::{Mutation, Op, SchemaVersion};

/// Copy everything but the process lock, as the disk looks after a crash
fn crash_copy(from: &Path, to: &Path) {
    std::fs::create_dir_all(to).unwrap();
    for entry in std::fs::read_dir(from).unwrap() {
        let entry = entry.unwrap();
        let target = to.join(entry.file_name());
        if entry.file_type().unwrap().is_dir() {
            crash_copy(&entry.path(), &target);
        } else if entry.file_name() != ".lock" {
            std::fs::copy(entry.path(), target).unwrap();
        }
    }
}

// ============================================================================
// Close
// ============================================================================

#[test]
fn close_rejects_later_transactions() {
    let test_db = TestDb::new();
    let db = test_db.db();
    db.mutator(|m| m.set("people", person(1, "VA"))).unwrap();
    db.close().unwrap();

    assert!(!db.is_open());
    assert!(matches!(db.mutator(|m| m.set("people", person(2, "VA"))), Err(Error::Shutdown)));
    assert!(matches!(db.snapshot(|_| Ok(())), Err(Error::Shutdown)));
}

#[test]
fn close_waits_for_running_snapshot() {
    let test_db = Arc::new(TestDb::new());
    let (started_tx, started_rx) = mpsc::channel();
    let finished = Arc::new(AtomicUsize::new(0));

    let reader = {
        let test_db = Arc::clone(&test_db);
        let finished = Arc::clone(&finished);
        thread::spawn(move || {
            test_db.db().snapshot(|_| {
                started_tx.send(()).unwrap();
                thread::sleep(Duration::from_millis(100));
                finished.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        })
    };

    started_rx.recv().unwrap();
    test_db.db().close().unwrap();
    assert_eq!(finished.load(Ordering::SeqCst), 1, "close returned before the snapshot finished");
    assert!(reader.join().unwrap().is_ok());
}

// ============================================================================
// Reopen
// ============================================================================

#[test]
fn data_survives_close_and_reopen() {
    let mut test_db = TestDb::new();
    test_db
        .db()
        .mutator(|m| {
            for id in 0..50 {
                m.set("people", person(id, if id % 2 == 0 { "VA" } else { "MD" }))?;
            }
            Ok(())
        })
        .unwrap();
    test_db.db().mutator(|m| m.unset("people", &key![0])).unwrap();

    test_db.reopen();

    let db = test_db.db();
    assert_eq!(db.sequence(), 2);
    db.snapshot(|s| {
        assert_eq!(scan(s, "people")?.len(), 49);
        assert_eq!(scan(s, ("people", "state"))?.len(), 49);
        let first_va = s.get(("people", "state"), &key!["VA"])?.unwrap();
        assert_eq!(int_field(&first_va, "id"), 2);
        Ok(())
    })
    .unwrap();
    // Sequences continue after the reopen
    db.mutator(|m| m.set("people", person(100, "VA"))).unwrap();
    assert_eq!(db.sequence(), 3);
}

#[test]
fn crash_style_reopen_replays_wal() {
    let test_db = TestDb::new();
    let crashed = tempfile::tempdir().unwrap();
    for id in 0..25 {
        test_db.db().mutator(|m| m.set("people", person(id, "VA"))).unwrap();
    }
    // Snapshot the directory while the database is open: no close, no final
    // checkpoint
    crash_copy(test_db.path(), crashed.path());

    let recovered = open_at(crashed.path()).unwrap();
    assert_eq!(recovered.sequence(), 25);
    let count = recovered.snapshot(|s| Ok(scan(s, "people")?.len())).unwrap();
    assert_eq!(count, 25);
}

#[test]
fn second_open_of_same_directory_is_locked() {
    let test_db = TestDb::new();
    assert!(matches!(open_at(test_db.path()), Err(Error::Locked(_))));
}

// ============================================================================
// Commit hook
// ============================================================================

#[test]
fn commit_hook_sees_each_commit_before_it_is_visible() {
    let test_db = TestDb::new();
    let db = test_db.db();
    let seen: Arc<Mutex<Vec<(u64, usize)>>> = Arc::new(Mutex::new(Vec::new()));
    {
        let seen = Arc::clone(&seen);
        db.on_commit(move |sequence, mutations: &[Mutation]| {
            assert!(mutations.iter().all(|m| matches!(m.op, Op::Set(_) | Op::Unset)));
            seen.lock().push((sequence, mutations.len()));
        });
    }

    // A record plus its index entry
    db.mutator(|m| m.set("people", person(1, "VA"))).unwrap();
    // Rolled back and empty mutators are not commits
    db.mutator(|m| {
        m.set("people", person(2, "VA"))?;
        m.rollback();
        Ok(())
    })
    .unwrap();
    db.mutator(|_| Ok(())).unwrap();
    // Unset of a record tombstones the record and its index entry
    db.mutator(|m| m.unset("people", &key![1])).unwrap();

    assert_eq!(*seen.lock(), vec![(1, 2), (2, 2)]);
}

// ============================================================================
// Migrations
// ============================================================================

#[test]
fn reopen_at_same_version_does_not_call_upgrade() {
    let dir = tempfile::tempdir().unwrap();
    let calls = AtomicUsize::new(0);
    let counting = |m: &mut Migration| {
        calls.fetch_add(1, Ordering::SeqCst);
        schema(m)
    };

    Database::open(test_config(dir.path()), counting).unwrap().close().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    Database::open(test_config(dir.path()), counting).unwrap().close().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn migration_adds_index_over_existing_records() {
    let dir = tempfile::tempdir().unwrap();
    {
        let db = open_at(dir.path()).unwrap();
        db.mutator(|m| {
            m.set("one", doc(serde_json::json!({ "id": 1, "color": "red" })))?;
            m.set("one", doc(serde_json::json!({ "id": 2, "color": "blue" })))?;
            m.set("one", doc(serde_json::json!({ "id": 3 })))?;
            Ok(())
        })
        .unwrap();
    }

    let db = Database::open(test_config(dir.path()).with_version(2), |m| {
        assert_eq!(m.version(), SchemaVersion { current: 1, target: 2 });
        m.index(("one", "color"), ["color"]);
        Ok(())
    })
    .unwrap();
    let ids: Vec<i64> = db
        .snapshot(|s| Ok(scan(s, ("one", "color"))?.iter().map(|r| int_field(r, "id")).collect()))
        .unwrap();
    // Missing field indexes as null, which sorts first
    assert_eq!(ids, vec![3, 2, 1]);

    // Later writes maintain the new index
    db.mutator(|m| m.set("one", doc(serde_json::json!({ "id": 4, "color": "amber" }))))
        .unwrap();
    let first = db
        .snapshot(|s| s.get(("one", "color"), &key!["amber"]))
        .unwrap()
        .unwrap();
    assert_eq!(int_field(&first, "id"), 4);
}

#[test]
fn failed_migration_leaves_version_untouched() {
    let dir = tempfile::tempdir().unwrap();
    open_at(dir.path()).unwrap().close().unwrap();

    let result = Database::open(test_config(dir.path()).with_version(2), |m| {
        m.store("extra", ["id"]).rename("ghosts", "spirits");
        Ok(())
    });
    assert!(matches!(result, Err(Error::Schema(_))));

    let db = open_at(dir.path()).unwrap();
    assert_eq!(db.version(), 1);
    assert!(db.catalog().store("extra").is_err());
}
