//! Visibility, isolation and index lookup properties

use crate::common::*;
use std::sync::{mpsc, Arc};
use std::thread;

// ============================================================================
// Visibility
// ============================================================================

#[test]
fn snapshot_opened_before_commit_does_not_see_it() {
    let test_db = Arc::new(TestDb::new());
    let (opened_tx, opened_rx) = mpsc::channel();
    let (committed_tx, committed_rx) = mpsc::channel::<u64>();

    let reader = {
        let test_db = Arc::clone(&test_db);
        thread::spawn(move || {
            test_db
                .db()
                .snapshot(|s| {
                    opened_tx.send(s.sequence()).unwrap();
                    let committed_at = committed_rx.recv().unwrap();
                    assert!(s.sequence() < committed_at);
                    assert!(s.get("people", &key![1])?.is_none());
                    Ok(())
                })
                .unwrap()
        })
    };

    let before = opened_rx.recv().unwrap();
    let committed_at = test_db
        .db()
        .mutator(|m| {
            m.set("people", person(1, "VA"))?;
            Ok(m.commit_sequence())
        })
        .unwrap();
    assert_eq!(committed_at, before + 1);
    committed_tx.send(committed_at).unwrap();
    reader.join().unwrap();

    // Opened after the commit: visible
    let seen = test_db
        .db()
        .snapshot(|s| {
            assert!(s.sequence() >= committed_at);
            s.get("people", &key![1])
        })
        .unwrap();
    assert_eq!(seen.unwrap().created_index, committed_at);
}

// ============================================================================
// Mutator semantics
// ============================================================================

#[test]
fn read_your_writes() {
    let test_db = TestDb::new();
    test_db
        .db()
        .mutator(|m| {
            let key = m.set("people", person(5, "CA"))?;
            assert_eq!(key, key![5]);
            let record = m.get("people", &key)?.expect("staged record visible");
            assert_eq!(record.value, person(5, "CA"));
            // Through the index as well
            let by_state = m.get(("people", "state"), &key!["CA"])?.unwrap();
            assert_eq!(int_field(&by_state, "id"), 5);
            Ok(())
        })
        .unwrap();
}

#[test]
fn unset_of_absent_key_is_not_an_error() {
    let test_db = TestDb::new();
    let sequence_before = test_db.db().sequence();
    test_db
        .db()
        .mutator(|m| {
            assert!(!m.unset("people", &key![404])?);
            assert!(m.get("people", &key![404])?.is_none());
            Ok(())
        })
        .unwrap();
    assert!(test_db.db().snapshot(|s| s.get("people", &key![404])).unwrap().is_none());
    // Nothing staged, nothing committed
    assert_eq!(test_db.db().sequence(), sequence_before);
}

#[test]
fn unset_removes_record_and_index_entry() {
    let test_db = TestDb::new();
    test_db.db().mutator(|m| m.set("people", person(1, "VA"))).unwrap();
    test_db
        .db()
        .mutator(|m| {
            assert!(m.unset("people", &key![1])?);
            Ok(())
        })
        .unwrap();
    test_db
        .db()
        .snapshot(|s| {
            assert!(s.get("people", &key![1])?.is_none());
            assert!(s.get(("people", "state"), &key!["VA"])?.is_none());
            Ok(())
        })
        .unwrap();
}

#[test]
fn rollback_discards_staged_writes() {
    let test_db = TestDb::new();
    let result = test_db
        .db()
        .mutator(|m| {
            m.set("people", person(1, "VA"))?;
            m.set("one", doc(serde_json::json!({ "id": 1 })))?;
            m.rollback();
            Ok("rolled back")
        })
        .unwrap();
    assert_eq!(result, "rolled back");
    assert_eq!(test_db.db().sequence(), 0);
    test_db
        .db()
        .snapshot(|s| {
            assert!(scan(s, "people")?.is_empty());
            assert!(scan(s, "one")?.is_empty());
            assert!(scan(s, ("people", "state"))?.is_empty());
            Ok(())
        })
        .unwrap();
}

#[test]
fn closure_error_rolls_back_everything() {
    let test_db = TestDb::new();
    let result: Result<()> = test_db.db().mutator(|m| {
        m.set("people", person(1, "VA"))?;
        m.set("people", person(2, "VA"))?;
        Err(Error::schema("caller gave up"))
    });
    assert!(matches!(result, Err(Error::Schema(_))));
    assert!(test_db
        .db()
        .snapshot(|s| scan(s, "people"))
        .unwrap()
        .is_empty());
}

#[test]
fn set_on_existing_key_overwrites() {
    let test_db = TestDb::new();
    test_db.db().mutator(|m| m.set("people", person(1, "VA"))).unwrap();
    test_db.db().mutator(|m| m.set("people", person(1, "MD"))).unwrap();

    let (record, va, md) = test_db
        .db()
        .snapshot(|s| {
            Ok((
                s.get("people", &key![1])?.unwrap(),
                s.get(("people", "state"), &key!["VA"])?,
                s.get(("people", "state"), &key!["MD"])?,
            ))
        })
        .unwrap();
    assert_eq!(str_field(&record, "state"), "MD");
    assert_eq!(record.created_index, 1);
    assert_eq!(record.modified_index, 2);
    assert!(va.is_none(), "stale index entry removed");
    assert!(md.is_some());
}

#[test]
fn staging_snapshot_sees_pending_writes_and_commits_nothing_itself() {
    let test_db = TestDb::new();
    test_db
        .db()
        .mutator(|m| {
            m.set("people", person(1, "VA"))?;
            let inside = m.snapshot(|s| s.get("people", &key![1]))?;
            assert!(inside.is_some());
            Ok(())
        })
        .unwrap();
    assert_eq!(test_db.db().sequence(), 1);
}

#[test]
fn unknown_store_and_bad_keys() {
    let test_db = TestDb::new();
    let db = test_db.db();
    assert!(matches!(
        db.mutator(|m| m.set("nope", person(1, "VA"))),
        Err(Error::UnknownTree(_))
    ));
    assert!(matches!(
        db.mutator(|m| m.set("people", doc(serde_json::json!({ "state": "VA" })))),
        Err(Error::InvalidKey(_))
    ));
    assert!(matches!(
        db.snapshot(|s| s.get(("people", "nope"), &key![1])),
        Err(Error::UnknownTree(_))
    ));
}

// ============================================================================
// Index lookup determinism
// ============================================================================

#[test]
fn index_get_returns_first_in_index_order() {
    let test_db = TestDb::new();
    test_db
        .db()
        .mutator(|m| {
            for id in [30, 10, 20] {
                m.set("people", person(id, "VA"))?;
            }
            m.set("people", person(5, "NC"))?;
            Ok(())
        })
        .unwrap();

    for _ in 0..5 {
        let first = test_db
            .db()
            .snapshot(|s| s.get(("people", "state"), &key!["VA"]))
            .unwrap()
            .unwrap();
        assert_eq!(int_field(&first, "id"), 10);
    }

    // Same answer from a mutator's view over the committed state
    let in_mutator = test_db
        .db()
        .mutator(|m| m.get(("people", "state"), &key!["VA"]))
        .unwrap()
        .unwrap();
    assert_eq!(int_field(&in_mutator, "id"), 10);
}
