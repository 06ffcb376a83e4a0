//! Merge cursor and join behavior through the database handle

use crate::common::*;
use serde_json::json;

fn ids(records: &[Record]) -> Vec<i64> {
    records.iter().map(|r| int_field(r, "id")).collect()
}

fn insert_one(m: &mut tessera::Mutator, ids: &[i64]) -> Result<()> {
    for id in ids {
        m.set("one", doc(json!({ "id": id })))?;
    }
    Ok(())
}

// ============================================================================
// Ordering
// ============================================================================

#[test]
fn reverse_from_key_in_staging_and_committed() {
    let test_db = TestDb::new();
    let db = test_db.db();

    let staged = db
        .mutator(|m| {
            insert_one(m, &[10, 8, 6, 4])?;
            m.cursor("one", key![9])?.reverse().collect::<Result<Vec<_>>>()
        })
        .unwrap();
    assert_eq!(ids(&staged), vec![8, 6, 4]);

    let committed = db
        .snapshot(|s| s.cursor("one", key![9])?.reverse().collect::<Result<Vec<_>>>())
        .unwrap();
    assert_eq!(ids(&committed), vec![8, 6, 4]);
}

#[test]
fn forward_cursor_merges_staged_over_committed() {
    let test_db = TestDb::new();
    let db = test_db.db();
    db.mutator(|m| insert_one(m, &[1, 3, 5, 7])).unwrap();

    let merged = db
        .mutator(|m| {
            insert_one(m, &[2, 6])?;
            m.set("one", doc(json!({ "id": 5, "updated": true })))?;
            m.unset("one", &key![3])?;
            let records = m.cursor("one", None)?.collect::<Result<Vec<_>>>()?;
            m.rollback();
            Ok(records)
        })
        .unwrap();
    assert_eq!(ids(&merged), vec![1, 2, 5, 6, 7]);
    assert_eq!(merged[2].value.get_path("updated"), Some(&Value::Bool(true)));

    // Rolled back: committed state unchanged
    let committed = db.snapshot(|s| scan(s, "one")).unwrap();
    assert_eq!(ids(&committed), vec![1, 3, 5, 7]);
}

#[test]
fn cursor_restarts_and_batches() {
    let test_db = TestDb::new();
    let db = test_db.db();
    let all: Vec<i64> = (0..100).collect();
    db.mutator(|m| insert_one(m, &all)).unwrap();

    db.snapshot(|s| {
        let mut cursor = s.cursor("one", None)?.with_batch_size(30);
        let mut sizes = Vec::new();
        loop {
            let batch = cursor.next_batch()?;
            if batch.is_empty() {
                break;
            }
            sizes.push(batch.len());
        }
        assert_eq!(sizes, vec![30, 30, 30, 10]);

        cursor.restart();
        assert_eq!(cursor.next_batch()?.len(), 30);

        // Each cursor() call is a fresh sequence
        assert_eq!(s.cursor("one", None)?.count(), 100);
        assert_eq!(s.cursor("one", None)?.count(), 100);
        Ok(())
    })
    .unwrap();
}

#[test]
fn cursor_is_lazy_and_pinned_to_its_snapshot() {
    let test_db = TestDb::new();
    let db = test_db.db();
    db.mutator(|m| insert_one(m, &[1, 2, 3])).unwrap();

    db.snapshot(|s| {
        let mut cursor = s.cursor("one", None)?;
        assert_eq!(int_field(&cursor.next().unwrap()?, "id"), 1);
        // A commit in the middle of the scan is not observed
        db.mutator(|m| {
            m.unset("one", &key![2])?;
            insert_one(m, &[4])
        })?;
        let rest = cursor.collect::<Result<Vec<_>>>()?;
        assert_eq!(ids(&rest), vec![2, 3]);
        Ok(())
    })
    .unwrap();
}

#[test]
fn index_cursor_orders_by_index_then_primary_key() {
    let test_db = TestDb::new();
    let db = test_db.db();
    db.mutator(|m| {
        m.set("people", person(3, "VA"))?;
        m.set("people", person(1, "MD"))?;
        m.set("people", person(2, "VA"))?;
        m.set("people", person(4, "WV"))?;
        Ok(())
    })
    .unwrap();

    let forward = db.snapshot(|s| scan(s, ("people", "state"))).unwrap();
    assert_eq!(ids(&forward), vec![1, 2, 3, 4]);

    let va_down = db
        .snapshot(|s| {
            s.cursor(("people", "state"), key!["VA", 3])?
                .reverse()
                .collect::<Result<Vec<_>>>()
        })
        .unwrap();
    assert_eq!(ids(&va_down), vec![3, 2, 1]);
}

// ============================================================================
// Join
// ============================================================================

fn load_people_and_states(db: &Database) {
    db.mutator(|m| {
        m.set("states", doc(json!({ "code": "VA", "name": "Virginia" })))?;
        m.set("states", doc(json!({ "code": "MD", "name": "Maryland" })))?;
        for (id, state) in [(1, "VA"), (2, "TX"), (3, "VA"), (4, "MD"), (5, "VA")] {
            m.set("people", person(id, state))?;
        }
        Ok(())
    })
    .unwrap();
}

#[test]
fn join_pairs_each_matching_left_record() {
    let test_db = TestDb::new();
    let db = test_db.db();
    load_people_and_states(db);

    let rows = db
        .snapshot(|s| {
            s.cursor("people", None)?
                .join("states", |left| left.value.get_path("state").cloned().map(|v| vec![v]))?
                .collect::<Result<Vec<_>>>()
        })
        .unwrap();

    // TX has no match and is dropped; left order is kept
    let pairs: Vec<(i64, String)> = rows
        .iter()
        .map(|(left, right)| (int_field(left, "id"), str_field(right, "name")))
        .collect();
    assert_eq!(
        pairs,
        vec![
            (1, "Virginia".to_string()),
            (3, "Virginia".to_string()),
            (4, "Maryland".to_string()),
            (5, "Virginia".to_string()),
        ]
    );
}

#[test]
fn join_from_index_against_store() {
    let test_db = TestDb::new();
    let db = test_db.db();
    load_people_and_states(db);

    let virginians = db
        .snapshot(|s| {
            let mut join = s
                .cursor(("people", "state"), key!["VA"])?
                .join("states", |left| left.value.get_path("state").cloned().map(|v| vec![v]))?;
            let mut rows = Vec::new();
            while let Some((left, right)) = join.next_pair()? {
                if str_field(&left, "state") != "VA" {
                    break;
                }
                rows.push((int_field(&left, "id"), str_field(&right, "name")));
            }
            Ok(rows)
        })
        .unwrap();
    assert_eq!(virginians.len(), 3);
    assert!(virginians.iter().all(|(_, name)| name == "Virginia"));
}

#[test]
fn join_onto_index_pairs_first_in_index_order() {
    let test_db = TestDb::new();
    let db = test_db.db();
    load_people_and_states(db);

    let code = |left: &Record| left.value.get_path("code").cloned().map(|v| vec![v]);

    // VA is shared by 1, 3 and 5: the lowest primary key comes first
    let committed = db
        .snapshot(|s| {
            s.cursor("states", None)?
                .join(("people", "state"), code)?
                .collect::<Result<Vec<_>>>()
        })
        .unwrap();
    let pairs: Vec<(String, i64)> = committed
        .iter()
        .map(|(left, right)| (str_field(left, "code"), int_field(right, "id")))
        .collect();
    assert_eq!(pairs, vec![("MD".to_string(), 4), ("VA".to_string(), 1)]);

    // A staged Virginian with a lower key takes the first slot
    let staged = db
        .mutator(|m| {
            m.set("people", person(0, "VA"))?;
            let rows = m
                .cursor("states", key!["VA"])?
                .join(("people", "state"), code)?
                .collect::<Result<Vec<_>>>()?;
            m.rollback();
            Ok(rows)
        })
        .unwrap();
    assert_eq!(staged.len(), 1);
    assert_eq!(int_field(&staged[0].1, "id"), 0);
}

#[test]
fn join_onto_unknown_tree_fails_up_front() {
    let test_db = TestDb::new();
    let db = test_db.db();
    let result = db.snapshot(|s| {
        s.cursor("people", None)?
            .join("countries", |_| None)
            .map(|_| ())
    });
    assert!(matches!(result, Err(Error::UnknownTree(_))));
}
