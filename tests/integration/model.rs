//! Random set/unset programs checked against an in-memory model

use crate::common::*;
use proptest::prelude::*;
use serde_json::json;
use std::collections::BTreeMap;

#[derive(Debug, Clone)]
enum Action {
    Set { id: i64, state: &'static str },
    Unset { id: i64 },
}

/// One mutator's worth of actions; `rollback` discards all of them
#[derive(Debug, Clone)]
struct Batch {
    actions: Vec<Action>,
    rollback: bool,
}

const STATES: [&str; 4] = ["CA", "MD", "NY", "VA"];

fn action() -> impl Strategy<Value = Action> {
    prop_oneof![
        3 => (0i64..40, 0usize..STATES.len()).prop_map(|(id, s)| Action::Set { id, state: STATES[s] }),
        1 => (0i64..40).prop_map(|id| Action::Unset { id }),
    ]
}

fn batch() -> impl Strategy<Value = Batch> {
    (prop::collection::vec(action(), 0..12), prop::bool::weighted(0.15))
        .prop_map(|(actions, rollback)| Batch { actions, rollback })
}

type Model = BTreeMap<i64, &'static str>;

fn run(db: &Database, model: &mut Model, batch: &Batch) {
    let mut staged = model.clone();
    db.mutator(|m| {
        for action in &batch.actions {
            match *action {
                Action::Set { id, state } => {
                    m.set("people", doc(json!({ "id": id, "state": state })))?;
                    staged.insert(id, state);
                }
                Action::Unset { id } => {
                    let removed = m.unset("people", &key![id])?;
                    assert_eq!(removed, staged.remove(&id).is_some());
                }
            }
        }
        if batch.rollback {
            m.rollback();
        }
        Ok(())
    })
    .unwrap();
    if !batch.rollback {
        *model = staged;
    }
}

fn check(db: &Database, model: &Model) {
    db.snapshot(|s| {
        let records = scan(s, "people")?;
        let actual: Vec<(i64, String)> = records
            .iter()
            .map(|r| (int_field(r, "id"), str_field(r, "state")))
            .collect();
        let expected: Vec<(i64, String)> = model.iter().map(|(id, st)| (*id, st.to_string())).collect();
        assert_eq!(actual, expected);

        // The index holds exactly one entry per record, ordered by state then id
        let by_state: Vec<(String, i64)> = scan(s, ("people", "state"))?
            .iter()
            .map(|r| (str_field(r, "state"), int_field(r, "id")))
            .collect();
        let mut expected_index: Vec<(String, i64)> =
            model.iter().map(|(id, st)| (st.to_string(), *id)).collect();
        expected_index.sort();
        assert_eq!(by_state, expected_index);

        // Reverse cursor is the mirror of the forward one
        let mut reversed: Vec<i64> = s
            .cursor("people", None)?
            .reverse()
            .map(|r| r.map(|r| int_field(&r, "id")))
            .collect::<Result<_>>()?;
        reversed.reverse();
        assert_eq!(reversed, model.keys().copied().collect::<Vec<_>>());
        Ok(())
    })
    .unwrap();
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn committed_state_matches_model_across_reopen(batches in prop::collection::vec(batch(), 1..8)) {
        let mut test_db = TestDb::new();
        let mut model = Model::new();

        for batch in &batches {
            run(test_db.db(), &mut model, batch);
            check(test_db.db(), &model);
        }

        let sequence = test_db.db().sequence();
        test_db.reopen();
        prop_assert_eq!(test_db.db().sequence(), sequence);
        check(test_db.db(), &model);
    }
}
