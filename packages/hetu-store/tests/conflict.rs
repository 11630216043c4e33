use std::collections::HashMap;

use hetu_store::{
    begin, Database, Field, FieldValue, IndexSpec, PermissionLevel, Persistency, ScalarType,
    StoreError,
};

fn counters_db() -> Database {
    let db = Database::new();
    db.register_component(
        "Counter".to_string(),
        vec![Field::new("v", ScalarType::I64, FieldValue::I64(0))],
        vec![],
        Persistency::Transient,
        PermissionLevel::Guest,
    )
    .unwrap();
    db
}

/// Two transactions read the same row; the first to commit wins, the
/// second must fail with `Conflict` since its read-set's version no
/// longer matches and it staged an `Update` against the stale value.
#[test]
fn write_write_conflict_rejects_second_committer() {
    let db = std::sync::Arc::new(counters_db());
    let mut seed = begin(&db, PermissionLevel::Owner);
    let row_id = seed.insert("Counter", vec![FieldValue::I64(0)]).unwrap();
    seed.commit().unwrap();

    let mut tx_a = begin(&db, PermissionLevel::Owner);
    let mut tx_b = begin(&db, PermissionLevel::Owner);

    let (_, fields_a) = tx_a.select("Counter", row_id).unwrap().unwrap();
    let (_, fields_b) = tx_b.select("Counter", row_id).unwrap().unwrap();

    let FieldValue::I64(a) = fields_a[0] else { panic!("expected I64") };
    let FieldValue::I64(b) = fields_b[0] else { panic!("expected I64") };

    let mut update_a = HashMap::new();
    update_a.insert("v".to_string(), FieldValue::I64(a + 1));
    tx_a.update("Counter", row_id, update_a).unwrap();

    let mut update_b = HashMap::new();
    update_b.insert("v".to_string(), FieldValue::I64(b + 1));
    tx_b.update("Counter", row_id, update_b).unwrap();

    tx_a.commit().expect("first committer should succeed");
    let err = tx_b.commit().expect_err("second committer should conflict");
    assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");

    let mut verify = begin(&db, PermissionLevel::Owner);
    let (_, fields) = verify.select("Counter", row_id).unwrap().unwrap();
    assert_eq!(fields[0], FieldValue::I64(1));
}

/// A range scan's read-set tracks the whole window: inserting a new row
/// into the scanned range after the scan, then committing, must conflict
/// out anyone whose scan observed the range before the insert.
#[test]
fn range_scan_conflicts_on_concurrent_insert_into_window() {
    let db = std::sync::Arc::new(Database::new());
    db.register_component(
        "Position".to_string(),
        vec![
            Field::new("owner", ScalarType::U64, FieldValue::U64(0)),
            Field::new("x", ScalarType::F32, FieldValue::F32(0.0)),
        ],
        vec![("owner".to_string(), IndexSpec::Ordered)],
        Persistency::Transient,
        PermissionLevel::Guest,
    )
    .unwrap();

    let mut seed = begin(&db, PermissionLevel::Owner);
    seed.insert("Position", vec![FieldValue::U64(1), FieldValue::F32(0.0)])
        .unwrap();
    seed.commit().unwrap();

    let mut reader = begin(&db, PermissionLevel::Owner);
    let range = hetu_store::KeyRange {
        left: Some(FieldValue::U64(0)),
        right: Some(FieldValue::U64(10)),
    };
    let rows = reader
        .query("Position", "owner", &range, 10, hetu_store::Direction::Ascending)
        .unwrap();
    assert_eq!(rows.len(), 1);

    let mut writer = begin(&db, PermissionLevel::Owner);
    writer
        .insert("Position", vec![FieldValue::U64(2), FieldValue::F32(0.0)])
        .unwrap();
    writer.commit().unwrap();

    // Reader staged no writes but its range read is now stale; touch an
    // unrelated field on an already-read row so commit has something to
    // validate against the broadened range.
    let mut fields = HashMap::new();
    fields.insert("x".to_string(), FieldValue::F32(1.0));
    reader.update("Position", rows[0].0, fields).unwrap();

    let err = reader.commit().expect_err("range epoch should have advanced");
    assert!(matches!(err, StoreError::Conflict(_)), "got {err:?}");
}

/// A `Unique` index rejects a second row with the same value at commit
/// time, independent of whether the two inserts land in the same or
/// different transactions.
#[test]
fn unique_index_rejects_duplicate_across_transactions() {
    let db = std::sync::Arc::new(Database::new());
    db.register_component(
        "User".to_string(),
        vec![Field::new("name", ScalarType::Str, FieldValue::Str(String::new()))],
        vec![("name".to_string(), IndexSpec::Unique)],
        Persistency::Persistent,
        PermissionLevel::Guest,
    )
    .unwrap();

    let mut tx_a = begin(&db, PermissionLevel::Owner);
    tx_a.insert("User", vec![FieldValue::Str("alice".to_string())]).unwrap();
    tx_a.commit().unwrap();

    let mut tx_b = begin(&db, PermissionLevel::Owner);
    tx_b.insert("User", vec![FieldValue::Str("alice".to_string())]).unwrap();
    let err = tx_b.commit().expect_err("duplicate name should be rejected");
    assert!(matches!(err, StoreError::ConstraintViolated { .. }), "got {err:?}");
}

/// Two real OS threads race to update the same row: both read `v`, a
/// `Barrier` lines them up so their commits land back to back, and
/// exactly one must succeed. This is the failure mode a sequential
/// `tx_a.commit(); tx_b.commit()` test can't exercise — it only proves
/// the bug once threads are actually racing the validate-then-apply span.
#[test]
fn concurrent_threads_racing_the_same_row_only_one_commits() {
    let db = std::sync::Arc::new(counters_db());
    let mut seed = begin(&db, PermissionLevel::Owner);
    let row_id = seed.insert("Counter", vec![FieldValue::I64(0)]).unwrap();
    seed.commit().unwrap();

    const RACERS: usize = 8;
    let barrier = std::sync::Arc::new(std::sync::Barrier::new(RACERS));
    let mut handles = Vec::new();
    for _ in 0..RACERS {
        let db = std::sync::Arc::clone(&db);
        let barrier = std::sync::Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            let mut tx = begin(&db, PermissionLevel::Owner);
            let (_, fields) = tx.select("Counter", row_id).unwrap().unwrap();
            let FieldValue::I64(v) = fields[0] else { panic!("expected I64") };
            let mut update = HashMap::new();
            update.insert("v".to_string(), FieldValue::I64(v + 1));
            tx.update("Counter", row_id, update).unwrap();
            barrier.wait();
            tx.commit()
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racing commit should land, got {results:?}");

    let mut verify = begin(&db, PermissionLevel::Owner);
    let (_, fields) = verify.select("Counter", row_id).unwrap().unwrap();
    assert_eq!(fields[0], FieldValue::I64(1));
}

/// Same race, but against a `Unique` index: every thread's dry run clones
/// the index map before any of them apply, so without a commit-spanning
/// lock all of them can pass validation and silently overwrite each
/// other's claim. Only one may land.
#[test]
fn concurrent_threads_racing_a_unique_value_only_one_commits() {
    let db = std::sync::Arc::new(Database::new());
    db.register_component(
        "User".to_string(),
        vec![Field::new("name", ScalarType::Str, FieldValue::Str(String::new()))],
        vec![("name".to_string(), IndexSpec::Unique)],
        Persistency::Persistent,
        PermissionLevel::Guest,
    )
    .unwrap();

    const RACERS: usize = 4;
    let barrier = std::sync::Arc::new(std::sync::Barrier::new(RACERS));
    let mut handles = Vec::new();
    for _ in 0..RACERS {
        let db = std::sync::Arc::clone(&db);
        let barrier = std::sync::Arc::clone(&barrier);
        handles.push(std::thread::spawn(move || {
            let mut tx = begin(&db, PermissionLevel::Owner);
            tx.insert("User", vec![FieldValue::Str("alice".to_string())]).unwrap();
            barrier.wait();
            tx.commit()
        }));
    }

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let successes = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one racing claimant should land, got {results:?}");
}

/// Dropping a handle without calling `commit`/`rollback` aborts it, and
/// the staged insert never becomes visible to a later reader.
#[test]
fn dropped_handle_auto_aborts() {
    let db = std::sync::Arc::new(counters_db());
    {
        let mut tx = begin(&db, PermissionLevel::Owner);
        tx.insert("Counter", vec![FieldValue::I64(99)]).unwrap();
        // tx dropped here without commit/rollback
    }

    let table = db.component("Counter").unwrap();
    assert_eq!(table.row_count(), 0);
}
