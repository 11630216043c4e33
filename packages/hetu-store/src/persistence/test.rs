//! Schema and row-data persistence round-trip tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::config::StoreConfig;
use crate::database::{begin, Database};
use crate::table::{Field, IndexSpec, PermissionLevel, Persistency};
use crate::value::{FieldValue, ScalarType};

use super::persistence_manager::PersistenceManager;

fn config_in(dir: &TempDir) -> StoreConfig {
    StoreConfig {
        data_dir: dir.path().to_path_buf(),
        ..StoreConfig::default()
    }
}

#[test]
fn schema_round_trips_through_save_and_load() {
    let dir = TempDir::new().unwrap();
    let manager = PersistenceManager::new(&config_in(&dir));

    let db = Database::new();
    db.register_component(
        "Position".into(),
        vec![
            Field::new("owner", ScalarType::U64, FieldValue::U64(0)),
            Field::new("x", ScalarType::F32, FieldValue::F32(0.0)),
        ],
        vec![("owner".into(), IndexSpec::Unique)],
        Persistency::Persistent,
        PermissionLevel::User,
    )
    .unwrap();

    manager.save_schema(&db).unwrap();

    let restored = manager.load_schema().unwrap();
    assert_eq!(restored.component_count(), 1);
    let table = restored.component("Position").unwrap();
    assert_eq!(table.persistency, Persistency::Persistent);
    assert_eq!(table.permission, PermissionLevel::User);
    assert!(table.field("x").is_ok());
    assert!(table.field_index("owner").is_some());
}

#[test]
fn row_data_round_trips_and_restores_next_row_id() {
    let dir = TempDir::new().unwrap();
    let manager = PersistenceManager::new(&config_in(&dir));

    let db = Arc::new(Database::new());
    db.register_component(
        "Counter".into(),
        vec![Field::new("v", ScalarType::I64, FieldValue::I64(0))],
        vec![],
        Persistency::Persistent,
        PermissionLevel::Guest,
    )
    .unwrap();

    {
        let mut tx = begin(&db, PermissionLevel::User);
        tx.insert("Counter", vec![FieldValue::I64(10)]).unwrap();
        tx.insert("Counter", vec![FieldValue::I64(20)]).unwrap();
        tx.commit().unwrap();
    }

    let table = db.component("Counter").unwrap();
    manager.flush_table_data(&table).unwrap();

    let fresh = Database::new();
    fresh
        .register_component(
            "Counter".into(),
            vec![Field::new("v", ScalarType::I64, FieldValue::I64(0))],
            vec![],
            Persistency::Persistent,
            PermissionLevel::Guest,
        )
        .unwrap();
    let fresh_table = fresh.component("Counter").unwrap();
    manager.load_table_data(&fresh_table).unwrap();

    assert_eq!(fresh_table.row_count(), 2);
    // next_row_id must continue past the highest id ever issued, not the
    // highest id still alive, so a reload never reissues a freed id.
    assert_eq!(fresh_table.reserve_row_id(), 3);
}

#[test]
fn transient_components_are_never_flushed_to_disk() {
    let dir = TempDir::new().unwrap();
    let manager = PersistenceManager::new(&config_in(&dir));

    let db = Arc::new(Database::new());
    db.register_component(
        "Session".into(),
        vec![Field::new("token", ScalarType::Str, FieldValue::Str(String::new()))],
        vec![],
        Persistency::Transient,
        PermissionLevel::Guest,
    )
    .unwrap();

    {
        let mut tx = begin(&db, PermissionLevel::User);
        tx.insert("Session", vec![FieldValue::Str("abc".into())])
            .unwrap();
        tx.commit().unwrap();
    }

    let table = db.component("Session").unwrap();
    manager.flush_table_data(&table).unwrap();

    assert!(!dir.path().join("data").join("Session.bin").exists());
}
