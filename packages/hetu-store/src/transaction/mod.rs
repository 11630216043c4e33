//! Transaction isolation, staging buffers, and atomic optimistic commit.

mod change;
mod staging_buffer;
#[allow(clippy::module_inception)]
mod transaction;
mod transaction_handle;

pub use change::{Change, ChangeEvent, ChangeOp};
pub use staging_buffer::StagingBuffer;
pub use transaction::Transaction;
pub use transaction_handle::TransactionHandle;

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use crate::database::Database;
    use crate::table::{Field, IndexSpec, PermissionLevel, Persistency};
    use crate::value::{FieldValue, ScalarType};

    fn counter_db() -> Arc<Database> {
        let db = Database::new();
        db.register_component(
            "Counter".into(),
            vec![Field::new("v", ScalarType::I64, FieldValue::I64(0))],
            vec![],
            Persistency::Transient,
            PermissionLevel::Guest,
        )
        .unwrap();
        Arc::new(db)
    }

    #[test]
    fn insert_then_commit_is_visible_to_new_transaction() {
        let db = counter_db();
        let mut tx = crate::database::begin(&db, PermissionLevel::User);
        let id = tx.insert("Counter", vec![FieldValue::I64(5)]).unwrap();
        tx.commit().unwrap();

        let mut tx2 = crate::database::begin(&db, PermissionLevel::User);
        let (version, fields) = tx2.select("Counter", id).unwrap().unwrap();
        assert_eq!(version, 1);
        assert_eq!(fields[0], FieldValue::I64(5));
    }

    #[test]
    fn concurrent_read_write_conflict_is_detected() {
        let db = counter_db();
        let mut seed = crate::database::begin(&db, PermissionLevel::User);
        let id = seed.insert("Counter", vec![FieldValue::I64(5)]).unwrap();
        seed.commit().unwrap();

        let mut tx_a = crate::database::begin(&db, PermissionLevel::User);
        let mut tx_b = crate::database::begin(&db, PermissionLevel::User);

        let (_, fields_a) = tx_a.select("Counter", id).unwrap().unwrap();
        let (_, fields_b) = tx_b.select("Counter", id).unwrap().unwrap();

        let mut update_a = HashMap::new();
        if let FieldValue::I64(v) = fields_a[0] {
            update_a.insert("v".to_string(), FieldValue::I64(v + 1));
        }
        tx_a.update("Counter", id, update_a).unwrap();

        let mut update_b = HashMap::new();
        if let FieldValue::I64(v) = fields_b[0] {
            update_b.insert("v".to_string(), FieldValue::I64(v + 1));
        }
        tx_b.update("Counter", id, update_b).unwrap();

        assert!(tx_a.commit().is_ok());
        let result = tx_b.commit();
        assert!(matches!(result, Err(crate::error::StoreError::Conflict(_))));
    }

    #[test]
    fn unique_index_rejects_second_claimant() {
        let db = Database::new();
        db.register_component(
            "User".into(),
            vec![Field::new("name", ScalarType::Str, FieldValue::Str(String::new()))],
            vec![("name".into(), IndexSpec::Unique)],
            Persistency::Transient,
            PermissionLevel::Guest,
        )
        .unwrap();
        let db = Arc::new(db);

        let mut tx_a = crate::database::begin(&db, PermissionLevel::User);
        let mut tx_b = crate::database::begin(&db, PermissionLevel::User);
        tx_a.insert("User", vec![FieldValue::Str("alice".into())])
            .unwrap();
        tx_b.insert("User", vec![FieldValue::Str("alice".into())])
            .unwrap();

        assert!(tx_a.commit().is_ok());
        let result = tx_b.commit();
        assert!(matches!(
            result,
            Err(crate::error::StoreError::ConstraintViolated { .. })
        ));
    }

    #[test]
    fn forbidden_when_identity_below_component_permission() {
        let db = Database::new();
        db.register_component(
            "Admin".into(),
            vec![Field::new("v", ScalarType::I64, FieldValue::I64(0))],
            vec![],
            Persistency::Transient,
            PermissionLevel::Admin,
        )
        .unwrap();
        let db = Arc::new(db);

        let mut tx = crate::database::begin(&db, PermissionLevel::User);
        let result = tx.insert("Admin", vec![FieldValue::I64(1)]);
        assert!(matches!(result, Err(crate::error::StoreError::Forbidden { .. })));
    }

    #[test]
    fn dropping_without_commit_discards_staged_insert() {
        let db = counter_db();
        {
            let mut tx = crate::database::begin(&db, PermissionLevel::User);
            tx.insert("Counter", vec![FieldValue::I64(1)]).unwrap();
            // dropped here without commit
        }
        let table = db.component("Counter").unwrap();
        assert_eq!(table.row_count(), 0);
    }
}
