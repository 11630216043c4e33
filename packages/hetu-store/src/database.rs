//! Database container managing component (table) schemas.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::error::StoreError;
use crate::table::{Field, IndexSpec, PermissionLevel, Persistency, Table};
use crate::transaction::TransactionHandle;

/// Container holding every registered component schema and its live rows.
///
/// `RwLock<HashMap<String, Table>>`, tables looked up by name; values are
/// `Arc<Table>` so a `TransactionHandle` can hold onto the tables it
/// touches for the transaction's whole lifetime without keeping the outer
/// map locked — each `Table` already guards its own rows/indices
/// internally.
///
/// `commit_lock` serializes the validate-then-apply span of every
/// transaction's `commit()` against every other transaction's, across all
/// tables at once. Per-table `rows`/`index_data` locks on their own only
/// guard each individual read/write, not the gap between a commit's
/// read-set/range/uniqueness validation and its apply — two commits could
/// otherwise both validate against the same pre-commit state before either
/// applies, so neither would see the other's write and the optimistic
/// check would never fire. Holding this for the whole commit makes commits
/// serialize the way the single-writer store `commit()` is modeled on
/// does, while reads against committed state still proceed concurrently
/// through each table's own locks.
#[derive(Debug, Default)]
pub struct Database {
    tables: RwLock<HashMap<String, Arc<Table>>>,
    commit_lock: Mutex<()>,
}

impl Database {
    pub fn new() -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            commit_lock: Mutex::new(()),
        }
    }

    /// Registers a new component schema: name, fields, indices,
    /// persistency and permission, all declared up front.
    pub fn register_component(
        &self,
        name: String,
        fields: Vec<Field>,
        indices: Vec<(String, IndexSpec)>,
        persistency: Persistency,
        permission: PermissionLevel,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().expect("tables lock poisoned");
        if tables.contains_key(&name) {
            return Err(StoreError::TableAlreadyExists(name));
        }
        let table = Table::create(name.clone(), fields, indices, persistency, permission)?;
        tables.insert(name, Arc::new(table));
        Ok(())
    }

    pub fn drop_component(&self, name: &str) -> Result<(), StoreError> {
        let mut tables = self.tables.write().expect("tables lock poisoned");
        tables
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| StoreError::TableNotFound {
                table: name.to_string(),
            })
    }

    pub fn component(&self, name: &str) -> Result<Arc<Table>, StoreError> {
        let tables = self.tables.read().expect("tables lock poisoned");
        tables
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::TableNotFound {
                table: name.to_string(),
            })
    }

    pub fn component_names(&self) -> Vec<String> {
        let tables = self.tables.read().expect("tables lock poisoned");
        tables.keys().cloned().collect()
    }

    pub fn component_count(&self) -> usize {
        self.tables.read().expect("tables lock poisoned").len()
    }

    /// Clears every transient component's rows; called once at startup
    /// before persistent components are reloaded.
    pub fn clear_transient(&self) {
        let tables = self.tables.read().expect("tables lock poisoned");
        for table in tables.values() {
            if table.persistency == Persistency::Transient {
                table.clear();
            }
        }
    }

    /// Acquired by [`TransactionHandle::commit`] for the entire
    /// validate-then-apply span. Not exposed outside the crate: callers
    /// commit through `TransactionHandle`, never against a `Database`
    /// directly.
    pub(crate) fn commit_lock(&self) -> MutexGuard<'_, ()> {
        self.commit_lock.lock().expect("commit lock poisoned")
    }
}

/// Opens a new transaction against `db` for a caller at `identity_level`.
/// Convenience wrapper so callers write `hetu_store::begin(&db, level)`
/// instead of reaching into `TransactionHandle` construction directly.
pub fn begin(db: &Arc<Database>, identity_level: PermissionLevel) -> TransactionHandle {
    TransactionHandle::new(Arc::clone(db), identity_level)
}
