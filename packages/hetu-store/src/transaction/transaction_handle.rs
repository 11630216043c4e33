use std::collections::HashMap;
use std::sync::Arc;

use crate::database::Database;
use crate::error::StoreError;
use crate::table::{Direction, KeyRange, PermissionLevel};
use crate::value::FieldValue;

use super::change::ChangeEvent;
use super::transaction::Transaction;

/// RAII handle around a [`Transaction`], resolving component names against
/// a [`Database`] so callers (System bodies, the broker's snapshot reads)
/// never touch a `Table` directly. Auto-aborts on drop if never committed
/// (`Drop` calling `abort()`).
#[derive(Debug)]
pub struct TransactionHandle {
    db: Arc<Database>,
    transaction: Transaction,
    auto_abort: bool,
}

impl TransactionHandle {
    pub fn new(db: Arc<Database>, identity_level: PermissionLevel) -> Self {
        Self {
            db,
            transaction: Transaction::new(identity_level),
            auto_abort: true,
        }
    }

    pub fn select(
        &mut self,
        component: &str,
        row_id: u64,
    ) -> Result<Option<(u64, Vec<FieldValue>)>, StoreError> {
        let table = self.db.component(component)?;
        self.transaction.select(&table, row_id)
    }

    pub fn query(
        &mut self,
        component: &str,
        index: &str,
        range: &KeyRange,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<(u64, u64, Vec<FieldValue>)>, StoreError> {
        let table = self.db.component(component)?;
        self.transaction.query(&table, index, range, limit, direction)
    }

    pub fn insert(&mut self, component: &str, fields: Vec<FieldValue>) -> Result<u64, StoreError> {
        let table = self.db.component(component)?;
        self.transaction.insert(&table, fields)
    }

    pub fn update(
        &mut self,
        component: &str,
        row_id: u64,
        fields: HashMap<String, FieldValue>,
    ) -> Result<(), StoreError> {
        let table = self.db.component(component)?;
        self.transaction.update(&table, row_id, fields)
    }

    pub fn delete(&mut self, component: &str, row_id: u64) -> Result<(), StoreError> {
        let table = self.db.component(component)?;
        self.transaction.delete(&table, row_id)
    }

    pub fn is_active(&self) -> bool {
        self.transaction.is_active()
    }

    pub fn is_committed(&self) -> bool {
        self.transaction.is_committed()
    }

    pub fn is_aborted(&self) -> bool {
        self.transaction.is_aborted()
    }

    pub fn has_staged_changes(&self) -> bool {
        self.transaction.has_staged_changes()
    }

    /// Commits, consuming the handle — a committed handle has nothing
    /// left to do.
    ///
    /// Holds the database's commit lock for the whole validate-then-apply
    /// span, so this commit's read-set/range/uniqueness checks and its
    /// writes happen atomically with respect to every other transaction's
    /// commit — see `Database::commit_lock`.
    pub fn commit(mut self) -> Result<Vec<ChangeEvent>, StoreError> {
        self.auto_abort = false;
        let tables: HashMap<String, Arc<crate::table::Table>> = self
            .transaction
            .touched_tables()
            .into_iter()
            .filter_map(|name| self.db.component(&name).ok().map(|t| (name, t)))
            .collect();
        let table_refs: HashMap<String, &crate::table::Table> =
            tables.iter().map(|(name, t)| (name.clone(), t.as_ref())).collect();
        let _commit_guard = self.db.commit_lock();
        self.transaction.commit(&table_refs)
    }

    pub fn rollback(mut self) {
        self.auto_abort = false;
        self.transaction.abort();
    }
}

impl Drop for TransactionHandle {
    fn drop(&mut self) {
        if self.auto_abort && self.transaction.is_active() {
            self.transaction.abort();
        }
    }
}
