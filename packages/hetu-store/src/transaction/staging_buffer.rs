use std::collections::HashMap;

use super::change::Change;

/// Staged, not-yet-applied changes for a single table within one
/// transaction. Row-keyed (last write in a transaction wins per row) rather
/// than a flat byte-offset log, since rows have a stable
/// identity independent of storage position.
#[derive(Debug, Default)]
pub struct StagingBuffer {
    pub table_name: String,
    changes: HashMap<u64, Change>,
}

impl StagingBuffer {
    pub fn new(table_name: impl Into<String>) -> Self {
        Self {
            table_name: table_name.into(),
            changes: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn get(&self, row_id: u64) -> Option<&Change> {
        self.changes.get(&row_id)
    }

    pub fn stage(&mut self, change: Change) {
        self.changes.insert(change.row_id(), change);
    }

    /// Removes a staged change for `row_id`, e.g. when a delete cancels out
    /// a not-yet-committed insert made earlier in the same transaction.
    pub fn remove(&mut self, row_id: u64) -> Option<Change> {
        self.changes.remove(&row_id)
    }

    /// All staged changes, row_id ascending, so commit applies and emits
    /// events in a deterministic order.
    pub fn ordered(&self) -> Vec<&Change> {
        let mut entries: Vec<_> = self.changes.values().collect();
        entries.sort_by_key(|c| c.row_id());
        entries
    }
}
