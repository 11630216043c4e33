//! Component schema and row storage.
//!
//! Schema, row counter and row storage live together on one `Table`; the
//! lock-free raw-byte `AtomicBuffer` is replaced with a row_id-keyed row
//! map: components need stable row ids, per-row versions, and ordered index
//! scans that a flat byte buffer with O(n) equality scans can't give
//! without rewriting the scan path anyway.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::value::FieldValue;

use super::field::{Field, IndexSpec};
use super::policy::{PermissionLevel, Persistency};

/// One stored row: version plus field values in schema declaration order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RowSlot {
    pub version: u64,
    pub fields: Vec<FieldValue>,
}

/// An index declared over one field.
#[derive(Debug)]
pub enum IndexKind {
    /// Range-queryable, not unique: `value -> {row_id}` in value order,
    /// ties broken by ascending `row_id` (a `BTreeSet` already does this).
    Ordered(BTreeMap<FieldValue, BTreeSet<u64>>),
    /// Range-queryable and unique: `value -> row_id`.
    Unique(HashMap<FieldValue, u64>),
}

impl IndexKind {
    fn spec(&self) -> IndexSpec {
        match self {
            IndexKind::Ordered(_) => IndexSpec::Ordered,
            IndexKind::Unique(_) => IndexSpec::Unique,
        }
    }
}

/// Direction for an ordered/range query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Half-open range bound pair: `None` means unbounded on that side.
#[derive(Debug, Clone)]
pub struct KeyRange {
    pub left: Option<FieldValue>,
    pub right: Option<FieldValue>,
}

impl KeyRange {
    pub fn point(value: FieldValue) -> Self {
        Self {
            left: Some(value.clone()),
            right: None,
        }
    }

    pub fn unbounded() -> Self {
        Self {
            left: None,
            right: None,
        }
    }

    fn contains(&self, value: &FieldValue) -> bool {
        if let Some(l) = &self.left {
            if value < l {
                return false;
            }
        }
        if let Some(r) = &self.right {
            if value >= r {
                return false;
            }
        }
        true
    }
}

/// A component schema with its live row/index storage.
///
/// Locking discipline: `rows` and `index_data` are each guarded by their
/// own lock so a read-only `select`/`query` never contends with unrelated
/// tables; the transaction layer takes these locks per table, sorted by
/// name, at commit time (see `transaction/transaction.rs`).
#[derive(Debug)]
pub struct Table {
    pub name: String,
    pub fields: Vec<Field>,
    pub indices: HashMap<String, IndexSpec>,
    pub persistency: Persistency,
    pub permission: PermissionLevel,
    pub(crate) rows: RwLock<BTreeMap<u64, RowSlot>>,
    pub(crate) index_data: RwLock<HashMap<String, IndexKind>>,
    pub(crate) next_row_id: AtomicU64,
    /// Bumped every time a row is inserted into or removed from any index
    /// on this table; a range read records the epoch at read time, commit
    /// compares it to detect "something entered/left my consulted range".
    pub(crate) range_epoch: AtomicU64,
}

impl Table {
    /// Creates a new, empty component schema. Index field names must be a
    /// subset of `fields`' names.
    pub fn create(
        name: String,
        fields: Vec<Field>,
        indices: Vec<(String, IndexSpec)>,
        persistency: Persistency,
        permission: PermissionLevel,
    ) -> Result<Self, StoreError> {
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if !seen.insert(&field.name) {
                return Err(StoreError::FieldAlreadyExists {
                    table: name.clone(),
                    field: field.name.clone(),
                });
            }
        }

        let mut index_data = HashMap::new();
        let mut index_specs = HashMap::new();
        for (field_name, spec) in indices {
            if !fields.iter().any(|f| f.name == field_name) {
                return Err(StoreError::FieldNotFound {
                    table: name.clone(),
                    field: field_name,
                });
            }
            let kind = match spec {
                IndexSpec::Ordered => IndexKind::Ordered(BTreeMap::new()),
                IndexSpec::Unique => IndexKind::Unique(HashMap::new()),
            };
            index_specs.insert(field_name.clone(), kind.spec());
            index_data.insert(field_name, kind);
        }

        Ok(Self {
            name,
            fields,
            indices: index_specs,
            persistency,
            permission,
            rows: RwLock::new(BTreeMap::new()),
            index_data: RwLock::new(index_data),
            next_row_id: AtomicU64::new(1),
            range_epoch: AtomicU64::new(0),
        })
    }

    pub fn field_index(&self, name: &str) -> Option<usize> {
        self.fields.iter().position(|f| f.name == name)
    }

    pub fn field(&self, name: &str) -> Result<&Field, StoreError> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| StoreError::FieldNotFound {
                table: self.name.clone(),
                field: name.to_string(),
            })
    }

    /// Reserves the next row id. Assignment happens at stage time (not at
    /// commit) so a staged insert's id is stable for the rest of the
    /// transaction; the row's data only becomes visible to other
    /// transactions at commit.
    pub fn reserve_row_id(&self) -> u64 {
        self.next_row_id.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_range_epoch(&self) -> u64 {
        self.range_epoch.load(Ordering::Acquire)
    }

    pub fn select(&self, row_id: u64) -> Option<(u64, Vec<FieldValue>)> {
        let rows = self.rows.read().expect("rows lock poisoned");
        rows.get(&row_id)
            .map(|slot| (slot.version, slot.fields.clone()))
    }

    pub fn row_count(&self) -> usize {
        self.rows.read().expect("rows lock poisoned").len()
    }

    /// Ordered/unique range query, used both by direct `select`/`query`
    /// callers and by the broker to recompute a range subscription's
    /// window.
    pub fn query_range(
        &self,
        index: &str,
        range: &KeyRange,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<u64>, StoreError> {
        if limit == 0 {
            return Err(StoreError::InvalidQuery("limit must be >= 1".into()));
        }
        let index_data = self.index_data.read().expect("index lock poisoned");
        let kind = index_data
            .get(index)
            .ok_or_else(|| StoreError::FieldNotFound {
                table: self.name.clone(),
                field: index.to_string(),
            })?;

        let mut matches: Vec<(&FieldValue, u64)> = match kind {
            IndexKind::Ordered(map) => map
                .iter()
                .filter(|(v, _)| range.contains(v))
                .flat_map(|(v, ids)| ids.iter().map(move |id| (v, *id)))
                .collect(),
            IndexKind::Unique(map) => map
                .iter()
                .filter(|(v, _)| range.contains(v))
                .map(|(v, id)| (v, *id))
                .collect(),
        };

        // Ties always break on ascending row_id, regardless of direction;
        // a blanket reverse() for Descending would reverse row_id order
        // within equal values too, so the two columns sort independently.
        match direction {
            Direction::Ascending => matches.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(&b.1))),
            Direction::Descending => matches.sort_by(|a, b| b.0.cmp(a.0).then(a.1.cmp(&b.1))),
        }
        matches.truncate(limit);
        Ok(matches.into_iter().map(|(_, id)| id).collect())
    }

    /// Exact-value lookup on an indexed field: every row_id currently
    /// holding `value`, in ascending row_id order. Used by row
    /// subscriptions (§4.3), which key on equality rather than a range.
    pub fn equals_lookup(&self, index: &str, value: &FieldValue) -> Result<Vec<u64>, StoreError> {
        let index_data = self.index_data.read().expect("index lock poisoned");
        let kind = index_data
            .get(index)
            .ok_or_else(|| StoreError::FieldNotFound {
                table: self.name.clone(),
                field: index.to_string(),
            })?;
        Ok(match kind {
            IndexKind::Ordered(map) => map
                .get(value)
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default(),
            IndexKind::Unique(map) => map.get(value).copied().into_iter().collect(),
        })
    }

    pub fn point_lookup(&self, index: &str, value: &FieldValue) -> Result<Option<u64>, StoreError> {
        let index_data = self.index_data.read().expect("index lock poisoned");
        let kind = index_data
            .get(index)
            .ok_or_else(|| StoreError::FieldNotFound {
                table: self.name.clone(),
                field: index.to_string(),
            })?;
        Ok(match kind {
            IndexKind::Ordered(map) => map.get(value).and_then(|ids| ids.iter().next().copied()),
            IndexKind::Unique(map) => map.get(value).copied(),
        })
    }

    /// Applies a single validated insert. Callers (the transaction commit
    /// path) must already have checked uniqueness and reserved `row_id` via
    /// `reserve_row_id`.
    pub(crate) fn apply_insert(&self, row_id: u64, fields: Vec<FieldValue>) {
        let mut rows = self.rows.write().expect("rows lock poisoned");
        for (field_idx, field) in self.fields.iter().enumerate() {
            self.index_insert(field, &fields[field_idx], row_id);
        }
        rows.insert(row_id, RowSlot { version: 1, fields });
        self.range_epoch.fetch_add(1, Ordering::SeqCst);
    }

    pub(crate) fn apply_update(&self, row_id: u64, fields: Vec<FieldValue>) -> u64 {
        let mut rows = self.rows.write().expect("rows lock poisoned");
        let slot = rows.get_mut(&row_id).expect("row validated to exist");
        let mut index_membership_changed = false;
        for (field_idx, field) in self.fields.iter().enumerate() {
            if fields[field_idx] != slot.fields[field_idx] {
                self.index_remove(field, &slot.fields[field_idx], row_id);
                self.index_insert(field, &fields[field_idx], row_id);
                index_membership_changed = true;
            }
        }
        slot.fields = fields;
        slot.version += 1;
        // A range reader's recorded epoch must go stale whenever an update
        // moves a row into or out of the window it scanned, not just on
        // insert/delete.
        if index_membership_changed {
            self.range_epoch.fetch_add(1, Ordering::SeqCst);
        }
        slot.version
    }

    pub(crate) fn apply_delete(&self, row_id: u64) {
        let mut rows = self.rows.write().expect("rows lock poisoned");
        if let Some(slot) = rows.remove(&row_id) {
            for (field_idx, field) in self.fields.iter().enumerate() {
                self.index_remove(field, &slot.fields[field_idx], row_id);
            }
        }
        self.range_epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn index_insert(&self, field: &Field, value: &FieldValue, row_id: u64) {
        let mut index_data = self.index_data.write().expect("index lock poisoned");
        if let Some(kind) = index_data.get_mut(&field.name) {
            match kind {
                IndexKind::Ordered(map) => {
                    map.entry(value.clone()).or_default().insert(row_id);
                }
                IndexKind::Unique(map) => {
                    map.insert(value.clone(), row_id);
                }
            }
        }
    }

    fn index_remove(&self, field: &Field, value: &FieldValue, row_id: u64) {
        let mut index_data = self.index_data.write().expect("index lock poisoned");
        if let Some(kind) = index_data.get_mut(&field.name) {
            match kind {
                IndexKind::Ordered(map) => {
                    if let Some(set) = map.get_mut(value) {
                        set.remove(&row_id);
                        if set.is_empty() {
                            map.remove(value);
                        }
                    }
                }
                IndexKind::Unique(map) => {
                    if map.get(value) == Some(&row_id) {
                        map.remove(value);
                    }
                }
            }
        }
    }

    /// Whether `value` already has a live owner in a unique index other
    /// than `excluding_row_id` (used for a staged update's own old value).
    pub fn unique_conflict(
        &self,
        field_name: &str,
        value: &FieldValue,
        excluding_row_id: Option<u64>,
    ) -> bool {
        let index_data = self.index_data.read().expect("index lock poisoned");
        match index_data.get(field_name) {
            Some(IndexKind::Unique(map)) => match map.get(value) {
                Some(owner) => Some(*owner) != excluding_row_id,
                None => false,
            },
            _ => false,
        }
    }

    /// Replaces all rows and rebuilds every index from them; used when
    /// reloading a persistent component's data at startup. `next_row_id`
    /// is restored verbatim rather than recomputed from the loaded rows so
    /// a row id freed by a delete since the last flush is never reissued.
    pub(crate) fn restore_rows(&self, rows: Vec<(u64, RowSlot)>, next_row_id: u64) {
        let mut index_data = self.index_data.write().expect("index lock poisoned");
        for kind in index_data.values_mut() {
            match kind {
                IndexKind::Ordered(map) => map.clear(),
                IndexKind::Unique(map) => map.clear(),
            }
        }
        for (row_id, slot) in &rows {
            for (field_idx, field) in self.fields.iter().enumerate() {
                if let Some(kind) = index_data.get_mut(&field.name) {
                    match kind {
                        IndexKind::Ordered(map) => {
                            map.entry(slot.fields[field_idx].clone())
                                .or_default()
                                .insert(*row_id);
                        }
                        IndexKind::Unique(map) => {
                            map.insert(slot.fields[field_idx].clone(), *row_id);
                        }
                    }
                }
            }
        }
        drop(index_data);

        let mut table_rows = self.rows.write().expect("rows lock poisoned");
        *table_rows = rows.into_iter().collect();
        drop(table_rows);

        self.next_row_id.store(next_row_id, Ordering::SeqCst);
        self.range_epoch.fetch_add(1, Ordering::SeqCst);
    }

    /// Clears all rows and indices; used at startup for transient
    /// components.
    pub fn clear(&self) {
        self.rows.write().expect("rows lock poisoned").clear();
        let mut index_data = self.index_data.write().expect("index lock poisoned");
        for kind in index_data.values_mut() {
            match kind {
                IndexKind::Ordered(map) => map.clear(),
                IndexKind::Unique(map) => map.clear(),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::ScalarType;

    fn owner_field() -> Field {
        Field::new("owner", ScalarType::U64, FieldValue::U64(0))
    }

    fn make_table() -> Table {
        Table::create(
            "Position".into(),
            vec![
                owner_field(),
                Field::new("x", ScalarType::F32, FieldValue::F32(0.0)),
            ],
            vec![("owner".into(), IndexSpec::Unique)],
            Persistency::Transient,
            PermissionLevel::Guest,
        )
        .unwrap()
    }

    #[test]
    fn insert_assigns_sequential_ids_and_version_one() {
        let table = make_table();
        let id1 = table.reserve_row_id();
        table.apply_insert(id1, vec![FieldValue::U64(1), FieldValue::F32(0.0)]);
        let id2 = table.reserve_row_id();
        table.apply_insert(id2, vec![FieldValue::U64(2), FieldValue::F32(0.0)]);
        assert_eq!(id1, 1);
        assert_eq!(id2, 2);
        let (version, _) = table.select(id1).unwrap();
        assert_eq!(version, 1);
    }

    #[test]
    fn update_bumps_version_and_maintains_unique_index() {
        let table = make_table();
        let id = table.reserve_row_id();
        table.apply_insert(id, vec![FieldValue::U64(7), FieldValue::F32(0.0)]);
        assert!(table.unique_conflict("owner", &FieldValue::U64(7), None));
        assert!(!table.unique_conflict("owner", &FieldValue::U64(7), Some(id)));
        table.apply_update(id, vec![FieldValue::U64(8), FieldValue::F32(1.0)]);
        let (version, fields) = table.select(id).unwrap();
        assert_eq!(version, 2);
        assert_eq!(fields[0], FieldValue::U64(8));
        assert!(!table.unique_conflict("owner", &FieldValue::U64(7), None));
    }

    #[test]
    fn delete_frees_unique_value_and_removes_row() {
        let table = make_table();
        let id = table.reserve_row_id();
        table.apply_insert(id, vec![FieldValue::U64(3), FieldValue::F32(0.0)]);
        table.apply_delete(id);
        assert!(table.select(id).is_none());
        assert!(!table.unique_conflict("owner", &FieldValue::U64(3), None));
    }

    #[test]
    fn range_query_orders_by_value_then_row_id() {
        let table = Table::create(
            "Counter".into(),
            vec![owner_field()],
            vec![("owner".into(), IndexSpec::Ordered)],
            Persistency::Transient,
            PermissionLevel::Guest,
        )
        .unwrap();
        for v in [5u64, 1, 3] {
            let id = table.reserve_row_id();
            table.apply_insert(id, vec![FieldValue::U64(v)]);
        }
        let ids = table
            .query_range("owner", &KeyRange::unbounded(), 10, Direction::Ascending)
            .unwrap();
        assert_eq!(ids, vec![2, 3, 1]); // row_ids for values 1, 3, 5
    }
}
