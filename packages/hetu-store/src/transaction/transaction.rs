use std::collections::{HashMap, HashSet};

use crate::error::StoreError;
use crate::table::{Direction, IndexKind, IndexSpec, KeyRange, PermissionLevel, Table};
use crate::value::FieldValue;

use super::change::{Change, ChangeEvent, ChangeOp};
use super::staging_buffer::StagingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    Committed,
    Aborted,
}

/// Optimistic transaction context: a read-set, staged per-table changes,
/// and the identity level writes are checked against.
///
/// Staging-buffer-per-table, sorted-name commit order. `commit` validates
/// the read-set and consulted ranges against current store state and
/// re-checks uniqueness against live data before applying anything,
/// matching §4.1's optimistic CAS contract.
#[derive(Debug)]
pub struct Transaction {
    identity_level: PermissionLevel,
    staging: HashMap<String, StagingBuffer>,
    /// `(table, row_id) -> version observed at first read`.
    reads: HashMap<(String, u64), u64>,
    /// `table -> range_epoch observed at first range read`.
    range_reads: HashMap<String, u64>,
    state: TxState,
}

impl Transaction {
    pub fn new(identity_level: PermissionLevel) -> Self {
        Self {
            identity_level,
            staging: HashMap::new(),
            reads: HashMap::new(),
            range_reads: HashMap::new(),
            state: TxState::Active,
        }
    }

    fn require_active(&self) -> Result<(), StoreError> {
        match self.state {
            TxState::Active => Ok(()),
            _ => Err(StoreError::TransactionInactive),
        }
    }

    fn staged(&self, table: &str, row_id: u64) -> Option<&Change> {
        self.staging.get(table).and_then(|buf| buf.get(row_id))
    }

    /// `select(component, row_id)`: reads this transaction's own staged
    /// change for the row if any (read-your-writes), otherwise the
    /// committed row, recording its version in the read-set.
    pub fn select(
        &mut self,
        table: &Table,
        row_id: u64,
    ) -> Result<Option<(u64, Vec<FieldValue>)>, StoreError> {
        self.require_active()?;
        if let Some(change) = self.staged(&table.name, row_id) {
            return Ok(match change {
                Change::Insert { fields, .. } => Some((1, fields.clone())),
                Change::Update {
                    expected_version,
                    fields,
                    ..
                } => Some((*expected_version, fields.clone())),
                Change::Delete { .. } => None,
            });
        }
        match table.select(row_id) {
            Some((version, fields)) => {
                self.reads
                    .entry((table.name.clone(), row_id))
                    .or_insert(version);
                Ok(Some((version, fields)))
            }
            None => Ok(None),
        }
    }

    /// `query(component, index, key_or_range, limit, direction)`: records
    /// the range consulted (via the table's range epoch) and the version of
    /// every row the result surfaces, so a concurrent insert/delete inside
    /// the range or a concurrent update to a returned row both register as
    /// conflicts at commit.
    pub fn query(
        &mut self,
        table: &Table,
        index: &str,
        range: &KeyRange,
        limit: usize,
        direction: Direction,
    ) -> Result<Vec<(u64, u64, Vec<FieldValue>)>, StoreError> {
        self.require_active()?;
        self.range_reads
            .entry(table.name.clone())
            .or_insert_with(|| table.current_range_epoch());

        let ids = table.query_range(index, range, limit, direction)?;
        let mut out = Vec::with_capacity(ids.len());
        for row_id in ids {
            if let Some((version, fields)) = table.select(row_id) {
                self.reads
                    .entry((table.name.clone(), row_id))
                    .or_insert(version);
                out.push((row_id, version, fields));
            }
        }
        Ok(out)
    }

    fn check_permission(&self, table: &Table) -> Result<(), StoreError> {
        if self.identity_level < table.permission {
            return Err(StoreError::Forbidden {
                table: table.name.clone(),
            });
        }
        Ok(())
    }

    fn check_types(table: &Table, fields: &[FieldValue]) -> Result<(), StoreError> {
        if fields.len() != table.fields.len() {
            return Err(StoreError::InvalidQuery(format!(
                "expected {} fields for '{}', got {}",
                table.fields.len(),
                table.name,
                fields.len()
            )));
        }
        for (field, value) in table.fields.iter().zip(fields.iter()) {
            if !field.ty.accepts(value) {
                return Err(StoreError::TypeMismatch {
                    table: table.name.clone(),
                    field: field.name.clone(),
                    expected: field.ty.name(),
                    got: value.type_name().to_string(),
                });
            }
        }
        Ok(())
    }

    /// `insert(component, fields) -> row_id`. Assigns a fresh row_id
    /// immediately (ids are never reused even if this transaction later
    /// aborts) and stages the row; it becomes visible to other
    /// transactions only on a successful `commit()`.
    pub fn insert(&mut self, table: &Table, fields: Vec<FieldValue>) -> Result<u64, StoreError> {
        self.require_active()?;
        self.check_permission(table)?;
        Self::check_types(table, &fields)?;
        let row_id = table.reserve_row_id();
        self.staging
            .entry(table.name.clone())
            .or_insert_with(|| StagingBuffer::new(table.name.clone()))
            .stage(Change::Insert { row_id, fields });
        Ok(row_id)
    }

    /// `update(component, row_id, fields)`: merges the given fields (by
    /// name) onto the row's current value — the row's own prior state if
    /// this transaction already staged a change for it, otherwise the
    /// committed state, recorded in the read-set.
    pub fn update(
        &mut self,
        table: &Table,
        row_id: u64,
        fields: HashMap<String, FieldValue>,
    ) -> Result<(), StoreError> {
        self.require_active()?;
        self.check_permission(table)?;

        let (expected_version, mut merged, already_staged_as_insert) =
            match self.staged(&table.name, row_id) {
                Some(Change::Insert { fields, .. }) => (1, fields.clone(), true),
                Some(Change::Update {
                    expected_version,
                    fields,
                    ..
                }) => (*expected_version, fields.clone(), false),
                Some(Change::Delete { .. }) => {
                    return Err(StoreError::RowNotFound {
                        table: table.name.clone(),
                        row_id,
                    })
                }
                None => {
                    let (version, current) =
                        table.select(row_id).ok_or_else(|| StoreError::RowNotFound {
                            table: table.name.clone(),
                            row_id,
                        })?;
                    self.reads
                        .entry((table.name.clone(), row_id))
                        .or_insert(version);
                    (version, current, false)
                }
            };

        for (name, value) in fields {
            let idx = table.field_index(&name).ok_or_else(|| StoreError::FieldNotFound {
                table: table.name.clone(),
                field: name.clone(),
            })?;
            let field = &table.fields[idx];
            if !field.ty.accepts(&value) {
                return Err(StoreError::TypeMismatch {
                    table: table.name.clone(),
                    field: name,
                    expected: field.ty.name(),
                    got: value.type_name().to_string(),
                });
            }
            merged[idx] = value;
        }

        let change = if already_staged_as_insert {
            Change::Insert {
                row_id,
                fields: merged,
            }
        } else {
            Change::Update {
                row_id,
                expected_version,
                fields: merged,
            }
        };
        self.staging
            .entry(table.name.clone())
            .or_insert_with(|| StagingBuffer::new(table.name.clone()))
            .stage(change);
        Ok(())
    }

    /// `delete(component, row_id)`.
    pub fn delete(&mut self, table: &Table, row_id: u64) -> Result<(), StoreError> {
        self.require_active()?;
        self.check_permission(table)?;

        let buf = self
            .staging
            .entry(table.name.clone())
            .or_insert_with(|| StagingBuffer::new(table.name.clone()));

        match buf.get(row_id) {
            Some(Change::Insert { .. }) => {
                // Never committed; cancel out. The row_id stays burned.
                buf.remove(row_id);
                return Ok(());
            }
            Some(Change::Update {
                expected_version, ..
            }) => {
                let expected_version = *expected_version;
                buf.stage(Change::Delete {
                    row_id,
                    expected_version,
                });
                return Ok(());
            }
            Some(Change::Delete { .. }) => return Ok(()),
            None => {}
        }

        let (version, _) = table.select(row_id).ok_or_else(|| StoreError::RowNotFound {
            table: table.name.clone(),
            row_id,
        })?;
        self.reads
            .entry((table.name.clone(), row_id))
            .or_insert(version);
        buf.stage(Change::Delete {
            row_id,
            expected_version: version,
        });
        Ok(())
    }

    pub fn has_staged_changes(&self) -> bool {
        self.staging.values().any(|b| !b.is_empty())
    }

    /// Every component name this transaction has staged a write for, read a
    /// row from, or consulted a range of — what `commit` needs resolved
    /// `Table`s for.
    pub fn touched_tables(&self) -> HashSet<String> {
        let mut out: HashSet<String> = self.staging.keys().cloned().collect();
        out.extend(self.reads.keys().map(|(table, _)| table.clone()));
        out.extend(self.range_reads.keys().cloned());
        out
    }

    pub fn is_active(&self) -> bool {
        self.state == TxState::Active
    }

    pub fn is_committed(&self) -> bool {
        self.state == TxState::Committed
    }

    pub fn is_aborted(&self) -> bool {
        self.state == TxState::Aborted
    }

    pub fn abort(&mut self) {
        if self.state == TxState::Active {
            self.state = TxState::Aborted;
            self.staging.clear();
        }
    }

    /// Validates the read-set, consulted ranges, and uniqueness, then
    /// applies every staged change and returns the commit-ordered events.
    /// On any validation failure, nothing is applied and the transaction
    /// becomes aborted.
    pub fn commit(&mut self, tables: &HashMap<String, &Table>) -> Result<Vec<ChangeEvent>, StoreError> {
        self.require_active()?;

        // 1. Read-set: every observed row must be unchanged.
        for ((table_name, row_id), expected_version) in &self.reads {
            let table = tables
                .get(table_name)
                .ok_or_else(|| StoreError::TableNotFound {
                    table: table_name.clone(),
                })?;
            match table.select(*row_id) {
                Some((version, _)) if version == *expected_version => {}
                _ => {
                    self.abort();
                    return Err(StoreError::Conflict(format!(
                        "row {row_id} in '{table_name}' changed since it was read"
                    )));
                }
            }
        }

        // 2. Consulted ranges: no insert/delete may have touched them since.
        for (table_name, expected_epoch) in &self.range_reads {
            let table = tables
                .get(table_name)
                .ok_or_else(|| StoreError::TableNotFound {
                    table: table_name.clone(),
                })?;
            if table.current_range_epoch() != *expected_epoch {
                self.abort();
                return Err(StoreError::Conflict(format!(
                    "a range consulted on '{table_name}' changed since it was read"
                )));
            }
        }

        // 3. Uniqueness dry run, table by table, in sorted order (also the
        //    lock-order-avoidance order writes apply in). Deletes release
        //    their value before inserts/updates in the same table claim,
        //    so "delete the old owner, insert a new one with that value"
        //    within one transaction is allowed.
        let mut table_names: Vec<&String> = self.staging.keys().collect();
        table_names.sort();

        for table_name in &table_names {
            let buf = &self.staging[*table_name];
            if buf.is_empty() {
                continue;
            }
            let table = tables
                .get(*table_name)
                .ok_or_else(|| StoreError::TableNotFound {
                    table: (*table_name).clone(),
                })?;

            let unique_fields: Vec<&str> = table
                .indices
                .iter()
                .filter(|(_, spec)| **spec == IndexSpec::Unique)
                .map(|(name, _)| name.as_str())
                .collect();
            if unique_fields.is_empty() {
                continue;
            }

            let mut owners: HashMap<&str, HashMap<FieldValue, u64>> = HashMap::new();
            {
                let index_data = table.index_data.read().expect("index lock poisoned");
                for field in &unique_fields {
                    if let Some(IndexKind::Unique(map)) = index_data.get(*field) {
                        owners.insert(field, map.clone());
                    }
                }
            }

            let changes = buf.ordered();
            let deleted_rows: HashSet<u64> = changes
                .iter()
                .filter_map(|c| match c {
                    Change::Delete { row_id, .. } => Some(*row_id),
                    _ => None,
                })
                .collect();
            for field in &unique_fields {
                if let Some(map) = owners.get_mut(field) {
                    map.retain(|_, row_id| !deleted_rows.contains(row_id));
                }
            }

            for change in &changes {
                let (row_id, fields) = match change {
                    Change::Insert { row_id, fields } => (*row_id, fields),
                    Change::Update { row_id, fields, .. } => (*row_id, fields),
                    Change::Delete { .. } => continue,
                };
                for field in &unique_fields {
                    let idx = table.field_index(field).expect("index field must exist");
                    let value = fields[idx].clone();
                    let owner = owners.entry(field).or_default();
                    match owner.get(&value) {
                        Some(existing) if *existing != row_id => {
                            self.abort();
                            return Err(StoreError::ConstraintViolated {
                                table: (*table_name).clone(),
                                field: field.to_string(),
                                value: format!("{value:?}"),
                            });
                        }
                        _ => {
                            owner.insert(value, row_id);
                        }
                    }
                }
            }
        }

        // 4. Apply. Nothing above mutated store state, so every failure
        //    path up to here left the store untouched.
        let mut events = Vec::new();
        for table_name in &table_names {
            let buf = &self.staging[*table_name];
            let table = tables[*table_name];
            for change in buf.ordered() {
                match change {
                    Change::Insert { row_id, fields } => {
                        table.apply_insert(*row_id, fields.clone());
                        events.push(ChangeEvent {
                            component: table.name.clone(),
                            row_id: *row_id,
                            op: ChangeOp::Insert,
                            new_version: 1,
                            changed_fields: table.fields.iter().map(|f| f.name.clone()).collect(),
                            fields: fields.clone(),
                        });
                    }
                    Change::Update { row_id, fields, .. } => {
                        let (_, before) = table.select(*row_id).expect("row validated to exist");
                        let new_version = table.apply_update(*row_id, fields.clone());
                        let changed_fields = table
                            .fields
                            .iter()
                            .zip(before.iter().zip(fields.iter()))
                            .filter(|(_, (old, new))| old != new)
                            .map(|(f, _)| f.name.clone())
                            .collect();
                        events.push(ChangeEvent {
                            component: table.name.clone(),
                            row_id: *row_id,
                            op: ChangeOp::Update,
                            new_version,
                            changed_fields,
                            fields: fields.clone(),
                        });
                    }
                    Change::Delete { row_id, .. } => {
                        table.apply_delete(*row_id);
                        events.push(ChangeEvent {
                            component: table.name.clone(),
                            row_id: *row_id,
                            op: ChangeOp::Delete,
                            new_version: 0,
                            changed_fields: table.fields.iter().map(|f| f.name.clone()).collect(),
                            fields: Vec::new(),
                        });
                    }
                }
            }
        }

        self.state = TxState::Committed;
        Ok(events)
    }
}
