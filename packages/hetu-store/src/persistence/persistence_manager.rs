//! Persistence manager: schema file plus per-component row-data flush/load.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{Read as IoRead, Write as IoWrite};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::StoreError;
use crate::table::{Field, RowSlot, Table};

use super::io_utils::{classify_io_error, retry_io_operation};
use super::schema::{FieldSchema, IndexSchema, SchemaFile, TableSchema};

/// On-disk shape of one persistent component's row data: every live row
/// keyed by id, plus the id counter so restart doesn't reissue an id that
/// was freed by a delete before the last flush.
#[derive(Debug, Serialize, Deserialize)]
struct TableData {
    next_row_id: u64,
    rows: Vec<(u64, RowSlot)>,
}

/// Saves and restores component schemas and row data across restarts.
///
/// JSON schema file written through a temp-file-then-rename, `crc32fast`-
/// checked row data, and an `io_utils`-wrapped retry loop for transient
/// I/O errors. Row data is `bincode`-encoded `RowSlot` maps keyed by
/// row_id.
#[derive(Debug)]
pub struct PersistenceManager {
    data_dir: PathBuf,
    flush_interval_ticks: u32,
    tick_count: AtomicU64,
    max_retries: u32,
    retry_delay_ms: u64,
}

impl PersistenceManager {
    pub fn new(config: &StoreConfig) -> Self {
        Self {
            data_dir: config.data_dir.clone(),
            flush_interval_ticks: config.persistence_interval_ticks.max(1),
            tick_count: AtomicU64::new(0),
            max_retries: config.persistence_max_retries,
            retry_delay_ms: config.persistence_retry_delay_ms,
        }
    }

    /// Saves the database's component schemas to disk.
    pub fn save_schema(&self, db: &Database) -> Result<(), StoreError> {
        retry_io_operation(
            || self.save_schema_internal(db),
            self.max_retries,
            self.retry_delay_ms,
            "save_schema",
        )
    }

    fn save_schema_internal(&self, db: &Database) -> Result<(), StoreError> {
        let schema = self.build_schema(db)?;
        let schema_json = serde_json::to_string_pretty(&schema)
            .map_err(|e| StoreError::SerializationError(e.to_string()))?;

        fs::create_dir_all(&self.data_dir)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))?;

        let temp_path = self.data_dir.join("schema.json.tmp");
        let final_path = self.data_dir.join("schema.json");

        let mut file = File::create(&temp_path)
            .map_err(|e| classify_io_error(e, "Failed to create temp schema file"))?;
        file.write_all(schema_json.as_bytes())
            .map_err(|e| classify_io_error(e, "Failed to write schema"))?;
        file.sync_all()
            .map_err(|e| classify_io_error(e, "Failed to sync schema"))?;

        fs::rename(&temp_path, &final_path)
            .map_err(|e| classify_io_error(e, "Failed to rename schema file"))?;

        Ok(())
    }

    /// Reads the schema file, if present, returning it unparsed into a
    /// `Database` so `migrate` can diff it without mutating anything.
    pub fn read_schema_file(&self) -> Result<Option<SchemaFile>, StoreError> {
        let schema_path = self.data_dir.join("schema.json");
        if !schema_path.exists() {
            return Ok(None);
        }
        let contents = self.read_schema_contents(&schema_path)?;
        let schema: SchemaFile = serde_json::from_str(&contents)
            .map_err(|e| StoreError::SerializationError(format!("failed to parse schema: {e}")))?;
        if schema.version != 1 {
            return Err(StoreError::SerializationError(format!(
                "unsupported schema version: {}",
                schema.version
            )));
        }
        Ok(Some(schema))
    }

    /// Loads the schema file, if present, registering every component it
    /// describes into a fresh `Database`. Row data for persistent
    /// components still needs `load_table_data` per table once the caller
    /// has resolved `Arc<Table>` handles.
    pub fn load_schema(&self) -> Result<Database, StoreError> {
        let db = Database::new();
        let Some(schema) = self.read_schema_file()? else {
            return Ok(db);
        };

        for (name, table_schema) in &schema.tables {
            let fields: Vec<Field> = table_schema
                .fields
                .iter()
                .map(|f| Field::new(f.name.clone(), f.ty.clone(), f.default.clone()))
                .collect();
            let indices: Vec<(String, crate::table::IndexSpec)> = table_schema
                .indices
                .iter()
                .map(|i| (i.field.clone(), i.kind))
                .collect();
            db.register_component(
                name.clone(),
                fields,
                indices,
                table_schema.persistency,
                table_schema.permission,
            )?;
        }

        Ok(db)
    }

    fn read_schema_contents(&self, path: &std::path::Path) -> Result<String, StoreError> {
        let mut file =
            File::open(path).map_err(|e| classify_io_error(e, "Failed to open schema file"))?;
        let mut contents = String::new();
        file.read_to_string(&mut contents)
            .map_err(|e| classify_io_error(e, "Failed to read schema file"))?;
        Ok(contents)
    }

    /// Flushes one table's row data to disk, skipping transient tables.
    pub fn flush_table_data(&self, table: &Table) -> Result<(), StoreError> {
        if table.persistency == crate::table::Persistency::Transient {
            return Ok(());
        }
        retry_io_operation(
            || self.flush_table_data_internal(table),
            self.max_retries,
            self.retry_delay_ms,
            "flush_table_data",
        )
    }

    fn flush_table_data_internal(&self, table: &Table) -> Result<(), StoreError> {
        fs::create_dir_all(&self.data_dir)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))?;
        let data_dir = self.data_dir.join("data");
        fs::create_dir_all(&data_dir)
            .map_err(|e| classify_io_error(e, "Failed to create data directory"))?;

        let temp_path = data_dir.join(format!("{}.bin.tmp", table.name));
        let final_path = data_dir.join(format!("{}.bin", table.name));

        let rows = table.rows.read().expect("rows lock poisoned");
        let data = TableData {
            next_row_id: table.next_row_id.load(Ordering::SeqCst),
            rows: rows.iter().map(|(id, slot)| (*id, slot.clone())).collect(),
        };
        drop(rows);

        let encoded = bincode::serialize(&data)
            .map_err(|e| StoreError::SerializationError(format!("row data: {e}")))?;

        let mut hasher = Hasher::new();
        hasher.update(&encoded);
        let checksum = hasher.finalize();

        let mut file = File::create(&temp_path)
            .map_err(|e| classify_io_error(e, "Failed to create temp data file"))?;
        file.write_all(&checksum.to_le_bytes())
            .map_err(|e| classify_io_error(e, "Failed to write checksum"))?;
        file.write_all(&encoded)
            .map_err(|e| classify_io_error(e, "Failed to write data"))?;
        file.sync_all()
            .map_err(|e| classify_io_error(e, "Failed to sync data"))?;

        fs::rename(&temp_path, &final_path)
            .map_err(|e| classify_io_error(e, "Failed to rename data file"))?;

        Ok(())
    }

    /// Loads one table's row data from disk, restoring `next_row_id`. A
    /// missing data file leaves the table empty (first boot, or a
    /// component added since the last flush).
    pub fn load_table_data(&self, table: &Table) -> Result<(), StoreError> {
        let data_path = self
            .data_dir
            .join("data")
            .join(format!("{}.bin", table.name));
        if !data_path.exists() {
            return Ok(());
        }

        let mut file =
            File::open(&data_path).map_err(|e| classify_io_error(e, "Failed to open data file"))?;
        let mut raw = Vec::new();
        file.read_to_end(&mut raw)
            .map_err(|e| classify_io_error(e, "Failed to read data file"))?;

        if raw.len() < 4 {
            return Err(StoreError::DataCorruption(format!(
                "data file for '{}' is shorter than its checksum header",
                table.name
            )));
        }
        let (checksum_bytes, encoded) = raw.split_at(4);
        let expected_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());

        let mut hasher = Hasher::new();
        hasher.update(encoded);
        let actual_checksum = hasher.finalize();
        if actual_checksum != expected_checksum {
            return Err(StoreError::DataCorruption(format!(
                "checksum mismatch for table '{}': expected {:08x}, got {:08x}",
                table.name, expected_checksum, actual_checksum
            )));
        }

        let data: TableData = bincode::deserialize(encoded)
            .map_err(|e| StoreError::SerializationError(format!("row data: {e}")))?;

        table.restore_rows(data.rows, data.next_row_id);

        Ok(())
    }

    /// Called on each engine tick; flushes all persistent tables every
    /// `flush_interval_ticks` ticks.
    pub fn tick(&self, db: &Database) -> Result<(), StoreError> {
        let tick = self.tick_count.fetch_add(1, Ordering::SeqCst);
        if tick % self.flush_interval_ticks as u64 == 0 {
            tracing::debug!(tick, interval = self.flush_interval_ticks, "persistence flush due");
            self.flush_all_tables(db)?;
        }
        Ok(())
    }

    /// Flushes every persistent table in the database. Logs and continues
    /// past a single table's failure instead of aborting the whole pass.
    pub fn flush_all_tables(&self, db: &Database) -> Result<(), StoreError> {
        let names = db.component_names();
        let mut flushed = 0usize;
        let mut errors = 0usize;
        for name in &names {
            let Ok(table) = db.component(name) else {
                continue;
            };
            if table.persistency != crate::table::Persistency::Persistent {
                continue;
            }
            if let Err(e) = self.flush_table_data(&table) {
                tracing::error!(table = %name, error = %e, "failed to flush table");
                errors += 1;
            } else {
                flushed += 1;
            }
        }
        tracing::debug!(flushed, errors, total = names.len(), "flush pass complete");
        Ok(())
    }

    fn build_schema(&self, db: &Database) -> Result<SchemaFile, StoreError> {
        let mut tables = HashMap::new();
        for name in db.component_names() {
            let table = db.component(&name)?;
            let fields = table
                .fields
                .iter()
                .map(|f| FieldSchema {
                    name: f.name.clone(),
                    ty: f.ty.clone(),
                    default: f.default.clone(),
                })
                .collect();
            let indices = table
                .indices
                .iter()
                .map(|(field, kind)| IndexSchema {
                    field: field.clone(),
                    kind: *kind,
                })
                .collect();
            tables.insert(
                name,
                TableSchema {
                    fields,
                    indices,
                    persistency: table.persistency,
                    permission: table.permission,
                },
            );
        }
        Ok(SchemaFile { version: 1, tables })
    }
}
