//! Schema persistence, data file flush/load, and `migrate` schema diffing.

#[cfg(test)]
mod test;

mod io_utils;
mod persistence_manager;
mod schema;
mod schema_validation;

pub use io_utils::{classify_io_error, retry_io_operation};
pub use persistence_manager::PersistenceManager;
pub use schema::{FieldSchema, IndexSchema, SchemaFile, TableSchema};
pub use schema_validation::{diff_schema, SchemaDiff};

use crate::config::StoreConfig;
use crate::database::Database;
use crate::error::StoreError;

/// Flushes every persistent component and rewrites the schema file;
/// called after a DDL change (component registered/dropped) so a restart
/// before the next periodic tick still sees it.
pub fn save_schema_after_ddl(db: &Database, config: &StoreConfig) -> Result<(), StoreError> {
    let persistence = PersistenceManager::new(config);
    persistence.save_schema(db)
}
