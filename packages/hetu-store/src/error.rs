//! Store error types.

use thiserror::Error;

/// Errors produced by the component store.
#[derive(Error, Debug, Clone)]
pub enum StoreError {
    /// Table not found
    #[error("table '{table}' not found")]
    TableNotFound { table: String },

    /// Table already exists
    #[error("table '{0}' already exists")]
    TableAlreadyExists(String),

    /// Field not found in table
    #[error("field '{field}' not found in table '{table}'")]
    FieldNotFound { table: String, field: String },

    /// Field already exists in table
    #[error("field '{field}' already exists in table '{table}'")]
    FieldAlreadyExists { table: String, field: String },

    /// Value does not match the field's declared scalar type
    #[error("type mismatch on '{table}.{field}': expected {expected}, got {got}")]
    TypeMismatch {
        table: String,
        field: String,
        expected: String,
        got: String,
    },

    /// Row not found by id
    #[error("row {row_id} not found in table '{table}'")]
    RowNotFound { table: String, row_id: u64 },

    /// Malformed query: missing/zero limit, unknown direction, etc.
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    /// A unique index already has an entry for this value
    #[error("unique constraint on '{table}.{field}' violated by value {value}")]
    ConstraintViolated {
        table: String,
        field: String,
        value: String,
    },

    /// Optimistic commit validation failed: a read row changed version, a
    /// scanned range's epoch advanced, or a row this transaction staged a
    /// change for was concurrently deleted.
    #[error("transaction conflict: {0}")]
    Conflict(String),

    /// Transaction already committed or aborted
    #[error("transaction is no longer active")]
    TransactionInactive,

    /// Serialization/deserialization failure (schema or row persistence)
    #[error("serialization error: {0}")]
    SerializationError(String),

    /// A system body panicked mid-transaction
    #[error("system panicked: {0}")]
    SystemPanic(String),

    /// A `RwLock` guarding a table was poisoned by a prior panic
    #[error("lock poisoned for table '{table}'")]
    LockPoisoned { table: String },

    /// Operation exceeded its deadline
    #[error("operation timed out")]
    Timeout,

    /// Persisted data failed its checksum or couldn't be decoded
    #[error("data corruption: {0}")]
    DataCorruption(String),

    /// Disk full while persisting
    #[error("disk full: {0}")]
    DiskFull(String),

    /// Permanent I/O error during persistence
    #[error("I/O error: {0}")]
    IoError(String),

    /// Transient I/O error that may succeed on retry
    #[error("transient I/O error: {0}")]
    TransientIoError(String),

    /// Session identity level below the component's declared permission
    /// class for the attempted mutation.
    #[error("session lacks permission to write '{table}'")]
    Forbidden { table: String },
}
