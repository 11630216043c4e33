//! Component store: schema-typed, indexed, versioned row storage.
//!
//! A [`Database`] holds a set of named [`Table`](table::Table)s. Rows are
//! identified by a stable `row_id` and carry a monotonically increasing
//! `version`. Readers and writers interact through a [`Transaction`]
//! (wrapped in a [`TransactionHandle`] for auto-abort-on-drop), which stages
//! changes and, on commit, validates them against the read-set recorded
//! during the transaction before applying them atomically.

pub mod config;
pub mod database;
pub mod error;
pub mod persistence;
pub mod table;
pub mod transaction;
pub mod value;

pub use config::StoreConfig;
pub use database::{begin, Database};
pub use error::StoreError;
pub use table::{Direction, Field, IndexKind, IndexSpec, KeyRange, PermissionLevel, Persistency, Table};
pub use transaction::{Change, ChangeEvent, ChangeOp, Transaction, TransactionHandle};
pub use value::{FieldValue, ScalarType};
