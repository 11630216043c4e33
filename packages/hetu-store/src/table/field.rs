//! Field definition within a component schema.

use crate::value::{FieldValue, ScalarType};

/// One declared field of a [`Table`](super::Table) (component) schema.
#[derive(Debug, Clone)]
pub struct Field {
    /// Field name, unique within the table.
    pub name: String,
    /// Declared scalar type.
    pub ty: ScalarType,
    /// Value assigned to this field on insert when the caller omits it.
    pub default: FieldValue,
}

impl Field {
    pub fn new(name: impl Into<String>, ty: ScalarType, default: FieldValue) -> Self {
        Self {
            name: name.into(),
            ty,
            default,
        }
    }
}

/// Kind of index declared over a field: ordered (range-queryable) or
/// unique (range-queryable, plus a uniqueness constraint enforced at
/// commit time).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexSpec {
    Ordered,
    Unique,
}
