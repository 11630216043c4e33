//! Closed scalar type system.
//!
//! Component schemas are fixed-shape and declared up front, so the set of
//! representable scalars is closed: a row is a `Vec<FieldValue>` matched
//! position-for-position against the table's `Vec<ScalarType>`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// A field's declared scalar type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScalarType {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    Bool,
    /// Fixed-length byte array; values must carry exactly this many bytes.
    Bytes(usize),
    /// UTF-8 string, unbounded.
    Str,
    /// Tagged enum over a closed, ordered set of variant names.
    Enum(Vec<String>),
}

impl ScalarType {
    /// Whether a value matches this type, including fixed-length and
    /// enum-discriminant-range checks.
    pub fn accepts(&self, value: &FieldValue) -> bool {
        match (self, value) {
            (ScalarType::I8, FieldValue::I8(_)) => true,
            (ScalarType::I16, FieldValue::I16(_)) => true,
            (ScalarType::I32, FieldValue::I32(_)) => true,
            (ScalarType::I64, FieldValue::I64(_)) => true,
            (ScalarType::U8, FieldValue::U8(_)) => true,
            (ScalarType::U16, FieldValue::U16(_)) => true,
            (ScalarType::U32, FieldValue::U32(_)) => true,
            (ScalarType::U64, FieldValue::U64(_)) => true,
            (ScalarType::F32, FieldValue::F32(_)) => true,
            (ScalarType::F64, FieldValue::F64(_)) => true,
            (ScalarType::Bool, FieldValue::Bool(_)) => true,
            (ScalarType::Bytes(len), FieldValue::Bytes(b)) => b.len() == *len,
            (ScalarType::Str, FieldValue::Str(_)) => true,
            (ScalarType::Enum(variants), FieldValue::Enum(tag)) => (*tag as usize) < variants.len(),
            _ => false,
        }
    }

    /// Name used in error messages and schema files.
    pub fn name(&self) -> String {
        match self {
            ScalarType::I8 => "i8".into(),
            ScalarType::I16 => "i16".into(),
            ScalarType::I32 => "i32".into(),
            ScalarType::I64 => "i64".into(),
            ScalarType::U8 => "u8".into(),
            ScalarType::U16 => "u16".into(),
            ScalarType::U32 => "u32".into(),
            ScalarType::U64 => "u64".into(),
            ScalarType::F32 => "f32".into(),
            ScalarType::F64 => "f64".into(),
            ScalarType::Bool => "bool".into(),
            ScalarType::Bytes(n) => format!("bytes[{n}]"),
            ScalarType::Str => "str".into(),
            ScalarType::Enum(variants) => format!("enum({})", variants.join("|")),
        }
    }
}

/// A value stored in one row's field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum FieldValue {
    I8(i8),
    I16(i16),
    I32(i32),
    I64(i64),
    U8(u8),
    U16(u16),
    U32(u32),
    U64(u64),
    F32(f32),
    F64(f64),
    Bool(bool),
    Bytes(Vec<u8>),
    Str(String),
    /// Discriminant index into the field's declared variant list.
    Enum(u32),
}

impl FieldValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            FieldValue::I8(_) => "i8",
            FieldValue::I16(_) => "i16",
            FieldValue::I32(_) => "i32",
            FieldValue::I64(_) => "i64",
            FieldValue::U8(_) => "u8",
            FieldValue::U16(_) => "u16",
            FieldValue::U32(_) => "u32",
            FieldValue::U64(_) => "u64",
            FieldValue::F32(_) => "f32",
            FieldValue::F64(_) => "f64",
            FieldValue::Bool(_) => "bool",
            FieldValue::Bytes(_) => "bytes",
            FieldValue::Str(_) => "str",
            FieldValue::Enum(_) => "enum",
        }
    }
}

/// Ordered indices need a total order over values of the same type.
/// Floats use `total_cmp` so `f32`/`f64` columns can still back an ordered
/// index despite `NaN`.
impl Eq for FieldValue {}

impl PartialOrd for FieldValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FieldValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (FieldValue::I8(a), FieldValue::I8(b)) => a.cmp(b),
            (FieldValue::I16(a), FieldValue::I16(b)) => a.cmp(b),
            (FieldValue::I32(a), FieldValue::I32(b)) => a.cmp(b),
            (FieldValue::I64(a), FieldValue::I64(b)) => a.cmp(b),
            (FieldValue::U8(a), FieldValue::U8(b)) => a.cmp(b),
            (FieldValue::U16(a), FieldValue::U16(b)) => a.cmp(b),
            (FieldValue::U32(a), FieldValue::U32(b)) => a.cmp(b),
            (FieldValue::U64(a), FieldValue::U64(b)) => a.cmp(b),
            (FieldValue::F32(a), FieldValue::F32(b)) => a.total_cmp(b),
            (FieldValue::F64(a), FieldValue::F64(b)) => a.total_cmp(b),
            (FieldValue::Bool(a), FieldValue::Bool(b)) => a.cmp(b),
            (FieldValue::Bytes(a), FieldValue::Bytes(b)) => a.cmp(b),
            (FieldValue::Str(a), FieldValue::Str(b)) => a.cmp(b),
            (FieldValue::Enum(a), FieldValue::Enum(b)) => a.cmp(b),
            // Values only ever get compared within one column, so distinct
            // variants never actually happen in practice; order them by
            // discriminant so the impl stays total.
            _ => discriminant_rank(self).cmp(&discriminant_rank(other)),
        }
    }
}

fn discriminant_rank(value: &FieldValue) -> u8 {
    match value {
        FieldValue::I8(_) => 0,
        FieldValue::I16(_) => 1,
        FieldValue::I32(_) => 2,
        FieldValue::I64(_) => 3,
        FieldValue::U8(_) => 4,
        FieldValue::U16(_) => 5,
        FieldValue::U32(_) => 6,
        FieldValue::U64(_) => 7,
        FieldValue::F32(_) => 8,
        FieldValue::F64(_) => 9,
        FieldValue::Bool(_) => 10,
        FieldValue::Bytes(_) => 11,
        FieldValue::Str(_) => 12,
        FieldValue::Enum(_) => 13,
    }
}
