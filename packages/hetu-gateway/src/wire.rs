//! Compact tagged binary wire encoding and message shapes (§6).
//!
//! `bincode` over these enums is the "compact tagged binary encoding
//! (lists, maps, ints, floats, bytes, strings, bool, null)" §6 calls for —
//! the same codec already used for persisted schema/data (see DESIGN.md)
//! rather than adding a second one.

use serde::{Deserialize, Serialize};

use hetu_store::{Direction, FieldValue, ScalarType};

use crate::error::GatewayError;

/// The client/server-agnostic value shape the wire format carries.
/// `FieldValue`'s many fixed-width numeric variants collapse onto the
/// generic `I64`/`U64`/`F64` wire types; the component schema (known to
/// both ends, since client code generation is out of scope per spec.md
/// §1) disambiguates the exact width on decode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WireValue {
    Null,
    Bool(bool),
    I64(i64),
    U64(u64),
    F64(f64),
    Bytes(Vec<u8>),
    Str(String),
    List(Vec<WireValue>),
    Map(Vec<(WireValue, WireValue)>),
}

impl WireValue {
    pub fn type_name(&self) -> &'static str {
        match self {
            WireValue::Null => "null",
            WireValue::Bool(_) => "bool",
            WireValue::I64(_) => "i64",
            WireValue::U64(_) => "u64",
            WireValue::F64(_) => "f64",
            WireValue::Bytes(_) => "bytes",
            WireValue::Str(_) => "str",
            WireValue::List(_) => "list",
            WireValue::Map(_) => "map",
        }
    }
}

/// Converts a wire value into a typed [`FieldValue`] against a System
/// parameter's or a Component field's declared [`ScalarType`] — "argument
/// parsing is table-driven, not reflection-driven" (§9).
pub fn wire_to_field(value: &WireValue, ty: &ScalarType) -> Result<FieldValue, GatewayError> {
    let mismatch = || GatewayError::TypeMismatch {
        expected: ty.name(),
        got: value.type_name(),
    };
    match ty {
        ScalarType::I8 => i64_of(value).and_then(|v| i8::try_from(v).ok()).map(FieldValue::I8).ok_or_else(mismatch),
        ScalarType::I16 => i64_of(value).and_then(|v| i16::try_from(v).ok()).map(FieldValue::I16).ok_or_else(mismatch),
        ScalarType::I32 => i64_of(value).and_then(|v| i32::try_from(v).ok()).map(FieldValue::I32).ok_or_else(mismatch),
        ScalarType::I64 => i64_of(value).map(FieldValue::I64).ok_or_else(mismatch),
        ScalarType::U8 => u64_of(value).and_then(|v| u8::try_from(v).ok()).map(FieldValue::U8).ok_or_else(mismatch),
        ScalarType::U16 => u64_of(value).and_then(|v| u16::try_from(v).ok()).map(FieldValue::U16).ok_or_else(mismatch),
        ScalarType::U32 => u64_of(value).and_then(|v| u32::try_from(v).ok()).map(FieldValue::U32).ok_or_else(mismatch),
        ScalarType::U64 => u64_of(value).map(FieldValue::U64).ok_or_else(mismatch),
        ScalarType::F32 => f64_of(value).map(|v| FieldValue::F32(v as f32)).ok_or_else(mismatch),
        ScalarType::F64 => f64_of(value).map(FieldValue::F64).ok_or_else(mismatch),
        ScalarType::Bool => match value {
            WireValue::Bool(b) => Ok(FieldValue::Bool(*b)),
            _ => Err(mismatch()),
        },
        ScalarType::Bytes(len) => match value {
            WireValue::Bytes(b) if b.len() == *len => Ok(FieldValue::Bytes(b.clone())),
            _ => Err(mismatch()),
        },
        ScalarType::Str => match value {
            WireValue::Str(s) => Ok(FieldValue::Str(s.clone())),
            _ => Err(mismatch()),
        },
        ScalarType::Enum(variants) => match value {
            WireValue::U64(tag) if (*tag as usize) < variants.len() => Ok(FieldValue::Enum(*tag as u32)),
            WireValue::Str(name) => variants
                .iter()
                .position(|v| v == name)
                .map(|idx| FieldValue::Enum(idx as u32))
                .ok_or_else(mismatch),
            _ => Err(mismatch()),
        },
    }
}

fn i64_of(value: &WireValue) -> Option<i64> {
    match value {
        WireValue::I64(v) => Some(*v),
        WireValue::U64(v) => i64::try_from(*v).ok(),
        _ => None,
    }
}

fn u64_of(value: &WireValue) -> Option<u64> {
    match value {
        WireValue::U64(v) => Some(*v),
        WireValue::I64(v) if *v >= 0 => Some(*v as u64),
        _ => None,
    }
}

fn f64_of(value: &WireValue) -> Option<f64> {
    match value {
        WireValue::F64(v) => Some(*v),
        WireValue::I64(v) => Some(*v as f64),
        WireValue::U64(v) => Some(*v as f64),
        _ => None,
    }
}

/// The reverse direction never fails: a concrete `FieldValue` always has a
/// wire representation.
pub fn field_to_wire(value: &FieldValue) -> WireValue {
    match value {
        FieldValue::I8(v) => WireValue::I64(*v as i64),
        FieldValue::I16(v) => WireValue::I64(*v as i64),
        FieldValue::I32(v) => WireValue::I64(*v as i64),
        FieldValue::I64(v) => WireValue::I64(*v),
        FieldValue::U8(v) => WireValue::U64(*v as u64),
        FieldValue::U16(v) => WireValue::U64(*v as u64),
        FieldValue::U32(v) => WireValue::U64(*v as u64),
        FieldValue::U64(v) => WireValue::U64(*v),
        FieldValue::F32(v) => WireValue::F64(*v as f64),
        FieldValue::F64(v) => WireValue::F64(*v),
        FieldValue::Bool(v) => WireValue::Bool(*v),
        FieldValue::Bytes(v) => WireValue::Bytes(v.clone()),
        FieldValue::Str(v) => WireValue::Str(v.clone()),
        FieldValue::Enum(tag) => WireValue::U64(*tag as u64),
    }
}

/// Direction as carried on the wire (§3 "Range subscription").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum WireDirection {
    Ascending,
    Descending,
}

impl From<WireDirection> for Direction {
    fn from(value: WireDirection) -> Self {
        match value {
            WireDirection::Ascending => Direction::Ascending,
            WireDirection::Descending => Direction::Descending,
        }
    }
}

/// What a `sub` frame registers (§3/§4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SubSpec {
    Row {
        component: String,
        field: String,
        value: WireValue,
    },
    Range {
        component: String,
        index: String,
        left: Option<WireValue>,
        right: Option<WireValue>,
        limit: u32,
        direction: WireDirection,
    },
}

/// Client → server messages, one per `sys`/`sub`/`unsub`/`close` tag
/// (§4.4 table).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ClientMessage {
    Sys {
        call_id: u64,
        system: String,
        args: Vec<WireValue>,
    },
    Sub {
        sub_id: u64,
        spec: SubSpec,
    },
    Unsub {
        sub_id: u64,
    },
    Close {
        reason: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum RpcResult {
    Ok(Vec<WireValue>),
    Err { code: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeltaOp {
    Insert,
    Update,
    Delete,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireRow {
    pub row_id: u64,
    pub version: u64,
    pub fields: Vec<WireValue>,
}

/// Server → client messages, one per `rsp`/`snap`/`delta`/`evt`/`close`
/// tag (§4.4 table). `SubError` extends the table: a subscription that
/// can never be satisfied (bad field, forbidden) or that becomes
/// unviable later (§7 "terminal delta bearing an error reason") is
/// reported this way instead of a bare `delta`, since §4.4's `delta`
/// shape has no error slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ServerMessage {
    Rsp {
        call_id: u64,
        result: RpcResult,
    },
    Snap {
        sub_id: u64,
        rows: Vec<WireRow>,
    },
    Delta {
        sub_id: u64,
        op: DeltaOp,
        row_id: u64,
        fields: Option<Vec<WireValue>>,
    },
    SubError {
        sub_id: u64,
        reason: String,
    },
    Evt {
        name: String,
        payload: Vec<WireValue>,
    },
    Close {
        reason: String,
    },
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, GatewayError> {
    bincode::serialize(value).map_err(|e| GatewayError::Codec(e.to_string()))
}

pub fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, GatewayError> {
    bincode::deserialize(bytes).map_err(|e| GatewayError::Codec(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_to_field_rejects_narrowing_overflow() {
        let err = wire_to_field(&WireValue::U64(1000), &ScalarType::U8).unwrap_err();
        assert!(matches!(err, GatewayError::TypeMismatch { .. }));
    }

    #[test]
    fn wire_to_field_round_trips_through_field_to_wire() {
        let original = FieldValue::F32(3.5);
        let wire = field_to_wire(&original);
        let back = wire_to_field(&wire, &ScalarType::F32).unwrap();
        assert_eq!(back, original);
    }

    #[test]
    fn enum_accepts_either_tag_or_name() {
        let ty = ScalarType::Enum(vec!["idle".into(), "moving".into()]);
        assert_eq!(wire_to_field(&WireValue::U64(1), &ty).unwrap(), FieldValue::Enum(1));
        assert_eq!(
            wire_to_field(&WireValue::Str("moving".into()), &ty).unwrap(),
            FieldValue::Enum(1)
        );
    }
}
