//! On-disk schema file format.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::table::{IndexSpec, PermissionLevel, Persistency};
use crate::value::ScalarType;

/// Schema file format for persistence: one entry per registered component.
#[derive(Debug, Serialize, Deserialize)]
pub struct SchemaFile {
    pub version: u32,
    pub tables: HashMap<String, TableSchema>,
}

/// Persisted shape of one component schema.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct TableSchema {
    pub fields: Vec<FieldSchema>,
    pub indices: Vec<IndexSchema>,
    pub persistency: Persistency,
    pub permission: PermissionLevel,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct FieldSchema {
    pub name: String,
    pub ty: ScalarType,
    pub default: crate::value::FieldValue,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct IndexSchema {
    pub field: String,
    pub kind: IndexSpec,
}

impl Serialize for IndexSpec {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let s = match self {
            IndexSpec::Ordered => "ordered",
            IndexSpec::Unique => "unique",
        };
        serializer.serialize_str(s)
    }
}

impl<'de> Deserialize<'de> for IndexSpec {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        match s.as_str() {
            "ordered" => Ok(IndexSpec::Ordered),
            "unique" => Ok(IndexSpec::Unique),
            other => Err(serde::de::Error::custom(format!("unknown index kind '{other}'"))),
        }
    }
}
