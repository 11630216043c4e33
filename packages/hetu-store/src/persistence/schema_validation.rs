//! Schema diffing for the `migrate` CLI command.
//!
//! Schema changes are explicitly out of scope for automatic migration; this
//! module only detects and reports divergence between a persisted schema
//! file and the component set an application registers at startup.

use std::collections::{HashMap, HashSet};

use super::schema::{SchemaFile, TableSchema};

/// One detected divergence between a persisted schema and the in-process
/// registry it's compared against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SchemaDiff {
    /// Registered in-process but absent from the persisted schema file
    /// (a brand new component; nothing to migrate).
    MissingOnDisk { table: String },
    /// Present in the persisted schema file but not registered in-process
    /// (a component the application stopped declaring).
    MissingInRegistry { table: String },
    /// Present in both, but the field name set differs.
    FieldSetChanged {
        table: String,
        added: Vec<String>,
        removed: Vec<String>,
    },
}

/// Compares a persisted schema against the schema an application registers
/// at startup. An empty result means `migrate` has nothing to report.
pub fn diff_schema(
    persisted: &SchemaFile,
    registered: &HashMap<String, TableSchema>,
) -> Vec<SchemaDiff> {
    let mut diffs = Vec::new();

    for (name, live) in registered {
        match persisted.tables.get(name) {
            None => diffs.push(SchemaDiff::MissingOnDisk { table: name.clone() }),
            Some(disk) => {
                let disk_fields: HashSet<&str> =
                    disk.fields.iter().map(|f| f.name.as_str()).collect();
                let live_fields: HashSet<&str> =
                    live.fields.iter().map(|f| f.name.as_str()).collect();
                let added: Vec<String> = live_fields
                    .difference(&disk_fields)
                    .map(|s| s.to_string())
                    .collect();
                let removed: Vec<String> = disk_fields
                    .difference(&live_fields)
                    .map(|s| s.to_string())
                    .collect();
                if !added.is_empty() || !removed.is_empty() {
                    diffs.push(SchemaDiff::FieldSetChanged {
                        table: name.clone(),
                        added,
                        removed,
                    });
                }
            }
        }
    }

    for name in persisted.tables.keys() {
        if !registered.contains_key(name) {
            diffs.push(SchemaDiff::MissingInRegistry { table: name.clone() });
        }
    }

    diffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::schema::{FieldSchema, IndexSchema};
    use crate::table::{IndexSpec, PermissionLevel, Persistency};
    use crate::value::{FieldValue, ScalarType};

    fn table_schema(fields: &[&str]) -> TableSchema {
        TableSchema {
            fields: fields
                .iter()
                .map(|name| FieldSchema {
                    name: name.to_string(),
                    ty: ScalarType::I64,
                    default: FieldValue::I64(0),
                })
                .collect(),
            indices: Vec::<IndexSchema>::new(),
            persistency: Persistency::Persistent,
            permission: PermissionLevel::Guest,
        }
    }

    #[test]
    fn identical_schemas_report_no_diffs() {
        let persisted = SchemaFile {
            version: 1,
            tables: HashMap::from([("Position".to_string(), table_schema(&["x", "y"]))]),
        };
        let registered = HashMap::from([("Position".to_string(), table_schema(&["x", "y"]))]);
        assert!(diff_schema(&persisted, &registered).is_empty());
    }

    #[test]
    fn added_and_removed_fields_are_reported() {
        let persisted = SchemaFile {
            version: 1,
            tables: HashMap::from([("Position".to_string(), table_schema(&["x", "y"]))]),
        };
        let registered = HashMap::from([("Position".to_string(), table_schema(&["x", "z"]))]);
        let diffs = diff_schema(&persisted, &registered);
        assert_eq!(
            diffs,
            vec![SchemaDiff::FieldSetChanged {
                table: "Position".to_string(),
                added: vec!["z".to_string()],
                removed: vec!["y".to_string()],
            }]
        );
    }

    #[test]
    fn unregistered_persisted_table_is_reported() {
        let persisted = SchemaFile {
            version: 1,
            tables: HashMap::from([("Stale".to_string(), table_schema(&["x"]))]),
        };
        let registered = HashMap::new();
        assert_eq!(
            diff_schema(&persisted, &registered),
            vec![SchemaDiff::MissingInRegistry {
                table: "Stale".to_string()
            }]
        );
    }
}
