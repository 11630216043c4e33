//! The `snap`/`delta` payloads a subscription emits (§4.3/§4.4).

use hetu_store::FieldValue;

#[derive(Debug, Clone, PartialEq)]
pub enum Delta {
    Insert { row_id: u64, fields: Vec<FieldValue> },
    Update { row_id: u64, fields: Vec<FieldValue> },
    Delete { row_id: u64 },
}

impl Delta {
    pub fn row_id(&self) -> u64 {
        match self {
            Delta::Insert { row_id, .. } => *row_id,
            Delta::Update { row_id, .. } => *row_id,
            Delta::Delete { row_id } => *row_id,
        }
    }
}
