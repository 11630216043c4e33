use crate::value::FieldValue;

/// A single row-level mutation staged against one table, not yet applied.
#[derive(Debug, Clone)]
pub enum Change {
    Insert {
        row_id: u64,
        fields: Vec<FieldValue>,
    },
    Update {
        row_id: u64,
        expected_version: u64,
        fields: Vec<FieldValue>,
    },
    Delete {
        row_id: u64,
        expected_version: u64,
    },
}

impl Change {
    pub fn row_id(&self) -> u64 {
        match self {
            Change::Insert { row_id, .. } => *row_id,
            Change::Update { row_id, .. } => *row_id,
            Change::Delete { row_id, .. } => *row_id,
        }
    }
}

/// The operation a committed [`ChangeEvent`] represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeOp {
    Insert,
    Update,
    Delete,
}

/// A committed mutation fanned out to the subscription broker. Events from
/// one transaction are emitted contiguously, in the order the transaction's
/// own changes apply (row_id order); transactions are ordered by commit.
#[derive(Debug, Clone)]
pub struct ChangeEvent {
    pub component: String,
    pub row_id: u64,
    pub op: ChangeOp,
    pub new_version: u64,
    /// Names of fields that changed: all fields for insert, the diff
    /// against the pre-image for update, the table's field names for
    /// delete (so a subscriber can still report what the row used to
    /// hold).
    pub changed_fields: Vec<String>,
    /// Full post-image field values (empty for delete).
    pub fields: Vec<FieldValue>,
}
