//! Subscription identity: what a subscription watches (§3 "Subscription").

use hetu_store::{Direction, FieldValue, KeyRange};

/// The two subscription shapes §3/§4.3 define. Carried around for
/// diagnostics and for the gateway to echo back in terminal deltas; the
/// live window/point state lives only inside the task each subscription
/// spawns (see `broker.rs`), never here.
#[derive(Debug, Clone)]
pub enum SubscriptionKind {
    /// `(component, field, equality value)` — at most one matching row.
    Row {
        component: String,
        field: String,
        value: FieldValue,
    },
    /// `(component, index, left, right, limit, direction)` — an ordered
    /// window of row ids.
    Range {
        component: String,
        index: String,
        range: KeyRange,
        limit: usize,
        direction: Direction,
    },
}

impl SubscriptionKind {
    pub fn component(&self) -> &str {
        match self {
            SubscriptionKind::Row { component, .. } => component,
            SubscriptionKind::Range { component, .. } => component,
        }
    }
}
