//! Broker-level error taxonomy.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    #[error("unknown subscription {0}")]
    UnknownSubscription(u64),

    #[error("field '{field}' has no index to subscribe on")]
    FieldNotIndexed { field: String },

    /// Session identity level below the target component's declared
    /// permission class; subscriptions inherit a component's read
    /// permission (§4.5).
    #[error("session lacks permission to subscribe to '{component}'")]
    Forbidden { component: String },

    /// Malformed range request (e.g. `limit == 0`).
    #[error("invalid range subscription: {0}")]
    InvalidRange(String),

    #[error(transparent)]
    Store(#[from] hetu_store::StoreError),
}

impl BrokerError {
    /// Maps to the wire-level `rsp.err`/terminal-delta reason strings (§7).
    pub fn as_wire_reason(&self) -> &'static str {
        match self {
            BrokerError::UnknownSubscription(_) => "bad-args",
            BrokerError::FieldNotIndexed { .. } => "bad-args",
            BrokerError::Forbidden { .. } => "forbidden",
            BrokerError::InvalidRange(_) => "bad-args",
            BrokerError::Store(_) => "backend-unavailable",
        }
    }
}
