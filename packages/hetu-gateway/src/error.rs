//! Gateway-level error taxonomy (handshake, wire decode, dispatch).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("malformed frame: {0}")]
    Codec(String),

    #[error("argument of type '{got}' does not match declared type '{expected}'")]
    TypeMismatch { expected: String, got: &'static str },

    #[error(transparent)]
    Store(#[from] hetu_store::StoreError),

    #[error(transparent)]
    Broker(#[from] hetu_broker::BrokerError),
}

impl GatewayError {
    /// Maps to the wire-level `rsp.err`/`SubError` reason strings (§7).
    pub fn as_wire_reason(&self) -> &'static str {
        match self {
            GatewayError::Io(_) | GatewayError::WebSocket(_) => "backend-unavailable",
            GatewayError::Handshake(_) | GatewayError::Codec(_) => "internal",
            GatewayError::TypeMismatch { .. } => "bad-args",
            GatewayError::Store(_) => "backend-unavailable",
            GatewayError::Broker(e) => e.as_wire_reason(),
        }
    }
}
