//! Executor error taxonomy, mirrored onto the wire-visible reason strings.

use hetu_store::StoreError;
use thiserror::Error;

/// Errors produced while resolving or running a System call.
#[derive(Debug, Clone, Error)]
pub enum ExecError {
    /// No System registered under this name.
    #[error("unknown system '{0}'")]
    UnknownSystem(String),

    /// Arity or scalar-type mismatch against the System's declared params.
    #[error("bad arguments for system '{system}': {reason}")]
    BadArgs { system: String, reason: String },

    /// Caller's session level is below the System's declared permission.
    #[error("session lacks permission to call '{system}'")]
    Forbidden { system: String },

    /// The System body explicitly aborted (not a store conflict).
    #[error("system '{system}' aborted: {reason}")]
    Aborted { system: String, reason: String },

    /// The System body panicked; its transaction was rolled back.
    #[error("system '{system}' panicked: {message}")]
    Panic { system: String, message: String },

    /// A store operation failed for a reason other than an optimistic
    /// conflict (conflicts are retried internally and never escape as
    /// this variant — see [`ExecError::ConflictExhausted`]).
    #[error(transparent)]
    Store(#[from] StoreError),

    /// `commit()` returned `Conflict` on every attempt up to the retry
    /// limit.
    #[error("system '{system}' conflict-exhausted after {attempts} attempts")]
    ConflictExhausted { system: String, attempts: u32 },

    /// The call's deadline elapsed before it completed.
    #[error("system '{system}' timed out")]
    Timeout { system: String },

    /// The in-flight call was cancelled because its owning connection
    /// closed.
    #[error("system '{system}' cancelled")]
    Cancelled { system: String },
}

impl ExecError {
    /// Maps to the wire-level `rsp.err` reason strings.
    pub fn as_wire_reason(&self) -> &'static str {
        match self {
            ExecError::UnknownSystem(_) => "unknown-system",
            ExecError::BadArgs { .. } => "bad-args",
            ExecError::Forbidden { .. } => "forbidden",
            ExecError::Timeout { .. } => "timeout",
            ExecError::ConflictExhausted { .. } => "conflict-exhausted",
            ExecError::Aborted { .. } => "constraint-violated",
            ExecError::Cancelled { .. } => "internal",
            ExecError::Panic { .. } => "internal",
            ExecError::Store(StoreError::ConstraintViolated { .. }) => "constraint-violated",
            ExecError::Store(StoreError::Forbidden { .. }) => "forbidden",
            ExecError::Store(_) => "backend-unavailable",
        }
    }
}
