//! Persistency and permission flags carried by a component schema.

use serde::{Deserialize, Serialize};

/// Whether a component's rows survive a server restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Persistency {
    /// Cleared at startup; never written to disk.
    Transient,
    /// Flushed by the persistence manager and reloaded at startup.
    Persistent,
}

/// Minimum session identity level required to mutate a component's rows.
/// Declaration order is the total order (`Guest < User < Admin < Owner`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PermissionLevel {
    Guest,
    User,
    Admin,
    Owner,
}
