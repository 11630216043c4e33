//! Connection-level admission: the "throttle" half of §2's Admission /
//! permissions responsibility (identity mapping and System-call gating
//! are handled per-call, inside `hetu-runtime`'s executor and
//! `hetu-broker`'s permission checks).

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Bounds how many WebSocket connections the gateway serves concurrently.
/// A connection holds its permit for its whole lifetime; once the limit
/// is reached, `acquire` suspends the accept loop rather than spawning an
/// unbounded number of connection tasks.
#[derive(Clone)]
pub struct ConnectionAdmission {
    semaphore: Arc<Semaphore>,
}

impl ConnectionAdmission {
    pub fn new(max_connections: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_connections)),
        }
    }

    /// Waits for a free connection slot, returning a permit the caller
    /// holds for the connection's duration. Dropping the permit (when the
    /// connection ends) frees the slot for the next admitted connection.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        self.semaphore
            .clone()
            .acquire_owned()
            .await
            .expect("admission semaphore never closed")
    }
}
