//! Gateway accept loop: binds one TCP listener and spawns a connection
//! task per accepted stream (§4.4's "per-connection incoming messages
//! processed strictly in order; different connections run in parallel").

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::{info, warn};

use hetu_broker::Broker;
use hetu_runtime::Executor;
use hetu_store::Database;

use crate::admission::ConnectionAdmission;
use crate::connection;

/// Shared state every connection task reads from. Cheap to clone (the
/// fields are themselves `Arc`/cloneable handles).
pub struct GatewayState {
    pub db: Arc<Database>,
    pub executor: Executor,
    pub broker: Broker,
    next_session_id: AtomicU64,
}

impl GatewayState {
    pub fn new(db: Arc<Database>, executor: Executor, broker: Broker) -> Arc<Self> {
        Arc::new(Self {
            db,
            executor,
            broker,
            next_session_id: AtomicU64::new(1),
        })
    }

    pub fn next_session_id(&self) -> u64 {
        self.next_session_id.fetch_add(1, Ordering::SeqCst)
    }
}

/// WebSocket gateway: owns the listening socket and an admission
/// throttle bounding concurrent connections.
pub struct Gateway {
    addr: SocketAddr,
    state: Arc<GatewayState>,
    admission: ConnectionAdmission,
}

impl Gateway {
    pub fn new(addr: SocketAddr, state: Arc<GatewayState>, max_connections: usize) -> Self {
        Self {
            addr,
            state,
            admission: ConnectionAdmission::new(max_connections),
        }
    }

    /// Runs the accept loop until `shutdown` is set, at which point no new
    /// connections are accepted; already-running connections keep
    /// draining on their own (each watches the same signal internally and
    /// tears itself down).
    pub async fn serve(self, mut shutdown: tokio::sync::watch::Receiver<bool>) -> Result<(), std::io::Error> {
        let listener = TcpListener::bind(self.addr).await?;
        info!(addr = %self.addr, "gateway listening");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("gateway shutting down, no longer accepting connections");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    let (stream, peer) = accepted?;
                    let permit = self.admission.acquire().await;
                    let state = Arc::clone(&self.state);
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move {
                        if let Err(err) = connection::handle_connection(stream, peer, state, shutdown).await {
                            warn!(%peer, error = %err, "connection closed with error");
                        }
                        drop(permit);
                    });
                }
            }
        }
    }
}
