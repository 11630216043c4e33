//! Per-connection state machine: WebSocket upgrade, handshake, and the
//! frame dispatch loop (§4.4 state diagram: INIT → HANDSHAKING → READY →
//! CLOSED).
//!
//! Three tasks cooperate per connection:
//! - the **reader** (this function's main loop) decodes frames and
//!   dispatches `sub`/`unsub` inline, handing `sys` off to the call
//!   worker — satisfying "per-connection incoming messages processed
//!   strictly in order" without a long-running System call stalling
//!   subscription handling or close detection;
//! - the **call worker** drains `sys` calls one at a time, preserving
//!   §5's "CallSystem invocations from one session are committed in
//!   receive order";
//! - the **writer** owns the WebSocket sink and serializes every
//!   outgoing frame (responses, snapshots, deltas, events) from a single
//!   shared channel, so per-subscription delta order (guaranteed by each
//!   subscription's own forwarding task) survives funneling onto one
//!   connection.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::SplitStream;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Mutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, info};

use hetu_broker::Delta;
use hetu_runtime::{CallOutcome, SessionContext};
use hetu_store::{FieldValue, KeyRange, PermissionLevel};

use crate::crypto::{self, ClientHello, Decryptor, ServerHello};
use crate::error::GatewayError;
use crate::server::GatewayState;
use crate::wire::{
    self, wire_to_field, ClientMessage, DeltaOp, RpcResult, ServerMessage, SubSpec, WireRow, WireValue,
};

/// An outstanding `sys` call queued for the call worker.
struct PendingCall {
    call_id: u64,
    system: String,
    args: Vec<WireValue>,
}

struct SubEntry {
    broker_id: u64,
    forward_task: tokio::task::AbortHandle,
}

pub async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<GatewayState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    let ws = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_write, mut ws_read) = ws.split();

    let hello = match ws_read.next().await {
        Some(Ok(Message::Binary(bytes))) => wire::decode::<ClientHello>(&bytes)?,
        Some(Ok(_)) => return Err(GatewayError::Handshake("expected binary hello frame".into())),
        Some(Err(e)) => return Err(e.into()),
        None => return Ok(()),
    };
    let (server_hello, crypto): (ServerHello, _) = crypto::respond_to_hello(&hello)?;
    ws_write
        .send(Message::Binary(wire::encode(&server_hello)?))
        .await?;
    let (mut encryptor, mut decryptor) = crypto.split();

    let session_id = state.next_session_id();
    info!(%peer, session_id, "session ready");
    let session = Arc::new(Mutex::new(SessionContext::new(session_id)));
    let subs: Arc<Mutex<HashMap<u64, SubEntry>>> = Arc::new(Mutex::new(HashMap::new()));

    let (outgoing_tx, mut outgoing_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let (call_tx, mut call_rx) = mpsc::unbounded_channel::<PendingCall>();
    let call_shutdown = Arc::new(Notify::new());

    let writer = tokio::spawn(async move {
        while let Some(msg) = outgoing_rx.recv().await {
            let bytes = match wire::encode(&msg) {
                Ok(b) => b,
                Err(e) => {
                    debug!(error = %e, "failed to encode outgoing message");
                    continue;
                }
            };
            let sealed = match encryptor.seal(&bytes) {
                Ok(s) => s,
                Err(e) => {
                    debug!(error = %e, "failed to seal outgoing frame");
                    continue;
                }
            };
            if ws_write.send(Message::Binary(sealed)).await.is_err() {
                break;
            }
        }
        let _ = ws_write.close().await;
    });

    let call_worker = {
        let state = Arc::clone(&state);
        let session = Arc::clone(&session);
        let outgoing_tx = outgoing_tx.clone();
        let call_shutdown = Arc::clone(&call_shutdown);
        tokio::spawn(async move {
            while let Some(pending) = call_rx.recv().await {
                let rsp = run_call(&state, &session, pending, &call_shutdown).await;
                if let Some(rsp) = rsp {
                    if outgoing_tx.send(rsp).is_err() {
                        break;
                    }
                }
            }
        })
    };

    let result = read_loop(
        &mut ws_read,
        &mut decryptor,
        &state,
        &session,
        &subs,
        &outgoing_tx,
        &call_tx,
        &mut shutdown,
    )
    .await;

    call_shutdown.notify_waiters();
    drop(call_tx);
    drop(outgoing_tx);
    for (_, entry) in subs.lock().await.drain() {
        state.broker.unsubscribe(entry.broker_id);
        entry.forward_task.abort();
    }
    let _ = call_worker.await;
    let _ = writer.await;

    result
}

#[allow(clippy::too_many_arguments)]
async fn read_loop(
    ws_read: &mut (impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin),
    decryptor: &mut Decryptor,
    state: &Arc<GatewayState>,
    session: &Arc<Mutex<SessionContext>>,
    subs: &Arc<Mutex<HashMap<u64, SubEntry>>>,
    outgoing_tx: &mpsc::UnboundedSender<ServerMessage>,
    call_tx: &mpsc::UnboundedSender<PendingCall>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), GatewayError> {
    loop {
        tokio::select! {
            _ = shutdown.changed() => return Ok(()),
            frame = ws_read.next() => {
                let frame = match frame {
                    Some(f) => f?,
                    None => return Ok(()),
                };
                let bytes = match frame {
                    Message::Binary(b) => b,
                    Message::Close(_) => return Ok(()),
                    Message::Ping(_) | Message::Pong(_) => continue,
                    _ => return Err(GatewayError::Codec("expected binary frame".into())),
                };
                let plaintext = decryptor.open(&bytes)?;
                let msg: ClientMessage = wire::decode(&plaintext)?;

                match msg {
                    ClientMessage::Sys { call_id, system, args } => {
                        let _ = call_tx.send(PendingCall { call_id, system, args });
                    }
                    ClientMessage::Sub { sub_id, spec } => {
                        handle_sub(state, session, subs, outgoing_tx, sub_id, spec).await;
                    }
                    ClientMessage::Unsub { sub_id } => {
                        if let Some(entry) = subs.lock().await.remove(&sub_id) {
                            state.broker.unsubscribe(entry.broker_id);
                            entry.forward_task.abort();
                        }
                    }
                    ClientMessage::Close { reason } => {
                        debug!(reason, "client requested close");
                        return Ok(());
                    }
                }
            }
        }
    }
}

/// Runs one `sys` call to completion, racing it against the connection's
/// shutdown signal so an abrupt disconnect cancels the in-flight System
/// rather than letting it run to a response nobody reads (§5
/// "Cancellation", §8 scenario 5).
async fn run_call(
    state: &Arc<GatewayState>,
    session: &Arc<Mutex<SessionContext>>,
    pending: PendingCall,
    call_shutdown: &Arc<Notify>,
) -> Option<ServerMessage> {
    let call_id = pending.call_id;
    let def = match state.executor.registry().get(&pending.system) {
        Some(def) => def,
        None => {
            return Some(ServerMessage::Rsp {
                call_id,
                result: RpcResult::Err {
                    code: "unknown-system".into(),
                    message: format!("no system named '{}'", pending.system),
                },
            })
        }
    };

    let mut args = Vec::with_capacity(pending.args.len());
    for (value, param) in pending.args.iter().zip(def.params.iter()) {
        match wire_to_field(value, &param.ty) {
            Ok(field) => args.push(field),
            Err(e) => {
                return Some(ServerMessage::Rsp {
                    call_id,
                    result: RpcResult::Err {
                        code: e.as_wire_reason().into(),
                        message: e.to_string(),
                    },
                })
            }
        }
    }
    if args.len() != def.params.len() {
        return Some(ServerMessage::Rsp {
            call_id,
            result: RpcResult::Err {
                code: "bad-args".into(),
                message: format!(
                    "expected {} argument(s), got {}",
                    def.params.len(),
                    args.len()
                ),
            },
        });
    }

    let current_session = session.lock().await.clone();
    let handle = state.executor.call(pending.system.clone(), args, current_session);
    let canceller = handle.canceller();

    let outcome: CallOutcome = tokio::select! {
        _ = call_shutdown.notified() => {
            canceller.abort();
            return None;
        }
        outcome = handle.wait() => outcome,
    };

    match outcome {
        Ok((values, updated_session)) => {
            *session.lock().await = updated_session;
            Some(ServerMessage::Rsp {
                call_id,
                result: RpcResult::Ok(values.iter().map(wire::field_to_wire).collect()),
            })
        }
        Err(e) => Some(ServerMessage::Rsp {
            call_id,
            result: RpcResult::Err {
                code: e.as_wire_reason().into(),
                message: e.to_string(),
            },
        }),
    }
}

async fn handle_sub(
    state: &Arc<GatewayState>,
    session: &Arc<Mutex<SessionContext>>,
    subs: &Arc<Mutex<HashMap<u64, SubEntry>>>,
    outgoing_tx: &mpsc::UnboundedSender<ServerMessage>,
    sub_id: u64,
    spec: SubSpec,
) {
    let level = session.lock().await.level;
    let result = match spec {
        SubSpec::Row { component, field, value } => {
            resolve_row_sub(state, level, &component, &field, value)
        }
        SubSpec::Range {
            component,
            index,
            left,
            right,
            limit,
            direction,
        } => resolve_range_sub(state, level, &component, &index, left, right, limit, direction),
    };

    let (broker_id, snap, mut rx) = match result {
        Ok(tuple) => tuple,
        Err(e) => {
            let _ = outgoing_tx.send(ServerMessage::SubError {
                sub_id,
                reason: e.as_wire_reason().to_string(),
            });
            return;
        }
    };

    let _ = outgoing_tx.send(ServerMessage::Snap { sub_id, rows: snap });

    let forward_tx = outgoing_tx.clone();
    let forward_task = tokio::spawn(async move {
        while let Some(delta) = rx.recv().await {
            let msg = delta_to_message(sub_id, delta);
            if forward_tx.send(msg).is_err() {
                break;
            }
        }
    });
    subs.lock().await.insert(
        sub_id,
        SubEntry {
            broker_id,
            forward_task: forward_task.abort_handle(),
        },
    );
}

type SubResolution = Result<(u64, Vec<WireRow>, mpsc::Receiver<Delta>), GatewayError>;

fn resolve_row_sub(
    state: &Arc<GatewayState>,
    level: PermissionLevel,
    component: &str,
    field: &str,
    value: WireValue,
) -> SubResolution {
    let table = state.db.component(component)?;
    let ty = table.field(field)?.ty.clone();
    let value = wire_to_field(&value, &ty)?;
    let (id, snapshot, rx) = state.broker.subscribe_row(level, component, field, value)?;
    let rows = snapshot
        .row
        .into_iter()
        .map(|(row_id, version, fields)| to_wire_row(row_id, version, fields))
        .collect();
    Ok((id, rows, rx))
}

#[allow(clippy::too_many_arguments)]
fn resolve_range_sub(
    state: &Arc<GatewayState>,
    level: PermissionLevel,
    component: &str,
    index: &str,
    left: Option<WireValue>,
    right: Option<WireValue>,
    limit: u32,
    direction: crate::wire::WireDirection,
) -> SubResolution {
    let table = state.db.component(component)?;
    let ty = table.field(index)?.ty.clone();
    let left = left.map(|v| wire_to_field(&v, &ty)).transpose()?;
    let right = right.map(|v| wire_to_field(&v, &ty)).transpose()?;
    let range = KeyRange { left, right };
    let (id, snapshot, rx) = state.broker.subscribe_range(
        level,
        component,
        index,
        range,
        limit as usize,
        direction.into(),
    )?;
    let rows = snapshot
        .rows
        .into_iter()
        .map(|(row_id, version, fields)| to_wire_row(row_id, version, fields))
        .collect();
    Ok((id, rows, rx))
}

fn to_wire_row(row_id: u64, version: u64, fields: Vec<FieldValue>) -> WireRow {
    WireRow {
        row_id,
        version,
        fields: fields.iter().map(wire::field_to_wire).collect(),
    }
}

fn delta_to_message(sub_id: u64, delta: Delta) -> ServerMessage {
    match delta {
        Delta::Insert { row_id, fields } => ServerMessage::Delta {
            sub_id,
            op: DeltaOp::Insert,
            row_id,
            fields: Some(fields.iter().map(wire::field_to_wire).collect()),
        },
        Delta::Update { row_id, fields } => ServerMessage::Delta {
            sub_id,
            op: DeltaOp::Update,
            row_id,
            fields: Some(fields.iter().map(wire::field_to_wire).collect()),
        },
        Delta::Delete { row_id } => ServerMessage::Delta {
            sub_id,
            op: DeltaOp::Delete,
            row_id,
            fields: None,
        },
    }
}
