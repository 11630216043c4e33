//! Registry of live subscriptions plus the per-component change-event bus
//! that feeds them (§4.3).
//!
//! One `mpsc` push channel per subscription, a `tokio::sync::broadcast`
//! bus per component fed directly by `hetu-runtime`'s commit events, and
//! one task per subscription translating the bus into deltas (see
//! DESIGN.md for the registry shape this adapts).

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc};
use tokio::task::AbortHandle;
use tracing::warn;

use hetu_store::{ChangeEvent, ChangeOp, Database, Direction, FieldValue, KeyRange, PermissionLevel, Table};

use crate::delta::Delta;
use crate::error::BrokerError;

/// Bus capacity before a lagging subscriber is forced to resync. Generous
/// enough that an ordinary subscriber never lags under normal load; a
/// burst beyond this just costs that one subscription a resync, not a
/// dropped connection.
const BUS_CAPACITY: usize = 4096;
/// Per-subscription outgoing channel depth; backpressure here slows the
/// publishing commit path, not just the slow subscriber, since `publish`
/// only returns after every task has had a chance to recv — in practice
/// `send` on a full channel just awaits, which is fine since publishing
/// itself is not on the commit's critical section (see `hetu-runtime`'s
/// `with_event_sink`, which forwards off the commit path via an unbounded
/// channel).
const DELTA_CHANNEL_CAPACITY: usize = 256;

/// Initial result of a row subscription: the single matching row, if any.
#[derive(Debug, Clone, Default)]
pub struct RowSnapshot {
    pub row: Option<(u64, u64, Vec<FieldValue>)>,
}

/// Initial result of a range subscription: the ordered window.
#[derive(Debug, Clone, Default)]
pub struct RangeSnapshot {
    pub rows: Vec<(u64, u64, Vec<FieldValue>)>,
}

struct LiveSubscription {
    abort: AbortHandle,
}

struct Inner {
    db: Arc<Database>,
    buses: DashMap<String, broadcast::Sender<ChangeEvent>>,
    subscriptions: DashMap<u64, LiveSubscription>,
    next_id: AtomicU64,
}

/// Owns every live subscription and the change buses that feed them.
/// Cheap to clone (an `Arc` around its state) so the gateway can hand one
/// copy to each connection task.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<Inner>,
}

impl Broker {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            inner: Arc::new(Inner {
                db,
                buses: DashMap::new(),
                subscriptions: DashMap::new(),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    fn bus(&self, component: &str) -> broadcast::Sender<ChangeEvent> {
        self.inner
            .buses
            .entry(component.to_string())
            .or_insert_with(|| broadcast::channel(BUS_CAPACITY).0)
            .clone()
    }

    /// Fans out one commit's change events, in commit order, onto each
    /// touched component's bus. Meant to be wired as `hetu-runtime`'s
    /// `Executor::with_event_sink` (via a small adapter task that drains
    /// the executor's `mpsc` and calls this). A component with no live
    /// subscribers simply drops the send — `broadcast::Sender::send`
    /// returning `Err` just means "no receivers", not a failure.
    pub fn publish(&self, events: Vec<ChangeEvent>) {
        for event in events {
            let _ = self.bus(&event.component).send(event);
        }
    }

    /// Registers a row subscription (§3/§4.3). Takes an initial snapshot
    /// and spawns the task that keeps it live until `unsubscribe` or the
    /// returned receiver is dropped.
    pub fn subscribe_row(
        &self,
        level: PermissionLevel,
        component: &str,
        field: &str,
        value: FieldValue,
    ) -> Result<(u64, RowSnapshot, mpsc::Receiver<Delta>), BrokerError> {
        let table = self.inner.db.component(component)?;
        if level < table.permission {
            return Err(BrokerError::Forbidden {
                component: component.to_string(),
            });
        }
        if !table.indices.contains_key(field) {
            return Err(BrokerError::FieldNotIndexed {
                field: field.to_string(),
            });
        }

        let current = table.equals_lookup(field, &value)?.into_iter().next();
        let snapshot = RowSnapshot {
            row: current.and_then(|id| table.select(id).map(|(v, f)| (id, v, f))),
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        let bus_rx = self.bus(component).subscribe();

        let handle = tokio::spawn(row_subscription_task(
            id,
            bus_rx,
            tx,
            Arc::clone(&table),
            field.to_string(),
            value,
            current,
        ));
        self.inner.subscriptions.insert(
            id,
            LiveSubscription {
                abort: handle.abort_handle(),
            },
        );

        Ok((id, snapshot, rx))
    }

    /// Registers a range subscription (§3/§4.3).
    #[allow(clippy::too_many_arguments)]
    pub fn subscribe_range(
        &self,
        level: PermissionLevel,
        component: &str,
        index: &str,
        range: KeyRange,
        limit: usize,
        direction: Direction,
    ) -> Result<(u64, RangeSnapshot, mpsc::Receiver<Delta>), BrokerError> {
        let table = self.inner.db.component(component)?;
        if level < table.permission {
            return Err(BrokerError::Forbidden {
                component: component.to_string(),
            });
        }
        if !table.indices.contains_key(index) {
            return Err(BrokerError::FieldNotIndexed {
                field: index.to_string(),
            });
        }
        if limit == 0 {
            return Err(BrokerError::InvalidRange("limit must be >= 1".into()));
        }

        let window = table.query_range(index, &range, limit, direction)?;
        let snapshot = RangeSnapshot {
            rows: window
                .iter()
                .filter_map(|id| table.select(*id).map(|(v, f)| (*id, v, f)))
                .collect(),
        };

        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        let bus_rx = self.bus(component).subscribe();

        let handle = tokio::spawn(range_subscription_task(
            id,
            bus_rx,
            tx,
            Arc::clone(&table),
            index.to_string(),
            range,
            limit,
            direction,
            window,
        ));
        self.inner.subscriptions.insert(
            id,
            LiveSubscription {
                abort: handle.abort_handle(),
            },
        );

        Ok((id, snapshot, rx))
    }

    /// Tears down a subscription. A no-op for an unknown or
    /// already-removed id (§8 "idempotent unsubscribe").
    pub fn unsubscribe(&self, id: u64) {
        if let Some((_, live)) = self.inner.subscriptions.remove(&id) {
            live.abort.abort();
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.inner.subscriptions.len()
    }
}

/// Watches one component's bus and maintains a single row subscription's
/// matched-row identity, translating each event into the transition table
/// §4.3 specifies. Exits (dropping the registry's abort handle moot) once
/// the outgoing channel's receiver is gone — i.e. the gateway unsubscribed
/// or the connection closed.
async fn row_subscription_task(
    id: u64,
    mut bus_rx: broadcast::Receiver<ChangeEvent>,
    tx: mpsc::Sender<Delta>,
    table: Arc<Table>,
    field: String,
    target: FieldValue,
    mut current: Option<u64>,
) {
    let field_idx = match table.field_index(&field) {
        Some(idx) => idx,
        None => return,
    };

    loop {
        match bus_rx.recv().await {
            Ok(event) => {
                if event.component != table.name {
                    continue;
                }
                let matches_target =
                    event.op != ChangeOp::Delete && event.fields.get(field_idx) == Some(&target);

                let sent = match current {
                    Some(old) if old == event.row_id && event.op == ChangeOp::Delete => {
                        current = None;
                        tx.send(Delta::Delete { row_id: event.row_id }).await
                    }
                    Some(old) if old == event.row_id && matches_target => {
                        tx.send(Delta::Update {
                            row_id: event.row_id,
                            fields: event.fields.clone(),
                        })
                        .await
                    }
                    Some(old) if old == event.row_id => {
                        // Row stopped matching (field changed away).
                        current = None;
                        tx.send(Delta::Delete { row_id: event.row_id }).await
                    }
                    Some(old) if matches_target => {
                        // A different row now claims the value; displace.
                        current = Some(event.row_id);
                        if tx.send(Delta::Delete { row_id: old }).await.is_err() {
                            break;
                        }
                        tx.send(Delta::Insert {
                            row_id: event.row_id,
                            fields: event.fields.clone(),
                        })
                        .await
                    }
                    None if matches_target => {
                        current = Some(event.row_id);
                        tx.send(Delta::Insert {
                            row_id: event.row_id,
                            fields: event.fields.clone(),
                        })
                        .await
                    }
                    _ => Ok(()),
                };
                if sent.is_err() {
                    break;
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(subscription_id = id, missed, "row subscription lagged, resyncing");
                let resynced = table
                    .equals_lookup(&field, &target)
                    .ok()
                    .and_then(|ids| ids.into_iter().next());
                if resynced == current {
                    continue;
                }
                if let Some(old) = current.take() {
                    if tx.send(Delta::Delete { row_id: old }).await.is_err() {
                        break;
                    }
                }
                if let Some(new_id) = resynced {
                    if let Some((_, fields)) = table.select(new_id) {
                        current = Some(new_id);
                        if tx.send(Delta::Insert { row_id: new_id, fields }).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Watches one component's bus and maintains a range subscription's
/// window, re-querying the store on every relevant event (or on a missed
/// batch) rather than incrementally tracking positions — the "re-snapshot
/// on resync" choice recorded in DESIGN.md's Open Question resolutions.
#[allow(clippy::too_many_arguments)]
async fn range_subscription_task(
    id: u64,
    mut bus_rx: broadcast::Receiver<ChangeEvent>,
    tx: mpsc::Sender<Delta>,
    table: Arc<Table>,
    index: String,
    range: KeyRange,
    limit: usize,
    direction: Direction,
    mut window: Vec<u64>,
) {
    loop {
        let changed_row_id = match bus_rx.recv().await {
            Ok(event) => {
                if event.component != table.name {
                    continue;
                }
                Some(event.row_id)
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(subscription_id = id, missed, "range subscription lagged, resyncing");
                None
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let new_window = match table.query_range(&index, &range, limit, direction) {
            Ok(w) => w,
            Err(_) => break,
        };

        if !emit_range_diff(&tx, &table, &window, &new_window, changed_row_id).await {
            break;
        }
        window = new_window;
    }
}

/// Diffs an old/new window and emits the deltas §4.3 specifies: rows that
/// left (including displaced-past-`limit`) delete, rows that entered
/// insert, and the row that actually changed (if it stayed inside) gets
/// an update. Shared by the normal event path and the lag-resync path —
/// both just need "here's the window before, here's the window now".
async fn emit_range_diff(
    tx: &mpsc::Sender<Delta>,
    table: &Table,
    old_window: &[u64],
    new_window: &[u64],
    changed_row_id: Option<u64>,
) -> bool {
    let old_set: HashSet<u64> = old_window.iter().copied().collect();
    let new_set: HashSet<u64> = new_window.iter().copied().collect();

    for &row_id in old_window {
        if !new_set.contains(&row_id) && tx.send(Delta::Delete { row_id }).await.is_err() {
            return false;
        }
    }
    for &row_id in new_window {
        if !old_set.contains(&row_id) {
            if let Some((_, fields)) = table.select(row_id) {
                if tx.send(Delta::Insert { row_id, fields }).await.is_err() {
                    return false;
                }
            }
        } else if Some(row_id) == changed_row_id {
            if let Some((_, fields)) = table.select(row_id) {
                if tx.send(Delta::Update { row_id, fields }).await.is_err() {
                    return false;
                }
            }
        }
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use hetu_store::{begin, Field, IndexSpec, Persistency, ScalarType};
    use std::time::Duration;

    fn position_db() -> Arc<Database> {
        let db = Arc::new(Database::new());
        db.register_component(
            "Position".into(),
            vec![
                Field::new("owner", ScalarType::U64, FieldValue::U64(0)),
                Field::new("x", ScalarType::F32, FieldValue::F32(0.0)),
                Field::new("y", ScalarType::F32, FieldValue::F32(0.0)),
            ],
            vec![("owner".into(), IndexSpec::Unique)],
            Persistency::Transient,
            PermissionLevel::Guest,
        )
        .unwrap();
        db
    }

    async fn recv_timeout(rx: &mut mpsc::Receiver<Delta>) -> Delta {
        tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("delta within timeout")
            .expect("channel open")
    }

    #[tokio::test]
    async fn row_subscription_sees_insert_then_update() {
        let db = position_db();
        let broker = Broker::new(Arc::clone(&db));

        let (_id, snapshot, mut rx) = broker
            .subscribe_row(PermissionLevel::Guest, "Position", "owner", FieldValue::U64(1))
            .unwrap();
        assert!(snapshot.row.is_none());

        let mut tx = begin(&db, PermissionLevel::User);
        let row_id = tx
            .insert(
                "Position",
                vec![FieldValue::U64(1), FieldValue::F32(0.0), FieldValue::F32(0.0)],
            )
            .unwrap();
        let events = tx.commit().unwrap();
        broker.publish(events);

        match recv_timeout(&mut rx).await {
            Delta::Insert { row_id: id, .. } => assert_eq!(id, row_id),
            other => panic!("expected insert, got {other:?}"),
        }

        let mut tx = begin(&db, PermissionLevel::User);
        let mut fields = std::collections::HashMap::new();
        fields.insert("x".to_string(), FieldValue::F32(3.0));
        tx.update("Position", row_id, fields).unwrap();
        let events = tx.commit().unwrap();
        broker.publish(events);

        match recv_timeout(&mut rx).await {
            Delta::Update { row_id: id, fields } => {
                assert_eq!(id, row_id);
                assert_eq!(fields[1], FieldValue::F32(3.0));
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn range_subscription_displaces_past_limit() {
        let db = Arc::new(Database::new());
        db.register_component(
            "Position".into(),
            vec![Field::new("owner", ScalarType::U64, FieldValue::U64(0))],
            vec![("owner".into(), IndexSpec::Ordered)],
            Persistency::Transient,
            PermissionLevel::Guest,
        )
        .unwrap();

        for owner in 1..=30u64 {
            let mut tx = begin(&db, PermissionLevel::User);
            tx.insert("Position", vec![FieldValue::U64(owner)]).unwrap();
            tx.commit().unwrap();
        }

        let broker = Broker::new(Arc::clone(&db));
        let (_id, snapshot, mut rx) = broker
            .subscribe_range(
                PermissionLevel::Guest,
                "Position",
                "owner",
                KeyRange::unbounded(),
                10,
                Direction::Ascending,
            )
            .unwrap();
        assert_eq!(snapshot.rows.len(), 10);

        let mut tx = begin(&db, PermissionLevel::User);
        tx.insert("Position", vec![FieldValue::U64(0)]).unwrap();
        let events = tx.commit().unwrap();
        broker.publish(events);

        let mut deltas = vec![recv_timeout(&mut rx).await, recv_timeout(&mut rx).await];
        deltas.sort_by_key(|d| matches!(d, Delta::Insert { .. }));
        assert!(matches!(deltas[0], Delta::Delete { .. } | Delta::Insert { .. }));
        assert!(deltas.iter().any(|d| matches!(d, Delta::Insert { .. })));
        assert!(deltas.iter().any(|d| matches!(d, Delta::Delete { .. })));
    }

    #[test]
    fn unsubscribe_unknown_id_is_noop() {
        let db = position_db();
        let broker = Broker::new(db);
        broker.unsubscribe(42);
        assert_eq!(broker.subscription_count(), 0);
    }
}
