//! Worker-pool executor: resolves a System, runs it as a transaction, and
//! retries on optimistic conflict under a per-call deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Semaphore};
use tokio::time::{sleep, timeout};

use hetu_store::{begin, ChangeEvent, Database, FieldValue, StoreError};

use crate::context::{SessionContext, SystemContext};
use crate::error::ExecError;
use crate::registry::SystemRegistry;

/// Executor tuning for the async-worker-pool model §4.2/§5 calls for.
#[derive(Debug, Clone)]
pub struct ExecConfig {
    /// Concurrent in-flight calls. `0` resolves to the number of CPUs.
    pub worker_pool_size: usize,
    /// Retry attempts on `Conflict` before returning `conflict-exhausted`.
    pub max_retries: u32,
    /// Per-call deadline in milliseconds (default 5000, per §5).
    pub call_deadline_ms: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 0,
            max_retries: 3,
            call_deadline_ms: 5_000,
        }
    }
}

/// Result of a `CallSystem` invocation: the System's declared return
/// values plus the (possibly identity-elevated) session to carry forward.
pub type CallOutcome = Result<(Vec<FieldValue>, SessionContext), ExecError>;

/// Runs Systems against a store, bounding concurrency to
/// `worker_pool_size` in-flight calls — the "N worker executors" of §2/§5,
/// realized as a semaphore rather than a fixed thread pool since
/// suspension happens at `.await` points (network, commit, backoff sleep)
/// rather than blocking a whole OS thread.
#[derive(Clone)]
pub struct Executor {
    db: Arc<Database>,
    registry: SystemRegistry,
    semaphore: Arc<Semaphore>,
    max_retries: u32,
    deadline: Duration,
    events: Option<mpsc::UnboundedSender<Vec<ChangeEvent>>>,
}

impl Executor {
    pub fn new(db: Arc<Database>, registry: SystemRegistry, config: ExecConfig) -> Self {
        let pool_size = if config.worker_pool_size == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        } else {
            config.worker_pool_size
        };
        Self {
            db,
            registry,
            semaphore: Arc::new(Semaphore::new(pool_size)),
            max_retries: config.max_retries,
            deadline: Duration::from_millis(config.call_deadline_ms),
            events: None,
        }
    }

    /// Registers a sink that receives every successful commit's change
    /// events, in commit order, for `hetu-broker` to fan out as deltas.
    pub fn with_event_sink(mut self, sink: mpsc::UnboundedSender<Vec<ChangeEvent>>) -> Self {
        self.events = Some(sink);
        self
    }

    /// The System registry this executor dispatches against. Lets callers
    /// (the gateway's arg decoder) look up a System's declared param types
    /// before calling, instead of duplicating the registry.
    pub fn registry(&self) -> &SystemRegistry {
        &self.registry
    }

    /// Dispatches a `CallSystem`. Returns immediately with a [`CallHandle`]
    /// the caller awaits for the result, or cancels (e.g. on connection
    /// close) to abort the in-flight call — per §5 "Cancellation",
    /// cancelling drops the task's future mid-await, which drops any open
    /// `TransactionHandle` and auto-aborts it.
    pub fn call(
        &self,
        system: impl Into<String>,
        args: Vec<FieldValue>,
        session: SessionContext,
    ) -> CallHandle {
        let system = system.into();
        let db = self.db.clone();
        let registry = self.registry.clone();
        let semaphore = self.semaphore.clone();
        let max_retries = self.max_retries;
        let deadline = self.deadline;
        let events = self.events.clone();
        let (tx, rx) = oneshot::channel();
        let system_for_task = system.clone();

        let join = tokio::spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("executor semaphore closed");
            let outcome = match timeout(
                deadline,
                run_call(&db, &registry, &events, &system_for_task, args, session, max_retries),
            )
            .await
            {
                Ok(outcome) => outcome,
                Err(_) => Err(ExecError::Timeout {
                    system: system_for_task.clone(),
                }),
            };
            let _ = tx.send(outcome);
        });

        CallHandle {
            system,
            result: rx,
            abort: join.abort_handle(),
        }
    }
}

/// Handle to an in-flight or completed `CallSystem`.
pub struct CallHandle {
    system: String,
    result: oneshot::Receiver<CallOutcome>,
    abort: tokio::task::AbortHandle,
}

impl CallHandle {
    /// Cancels the call; see [`Executor::call`] for what this guarantees.
    pub fn cancel(&self) {
        self.abort.abort();
    }

    /// A cheaply cloned cancel capability, independent of `self`. Lets a
    /// caller race `wait()` (which consumes the handle) against some other
    /// signal while still being able to cancel if that signal wins.
    pub fn canceller(&self) -> tokio::task::AbortHandle {
        self.abort.clone()
    }

    /// Awaits the result. Resolves to `Cancelled` if the call was
    /// cancelled before it could reply.
    pub async fn wait(self) -> CallOutcome {
        match self.result.await {
            Ok(outcome) => outcome,
            Err(_) => Err(ExecError::Cancelled { system: self.system }),
        }
    }
}

/// One call's full lifecycle: resolve, run, commit-or-retry. Not public —
/// reached only through [`Executor::call`] so the deadline/semaphore
/// wrapping above always applies.
#[allow(clippy::too_many_arguments)]
async fn run_call(
    db: &Arc<Database>,
    registry: &SystemRegistry,
    events: &Option<mpsc::UnboundedSender<Vec<ChangeEvent>>>,
    system: &str,
    args: Vec<FieldValue>,
    mut session: SessionContext,
    max_retries: u32,
) -> CallOutcome {
    let def = registry
        .get(system)
        .ok_or_else(|| ExecError::UnknownSystem(system.to_string()))?;

    if session.level < def.permission {
        return Err(ExecError::Forbidden {
            system: system.to_string(),
        });
    }
    SystemRegistry::validate_args(&def, &args)?;

    let mut attempt: u32 = 0;
    loop {
        let mut tx = begin(db, session.level);
        let (body_result, deferred) = {
            let mut ctx = SystemContext::new(&mut tx, &mut session);
            let body_result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                (def.func)(&mut ctx, &args)
            }));
            (body_result, ctx.into_deferred())
        };

        match body_result {
            Err(panic) => {
                drop(tx);
                return Err(ExecError::Panic {
                    system: system.to_string(),
                    message: panic_message(panic),
                });
            }
            Ok(Err(e)) => {
                // Transaction auto-aborts on drop; nothing staged commits.
                return Err(e);
            }
            Ok(Ok(return_values)) => match tx.commit() {
                Ok(change_events) => {
                    if let Some(sink) = events {
                        let _ = sink.send(change_events);
                    }
                    for effect in deferred {
                        effect();
                    }
                    return Ok((return_values, session));
                }
                Err(StoreError::Conflict(_)) => {
                    attempt += 1;
                    if attempt > max_retries {
                        return Err(ExecError::ConflictExhausted {
                            system: system.to_string(),
                            attempts: attempt - 1,
                        });
                    }
                    sleep(backoff_delay(attempt)).await;
                    continue;
                }
                Err(other) => return Err(ExecError::Store(other)),
            },
        }
    }
}

fn panic_message(panic: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Exponential backoff starting at 100µs, doubling, capped at 5ms (§4.2/§9
/// — the source left the exact schedule open; this is the concrete choice
/// recorded in DESIGN.md).
fn backoff_base_micros(attempt: u32) -> u64 {
    let exponent = attempt.saturating_sub(1).min(10);
    (100u64.saturating_mul(1u64 << exponent)).min(5_000)
}

/// Applies ±20% jitter to the base delay so retrying callers don't
/// lock-step on the same schedule.
fn backoff_delay(attempt: u32) -> Duration {
    let base = backoff_base_micros(attempt) as f64;
    let jitter = 1.0 + (rand::random::<f64>() * 0.4 - 0.2);
    Duration::from_micros((base * jitter).max(0.0) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_then_caps_at_five_milliseconds() {
        assert_eq!(backoff_base_micros(1), 100);
        assert_eq!(backoff_base_micros(2), 200);
        assert_eq!(backoff_base_micros(3), 400);
        assert_eq!(backoff_base_micros(4), 800);
        assert_eq!(backoff_base_micros(7), 5_000);
        assert_eq!(backoff_base_micros(20), 5_000);
    }

    #[test]
    fn jitter_stays_within_twenty_percent_of_base() {
        for attempt in 1..8 {
            let base = backoff_base_micros(attempt) as f64;
            for _ in 0..50 {
                let delay = backoff_delay(attempt).as_micros() as f64;
                assert!(delay >= base * 0.8 - 1.0);
                assert!(delay <= base * 1.2 + 1.0);
            }
        }
    }
}
