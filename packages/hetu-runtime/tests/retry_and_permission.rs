use std::collections::HashMap;
use std::sync::Arc;

use hetu_runtime::{ExecConfig, ExecError, Executor, ParamSpec, SessionContext, SystemRegistry};
use hetu_store::{begin, Database, Field, FieldValue, PermissionLevel, Persistency, ScalarType};

fn counters_db() -> Arc<Database> {
    let db = Database::new();
    db.register_component(
        "Counter".to_string(),
        vec![Field::new("v", ScalarType::I64, FieldValue::I64(0))],
        vec![],
        Persistency::Transient,
        PermissionLevel::Guest,
    )
    .unwrap();
    let db = Arc::new(db);
    let mut tx = begin(&db, PermissionLevel::Owner);
    tx.insert("Counter", vec![FieldValue::I64(0)]).unwrap();
    tx.commit().unwrap();
    db
}

fn registry_with_incr() -> SystemRegistry {
    let registry = SystemRegistry::new();
    registry
        .register(
            "incr",
            vec![],
            PermissionLevel::Guest,
            vec!["Counter".to_string()],
            vec!["Counter".to_string()],
            |ctx, _args| {
                let (_, fields) = ctx.tx.select("Counter", 1)?.unwrap();
                let hetu_store::FieldValue::I64(v) = fields[0] else {
                    unreachable!()
                };
                std::thread::yield_now();
                let mut update = HashMap::new();
                update.insert("v".to_string(), FieldValue::I64(v + 1));
                ctx.tx.update("Counter", 1, update)?;
                Ok(vec![FieldValue::I64(v + 1)])
            },
        )
        .unwrap();
    registry
        .register(
            "admin_only",
            vec![],
            PermissionLevel::Admin,
            vec![],
            vec![],
            |_ctx, _args| Ok(vec![]),
        )
        .unwrap();
    registry
}

/// Many concurrent `incr` calls against the same row must all land:
/// the executor's retry-on-conflict loop keeps retrying each call until
/// its commit succeeds, so the final value is the exact call count with
/// no lost updates. A generous `max_retries` keeps this from being a
/// race against the retry budget itself.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_all_land_via_conflict_retry() {
    let db = counters_db();
    let registry = registry_with_incr();
    let mut config = ExecConfig::default();
    config.max_retries = 1000;
    let executor = Executor::new(db.clone(), registry, config);

    let mut handles = Vec::new();
    for i in 0..20 {
        let session = SessionContext::new(i);
        handles.push(executor.call("incr", vec![], session));
    }

    for handle in handles {
        handle.wait().await.expect("call should eventually land");
    }

    let mut verify = begin(&db, PermissionLevel::Owner);
    let (_, fields) = verify.select("Counter", 1).unwrap().unwrap();
    assert_eq!(fields[0], FieldValue::I64(20));
}

/// With `max_retries: 0`, a call whose commit is guaranteed to conflict
/// (an external write lands on the same row between its read and its
/// commit, forced here rather than raced) surfaces `ConflictExhausted`
/// after exactly one attempt instead of retrying.
#[tokio::test]
async fn conflict_exhausted_after_retry_budget() {
    let db = counters_db();
    let registry = SystemRegistry::new();
    let rogue_db = Arc::clone(&db);
    registry
        .register(
            "incr_vs_rogue_writer",
            vec![],
            PermissionLevel::Guest,
            vec!["Counter".to_string()],
            vec!["Counter".to_string()],
            move |ctx, _args| {
                let (_, fields) = ctx.tx.select("Counter", 1)?.unwrap();
                let hetu_store::FieldValue::I64(v) = fields[0] else {
                    unreachable!()
                };

                // Land a conflicting commit on the same row before this
                // call's own commit, guaranteeing the optimistic check fails.
                let mut rogue = begin(&rogue_db, PermissionLevel::Owner);
                let mut rogue_update = HashMap::new();
                rogue_update.insert("v".to_string(), FieldValue::I64(999));
                rogue.update("Counter", 1, rogue_update)?;
                rogue.commit()?;

                let mut update = HashMap::new();
                update.insert("v".to_string(), FieldValue::I64(v + 1));
                ctx.tx.update("Counter", 1, update)?;
                Ok(vec![])
            },
        )
        .unwrap();

    let mut config = ExecConfig::default();
    config.max_retries = 0;
    let executor = Executor::new(db, registry, config);

    let session = SessionContext::new(1);
    let outcome = executor.call("incr_vs_rogue_writer", vec![], session).wait().await;
    assert!(
        matches!(outcome, Err(ExecError::ConflictExhausted { attempts: 0, .. })),
        "got {outcome:?}"
    );
}

/// A `Guest` session calling a System declared `Admin` is rejected before
/// its body ever runs, with no transaction side effects.
#[tokio::test]
async fn forbidden_below_declared_permission() {
    let db = counters_db();
    let registry = registry_with_incr();
    let executor = Executor::new(db, registry, ExecConfig::default());

    let session = SessionContext::new(1);
    let outcome = executor.call("admin_only", vec![], session).wait().await;
    assert!(matches!(outcome, Err(ExecError::Forbidden { .. })), "got {outcome:?}");
}

/// Calling a name the registry never saw reports `UnknownSystem`, not a
/// panic or a generic store error.
#[tokio::test]
async fn unknown_system_is_reported() {
    let db = counters_db();
    let registry = registry_with_incr();
    let executor = Executor::new(db, registry, ExecConfig::default());

    let session = SessionContext::new(1);
    let outcome = executor.call("does_not_exist", vec![], session).wait().await;
    assert!(matches!(outcome, Err(ExecError::UnknownSystem(_))), "got {outcome:?}");
}

/// Bad argument count against a System's declared params is rejected
/// before the body runs, as `BadArgs`.
#[tokio::test]
async fn wrong_arity_is_bad_args() {
    let db = counters_db();
    let registry = SystemRegistry::new();
    registry
        .register(
            "takes_one",
            vec![ParamSpec::new("x", ScalarType::I64)],
            PermissionLevel::Guest,
            vec![],
            vec![],
            |_ctx, _args| Ok(vec![]),
        )
        .unwrap();
    let executor = Executor::new(db, registry, ExecConfig::default());

    let session = SessionContext::new(1);
    let outcome = executor.call("takes_one", vec![], session).wait().await;
    assert!(matches!(outcome, Err(ExecError::BadArgs { .. })), "got {outcome:?}");
}
