//! Built-in demo Components and Systems, registered at startup so the
//! `shell` subcommand and integration tests have something to call without
//! a game-specific crate layered on top of this engine.

use std::collections::HashMap;
use std::sync::Arc;

use hetu_runtime::{ExecError, ParamSpec, SystemContext, SystemRegistry};
use hetu_store::{
    begin, Database, Field, FieldValue, IndexSpec, KeyRange, PermissionLevel, Persistency,
    ScalarType, StoreError,
};

/// Row id of the single seeded `Counter` row; the first row a fresh table
/// ever inserts always gets id 1 (`Table::reserve_row_id` starts its
/// counter there), so a component with no index can still be addressed
/// directly once seeded.
const COUNTER_ROW_ID: u64 = 1;

/// Registers every demo Component schema, skipping any already registered
/// by a reloaded persisted schema.
pub fn register_components(db: &Database) -> Result<(), StoreError> {
    if db.component("Position").is_err() {
        db.register_component(
            "Position".to_string(),
            vec![
                Field::new("owner", ScalarType::U64, FieldValue::U64(0)),
                Field::new("x", ScalarType::F32, FieldValue::F32(0.0)),
                Field::new("y", ScalarType::F32, FieldValue::F32(0.0)),
            ],
            vec![("owner".to_string(), IndexSpec::Ordered)],
            Persistency::Transient,
            PermissionLevel::Guest,
        )?;
    }

    if db.component("User").is_err() {
        db.register_component(
            "User".to_string(),
            vec![Field::new("name", ScalarType::Str, FieldValue::Str(String::new()))],
            vec![("name".to_string(), IndexSpec::Unique)],
            Persistency::Persistent,
            PermissionLevel::Guest,
        )?;
    }

    if db.component("Counter").is_err() {
        db.register_component(
            "Counter".to_string(),
            vec![Field::new("v", ScalarType::I64, FieldValue::I64(0))],
            vec![],
            Persistency::Persistent,
            PermissionLevel::Guest,
        )?;
    }

    Ok(())
}

/// Inserts the `Counter` row `incr_counter` mutates, if this is a fresh
/// table (first boot, or an empty data directory).
pub fn seed_rows(db: &Arc<Database>) -> Result<(), StoreError> {
    let table = db.component("Counter")?;
    if table.row_count() > 0 {
        return Ok(());
    }
    let mut tx = begin(db, PermissionLevel::Owner);
    tx.insert("Counter", vec![FieldValue::I64(0)])?;
    tx.commit()?;
    Ok(())
}

/// Registers every demo System.
pub fn register_systems(registry: &SystemRegistry) -> Result<(), ExecError> {
    registry.register(
        "register",
        vec![ParamSpec::new("name", ScalarType::Str)],
        PermissionLevel::Guest,
        vec![],
        vec!["User".to_string()],
        register_user,
    )?;

    registry.register(
        "login",
        vec![ParamSpec::new("name", ScalarType::Str)],
        PermissionLevel::Guest,
        vec!["User".to_string()],
        vec!["Position".to_string()],
        login,
    )?;

    registry.register(
        "move_to",
        vec![ParamSpec::new("x", ScalarType::F32), ParamSpec::new("y", ScalarType::F32)],
        PermissionLevel::User,
        vec!["Position".to_string()],
        vec!["Position".to_string()],
        move_to,
    )?;

    registry.register(
        "incr_counter",
        vec![],
        PermissionLevel::Guest,
        vec!["Counter".to_string()],
        vec!["Counter".to_string()],
        incr_counter,
    )?;

    Ok(())
}

/// The half-open range `[session_id, session_id + 1)` over a `u64` field —
/// the narrowest `KeyRange` that still matches exactly one value, since
/// `KeyRange`'s right bound is exclusive.
fn owned_by(session_id: u64) -> KeyRange {
    KeyRange {
        left: Some(FieldValue::U64(session_id)),
        right: Some(FieldValue::U64(session_id + 1)),
    }
}

/// Inserts a new `User` row. The component's `Unique` index on `name`
/// rejects a duplicate at commit time with `StoreError::ConstraintViolated`,
/// which the executor surfaces to the caller as `Store(..)`.
fn register_user(ctx: &mut SystemContext<'_>, args: &[FieldValue]) -> Result<Vec<FieldValue>, ExecError> {
    let FieldValue::Str(name) = &args[0] else {
        unreachable!("validated by SystemRegistry::validate_args");
    };
    let row_id = ctx.tx.insert("User", vec![FieldValue::Str(name.clone())])?;
    Ok(vec![FieldValue::U64(row_id)])
}

/// Elevates the caller's session to `User` level and ensures they have a
/// `Position` row, keyed by their session id. The elevation only applies
/// starting with the caller's *next* `CallSystem`, per
/// `SessionContext::set_identity`.
fn login(ctx: &mut SystemContext<'_>, args: &[FieldValue]) -> Result<Vec<FieldValue>, ExecError> {
    let FieldValue::Str(name) = &args[0] else {
        unreachable!("validated by SystemRegistry::validate_args");
    };
    let session_id = ctx.session.session_id;

    let existing = ctx.tx.query(
        "Position",
        "owner",
        &owned_by(session_id),
        1,
        hetu_store::Direction::Ascending,
    )?;
    if existing.is_empty() {
        ctx.tx.insert(
            "Position",
            vec![
                FieldValue::U64(session_id),
                FieldValue::F32(0.0),
                FieldValue::F32(0.0),
            ],
        )?;
    }

    ctx.session.set_identity(name.clone(), PermissionLevel::User);
    Ok(vec![])
}

/// Updates the caller's own `Position` row, identified by `owner ==
/// session_id`. Forbidden at `Guest` level by the System's declared
/// permission, enforced before the body ever runs.
fn move_to(ctx: &mut SystemContext<'_>, args: &[FieldValue]) -> Result<Vec<FieldValue>, ExecError> {
    let session_id = ctx.session.session_id;
    let rows = ctx.tx.query(
        "Position",
        "owner",
        &owned_by(session_id),
        1,
        hetu_store::Direction::Ascending,
    )?;
    let Some((row_id, ..)) = rows.into_iter().next() else {
        return Err(ExecError::Aborted {
            system: "move_to".to_string(),
            reason: "no Position row for this session; call login first".to_string(),
        });
    };

    let mut fields = HashMap::new();
    fields.insert("x".to_string(), args[0].clone());
    fields.insert("y".to_string(), args[1].clone());
    ctx.tx.update("Position", row_id, fields)?;
    Ok(vec![])
}

/// Reads then writes the single seeded `Counter` row without holding any
/// lock between the two, the minimal shape that reproduces a write-write
/// conflict under concurrent calls and exercises the executor's
/// retry-on-conflict loop.
fn incr_counter(ctx: &mut SystemContext<'_>, _args: &[FieldValue]) -> Result<Vec<FieldValue>, ExecError> {
    let (_, current) = ctx
        .tx
        .select("Counter", COUNTER_ROW_ID)?
        .ok_or_else(|| ExecError::Aborted {
            system: "incr_counter".to_string(),
            reason: "counter row not seeded".to_string(),
        })?;
    let FieldValue::I64(v) = current[0] else {
        unreachable!("Counter.v is declared I64");
    };

    let mut fields = HashMap::new();
    fields.insert("v".to_string(), FieldValue::I64(v + 1));
    ctx.tx.update("Counter", COUNTER_ROW_ID, fields)?;
    Ok(vec![FieldValue::I64(v + 1)])
}
