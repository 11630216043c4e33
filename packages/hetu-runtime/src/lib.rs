//! System registry and permission-gated, retry-on-conflict executor.
//!
//! A [`System`](registry::SystemDef) is a named server procedure with a
//! typed parameter schema and a minimum [`PermissionLevel`]. Calling one
//! ([`Executor::call`]) opens a [`hetu_store`] transaction, runs the body,
//! and attempts `commit()`, retrying with jittered micro-scale backoff on
//! `Conflict` up to a configured limit, all under a per-call deadline.

mod context;
mod error;
mod executor;
mod registry;

pub use context::{DeferredEffect, SessionContext, SystemContext};
pub use error::ExecError;
pub use executor::{CallHandle, CallOutcome, ExecConfig, Executor};
pub use registry::{ParamSpec, SystemDef, SystemFn, SystemRegistry};

/// Result type used throughout the executor.
pub type Result<T> = std::result::Result<T, ExecError>;
