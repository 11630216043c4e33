//! System registration: parameter schema, permission level, and body.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use hetu_store::{FieldValue, PermissionLevel, ScalarType};

use crate::context::SystemContext;
use crate::error::ExecError;

/// One declared parameter of a System's call signature, positional (args
/// are matched by index, same convention as a Component's field list).
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub ty: ScalarType,
}

impl ParamSpec {
    pub fn new(name: impl Into<String>, ty: ScalarType) -> Self {
        Self {
            name: name.into(),
            ty,
        }
    }
}

/// A System's body. Boxed behind a higher-ranked `Fn` so the registry can
/// store bodies for Systems with different lifetimes of borrowed state
/// without each one needing its own concrete type.
pub type SystemFn = Arc<
    dyn for<'a> Fn(&mut SystemContext<'a>, &[FieldValue]) -> Result<Vec<FieldValue>, ExecError>
        + Send
        + Sync,
>;

/// A registered System: name, parameter schema, declared component access
/// (documentation only — not enforced by the executor, which relies on
/// the store's own per-component permission check), minimum permission
/// level, and body.
pub struct SystemDef {
    pub name: String,
    pub params: Vec<ParamSpec>,
    pub permission: PermissionLevel,
    pub reads: Vec<String>,
    pub writes: Vec<String>,
    pub(crate) func: SystemFn,
}

impl std::fmt::Debug for SystemDef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemDef")
            .field("name", &self.name)
            .field("params", &self.params)
            .field("permission", &self.permission)
            .field("reads", &self.reads)
            .field("writes", &self.writes)
            .finish()
    }
}

/// Global table of registered Systems. Names are unique; registration
/// happens once at startup and the registry is read-only afterward on the
/// hot path (§9 "no global mutable state in the hot path" — the `RwLock`
/// here is only ever write-locked during startup registration).
#[derive(Clone, Default)]
pub struct SystemRegistry {
    systems: Arc<RwLock<HashMap<String, Arc<SystemDef>>>>,
}

impl SystemRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a System. Returns an error if the name is already taken
    /// — System names are globally unique per §4.2.
    pub fn register<F>(
        &self,
        name: impl Into<String>,
        params: Vec<ParamSpec>,
        permission: PermissionLevel,
        reads: Vec<String>,
        writes: Vec<String>,
        func: F,
    ) -> Result<(), ExecError>
    where
        F: for<'a> Fn(&mut SystemContext<'a>, &[FieldValue]) -> Result<Vec<FieldValue>, ExecError>
            + Send
            + Sync
            + 'static,
    {
        let name = name.into();
        let mut systems = self.systems.write().expect("system registry lock poisoned");
        if systems.contains_key(&name) {
            return Err(ExecError::BadArgs {
                system: name.clone(),
                reason: format!("system '{name}' already registered"),
            });
        }
        systems.insert(
            name.clone(),
            Arc::new(SystemDef {
                name,
                params,
                permission,
                reads,
                writes,
                func: Arc::new(func),
            }),
        );
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<SystemDef>> {
        self.systems
            .read()
            .expect("system registry lock poisoned")
            .get(name)
            .cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.systems
            .read()
            .expect("system registry lock poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// Validates positional arguments against a System's declared schema:
    /// arity, then each value's scalar type.
    pub fn validate_args(def: &SystemDef, args: &[FieldValue]) -> Result<(), ExecError> {
        if args.len() != def.params.len() {
            return Err(ExecError::BadArgs {
                system: def.name.clone(),
                reason: format!(
                    "expected {} argument(s), got {}",
                    def.params.len(),
                    args.len()
                ),
            });
        }
        for (param, value) in def.params.iter().zip(args.iter()) {
            if !param.ty.accepts(value) {
                return Err(ExecError::BadArgs {
                    system: def.name.clone(),
                    reason: format!(
                        "parameter '{}' expected {}, got {}",
                        param.name,
                        param.ty.name(),
                        value.type_name()
                    ),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hetu_store::FieldValue;

    fn noop_system(_ctx: &mut SystemContext<'_>, _args: &[FieldValue]) -> Result<Vec<FieldValue>, ExecError> {
        Ok(vec![])
    }

    #[test]
    fn register_rejects_duplicate_name() {
        let registry = SystemRegistry::new();
        registry
            .register("ping", vec![], PermissionLevel::Guest, vec![], vec![], noop_system)
            .unwrap();
        let err = registry
            .register("ping", vec![], PermissionLevel::Guest, vec![], vec![], noop_system)
            .unwrap_err();
        assert!(matches!(err, ExecError::BadArgs { .. }));
    }

    #[test]
    fn validate_args_checks_arity_and_type() {
        let def = SystemDef {
            name: "move_to".into(),
            params: vec![ParamSpec::new("x", ScalarType::F32), ParamSpec::new("y", ScalarType::F32)],
            permission: PermissionLevel::User,
            reads: vec![],
            writes: vec!["Position".into()],
            func: Arc::new(noop_system),
        };

        assert!(SystemRegistry::validate_args(&def, &[FieldValue::F32(1.0), FieldValue::F32(2.0)]).is_ok());
        assert!(SystemRegistry::validate_args(&def, &[FieldValue::F32(1.0)]).is_err());
        assert!(SystemRegistry::validate_args(&def, &[FieldValue::F32(1.0), FieldValue::I32(2)]).is_err());
    }
}
