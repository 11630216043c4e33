//! Per-call session identity and the handle passed into a System body.

use hetu_store::{PermissionLevel, TransactionHandle};

/// A boxed side effect a System defers until after its transaction commits
/// (e.g. scheduling a future call, notifying something outside the store).
/// The executor drains these only on a successful commit, never on abort
/// or conflict-retry, per §4.2's "observable only if commit succeeds".
pub type DeferredEffect = Box<dyn FnOnce() + Send>;

/// A connection's identity as seen by the executor. Owned by the caller
/// (the gateway's session state) and passed by value into each call; a
/// System that elevates identity (e.g. `login`) mutates the copy the
/// executor hands back, and the caller stores that copy for its next call
/// — this is what makes the elevation apply "starting with the next
/// CallSystem" rather than retroactively.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: u64,
    pub identity: Option<String>,
    pub level: PermissionLevel,
}

impl SessionContext {
    pub fn new(session_id: u64) -> Self {
        Self {
            session_id,
            identity: None,
            level: PermissionLevel::Guest,
        }
    }

    /// Elevates the session's identity and permission level. Per §4.5 this
    /// takes effect for calls made *after* the current one returns — since
    /// the executor only takes a `SessionContext` by value at call start
    /// and hands a mutated copy back at the end, a System can't observe
    /// its own elevation mid-call.
    pub fn set_identity(&mut self, identity: impl Into<String>, level: PermissionLevel) {
        self.identity = Some(identity.into());
        self.level = level;
    }
}

/// The handle a System body runs against: the transaction plus the calling
/// session's identity and a place to stash deferred effects.
pub struct SystemContext<'a> {
    pub tx: &'a mut TransactionHandle,
    pub session: &'a mut SessionContext,
    deferred: Vec<DeferredEffect>,
}

impl<'a> SystemContext<'a> {
    pub(crate) fn new(tx: &'a mut TransactionHandle, session: &'a mut SessionContext) -> Self {
        Self {
            tx,
            session,
            deferred: Vec::new(),
        }
    }

    /// Queues a side effect to run once this call's transaction commits.
    pub fn defer(&mut self, effect: DeferredEffect) {
        self.deferred.push(effect);
    }

    pub(crate) fn into_deferred(self) -> Vec<DeferredEffect> {
        self.deferred
    }
}
