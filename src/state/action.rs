//! Transition actions

use crate::error::Result;
use crate::version::SchemaVersionInfo;

use super::StateId;

/// Catalog capabilities an action may call into while a transition fires.
///
/// Implemented by the version lifecycle manager; actions never reach storage
/// directly.
pub trait LifecycleServices {
    /// Fails with `IncompatibleSchema` if `version` conflicts with the enabled
    /// versions that precede it in any lineage containing it.
    fn check_enable_compatibility(&self, version: &SchemaVersionInfo) -> Result<()>;

    /// Detaches `version` from every branch. Fails if the version is the root
    /// of a non-master branch.
    fn remove_version_mappings(&self, version: &SchemaVersionInfo) -> Result<()>;
}

/// What a firing transition sees
pub struct TransitionContext<'a> {
    version: &'a SchemaVersionInfo,
    target_state: StateId,
    services: &'a dyn LifecycleServices,
}

impl<'a> TransitionContext<'a> {
    pub fn new(
        version: &'a SchemaVersionInfo,
        target_state: StateId,
        services: &'a dyn LifecycleServices,
    ) -> Self {
        Self {
            version,
            target_state,
            services,
        }
    }

    pub fn version(&self) -> &SchemaVersionInfo {
        self.version
    }

    pub fn source_state(&self) -> StateId {
        self.version.state_id
    }

    pub fn target_state(&self) -> StateId {
        self.target_state
    }

    pub fn services(&self) -> &dyn LifecycleServices {
        self.services
    }
}

/// Behavior bound to one transition.
///
/// Returning `Ok` lets the version advance to the target state; returning an
/// error leaves the stored state untouched.
pub trait TransitionAction: Send + Sync {
    /// Short name used in the state machine config projection
    fn name(&self) -> &str;

    fn apply(&self, ctx: &TransitionContext<'_>) -> Result<()>;
}

/// Moves the state with no guard and no side effect
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateStateAction;

impl TransitionAction for UpdateStateAction {
    fn name(&self) -> &str {
        "update-state"
    }

    fn apply(&self, _ctx: &TransitionContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Requires the version to be compatible with the enabled versions before it
#[derive(Debug, Clone, Copy, Default)]
pub struct EnableAction;

impl TransitionAction for EnableAction {
    fn name(&self) -> &str {
        "enable"
    }

    fn apply(&self, ctx: &TransitionContext<'_>) -> Result<()> {
        ctx.services().check_enable_compatibility(ctx.version())
    }
}

/// Detaches the version from its branches
#[derive(Debug, Clone, Copy, Default)]
pub struct DeleteAction;

impl TransitionAction for DeleteAction {
    fn name(&self) -> &str {
        "delete"
    }

    fn apply(&self, ctx: &TransitionContext<'_>) -> Result<()> {
        ctx.services().remove_version_mappings(ctx.version())
    }
}

/// Adapts a closure into a [`TransitionAction`]
pub struct FnAction<F> {
    name: String,
    f: F,
}

impl<F> FnAction<F>
where
    F: Fn(&TransitionContext<'_>) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> TransitionAction for FnAction<F>
where
    F: Fn(&TransitionContext<'_>) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ctx: &TransitionContext<'_>) -> Result<()> {
        (self.f)(ctx)
    }
}
