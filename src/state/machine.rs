//! Frozen lifecycle state machine

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CatalogError, Result};
use crate::version::SchemaVersionInfo;

use super::action::{LifecycleServices, TransitionAction, TransitionContext};
use super::builder::StateMachineBuilder;
use super::{LifecycleState, StateId};

/// A directed edge between two states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Transition {
    pub source_state_id: StateId,
    pub target_state_id: StateId,
}

impl Transition {
    pub fn new(source_state_id: StateId, target_state_id: StateId) -> Self {
        Self {
            source_state_id,
            target_state_id,
        }
    }
}

impl fmt::Display for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] -> [{}]", self.source_state_id, self.target_state_id)
    }
}

/// Serializable projection of a state machine, for tooling
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateMachineInfo {
    pub states: Vec<LifecycleState>,
    pub transitions: Vec<TransitionInfo>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionInfo {
    pub source_state_id: StateId,
    pub target_state_id: StateId,
    pub action: String,
}

/// Immutable set of lifecycle states and the actions bound to their transitions
pub struct StateMachine {
    states: BTreeMap<StateId, LifecycleState>,
    transitions: BTreeMap<Transition, Arc<dyn TransitionAction>>,
}

impl StateMachine {
    pub(super) fn new(
        states: BTreeMap<StateId, LifecycleState>,
        transitions: BTreeMap<Transition, Arc<dyn TransitionAction>>,
    ) -> Self {
        Self {
            states,
            transitions,
        }
    }

    /// Builder pre-populated with the built-in states and transitions
    pub fn builder() -> StateMachineBuilder {
        StateMachineBuilder::new()
    }

    pub fn states(&self) -> &BTreeMap<StateId, LifecycleState> {
        &self.states
    }

    pub fn state(&self, id: StateId) -> Option<&LifecycleState> {
        self.states.get(&id)
    }

    /// Look a state up by name, ignoring ASCII case
    pub fn state_by_name(&self, name: &str) -> Option<&LifecycleState> {
        self.states
            .values()
            .find(|s| s.name().eq_ignore_ascii_case(name))
    }

    pub fn transitions(&self) -> impl Iterator<Item = &Transition> {
        self.transitions.keys()
    }

    pub fn has_transition(&self, source: StateId, target: StateId) -> bool {
        self.transitions.contains_key(&Transition::new(source, target))
    }

    /// The action bound to `source -> target`
    pub fn action(&self, source: StateId, target: StateId) -> Result<&Arc<dyn TransitionAction>> {
        self.transitions
            .get(&Transition::new(source, target))
            .ok_or_else(|| CatalogError::illegal_transition(source, target))
    }

    /// Resolve and run the action for moving `version` to `target`.
    ///
    /// Persisting the new state is the caller's job and must only happen when
    /// this returns `Ok`.
    pub fn execute(
        &self,
        version: &SchemaVersionInfo,
        target: StateId,
        services: &dyn LifecycleServices,
    ) -> Result<()> {
        if !self.states.contains_key(&target) {
            return Err(CatalogError::Lifecycle(format!(
                "target state [{}] is not registered",
                target
            )));
        }
        let action = self.action(version.state_id, target)?;
        debug!(
            version_id = version.id,
            source = version.state_id,
            target,
            action = action.name(),
            "executing lifecycle transition"
        );
        action.apply(&TransitionContext::new(version, target, services))
    }

    pub fn to_config(&self) -> StateMachineInfo {
        StateMachineInfo {
            states: self.states.values().cloned().collect(),
            transitions: self
                .transitions
                .iter()
                .map(|(t, action)| TransitionInfo {
                    source_state_id: t.source_state_id,
                    target_state_id: t.target_state_id,
                    action: action.name().to_string(),
                })
                .collect(),
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        StateMachineBuilder::new().build()
    }
}

impl fmt::Debug for StateMachine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachine")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions.keys().collect::<Vec<_>>())
            .finish()
    }
}
