//! State machine construction

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use crate::error::StateMachineError;

use super::action::TransitionAction;
use super::builtin;
use super::machine::{StateMachine, Transition};
use super::{LifecycleState, StateId, INBUILT_STATE_ID_MAX};

/// Id boundaries handed to custom initializers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateIdBounds {
    /// Custom state ids must be greater than this
    pub inbuilt_max: StateId,
    /// State a passing review should move to
    pub review_success: StateId,
    /// State a failing review should move to
    pub review_retry: StateId,
}

impl Default for StateIdBounds {
    fn default() -> Self {
        Self {
            inbuilt_max: INBUILT_STATE_ID_MAX,
            review_success: builtin::REVIEWED,
            review_retry: builtin::CHANGES_REQUIRED,
        }
    }
}

/// Hook for layering custom states and transitions over the built-ins
pub trait CustomStateInitializer {
    fn init(
        &self,
        builder: &mut StateMachineBuilder,
        bounds: &StateIdBounds,
    ) -> Result<(), StateMachineError>;
}

/// Collects states and transitions, then freezes them into a [`StateMachine`].
///
/// A fresh builder already holds every built-in state and transition.
pub struct StateMachineBuilder {
    states: BTreeMap<StateId, LifecycleState>,
    transitions: BTreeMap<Transition, Arc<dyn TransitionAction>>,
}

impl StateMachineBuilder {
    pub fn new() -> Self {
        let mut builder = Self {
            states: BTreeMap::new(),
            transitions: BTreeMap::new(),
        };
        for state in builtin::states() {
            builder.states.insert(state.id(), state);
        }
        for (transition, action) in builtin::transitions() {
            builder.transitions.insert(transition, action);
        }
        builder
    }

    /// Register a state.
    ///
    /// Fails if the id is taken, or if a custom state claims a reserved id.
    pub fn register(&mut self, state: LifecycleState) -> Result<&mut Self, StateMachineError> {
        if !state.is_builtin() && state.id() <= INBUILT_STATE_ID_MAX {
            return Err(StateMachineError::InvalidCustomStateId {
                id: state.id(),
                max: INBUILT_STATE_ID_MAX,
            });
        }
        if let Some(existing) = self.states.get(&state.id()) {
            return Err(StateMachineError::DuplicateState {
                id: state.id(),
                existing: existing.name().to_string(),
            });
        }
        self.states.insert(state.id(), state);
        Ok(self)
    }

    /// Bind `action` to `transition`. Both endpoints must already be registered.
    pub fn transition(
        &mut self,
        transition: Transition,
        action: Arc<dyn TransitionAction>,
    ) -> Result<&mut Self, StateMachineError> {
        for id in [transition.source_state_id, transition.target_state_id] {
            if !self.states.contains_key(&id) {
                return Err(StateMachineError::UnknownState(id));
            }
        }
        if self.transitions.contains_key(&transition) {
            return Err(StateMachineError::DuplicateTransition {
                source_id: transition.source_state_id,
                target_id: transition.target_state_id,
            });
        }
        self.transitions.insert(transition, action);
        Ok(self)
    }

    pub fn states(&self) -> &BTreeMap<StateId, LifecycleState> {
        &self.states
    }

    /// Run a custom initializer against this builder
    pub fn apply(
        &mut self,
        initializer: &dyn CustomStateInitializer,
    ) -> Result<&mut Self, StateMachineError> {
        initializer.init(self, &StateIdBounds::default())?;
        Ok(self)
    }

    pub fn build(self) -> StateMachine {
        StateMachine::new(self.states, self.transitions)
    }
}

impl Default for StateMachineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateMachineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StateMachineBuilder")
            .field("states", &self.states.keys().collect::<Vec<_>>())
            .field("transitions", &self.transitions.keys().collect::<Vec<_>>())
            .finish()
    }
}
