//! Schema version lifecycle
//!
//! A version moves through a set of lifecycle states. The legal moves are the
//! transitions registered on a [`StateMachine`], each bound to one
//! [`TransitionAction`] that guards the move and performs its side effects.
//!
//! | From             | To                                          |
//! |------------------|---------------------------------------------|
//! | INITIATED        | START_REVIEW, ENABLED, ARCHIVED, DELETED    |
//! | START_REVIEW     | REVIEWED, CHANGES_REQUIRED                  |
//! | CHANGES_REQUIRED | START_REVIEW, INITIATED, DELETED            |
//! | REVIEWED         | ENABLED, ARCHIVED, DELETED                  |
//! | ENABLED          | DISABLED, ARCHIVED                          |
//! | DISABLED         | ENABLED, ARCHIVED, DELETED                  |
//!
//! ARCHIVED and DELETED have no outgoing edges.
//!
//! Built-in states own the ids `0..=32`; custom states registered through a
//! [`CustomStateInitializer`] must use ids above that range.

mod action;
mod builder;
pub mod builtin;
mod machine;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use action::{
    DeleteAction, EnableAction, FnAction, LifecycleServices, TransitionAction, TransitionContext,
    UpdateStateAction,
};
pub use builder::{CustomStateInitializer, StateIdBounds, StateMachineBuilder};
pub use machine::{StateMachine, StateMachineInfo, Transition, TransitionInfo};

/// Identifier of a lifecycle state
pub type StateId = u8;

/// Highest id reserved for built-in states
pub const INBUILT_STATE_ID_MAX: StateId = 32;

/// A named phase a schema version can occupy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LifecycleState {
    id: StateId,
    name: String,
    description: String,
    #[serde(default)]
    start: bool,
    #[serde(default)]
    terminal: bool,
    #[serde(default)]
    requires_review: bool,
    #[serde(default, skip_deserializing)]
    builtin: bool,
}

impl LifecycleState {
    /// A caller-defined state. Its id must be above [`INBUILT_STATE_ID_MAX`].
    pub fn custom(id: StateId, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            description: description.into(),
            start: false,
            terminal: false,
            requires_review: false,
            builtin: false,
        }
    }

    pub(crate) fn builtin(id: StateId, name: &str, description: &str) -> Self {
        Self {
            builtin: true,
            ..Self::custom(id, name, description)
        }
    }

    /// Mark as a start state
    pub fn start(mut self) -> Self {
        self.start = true;
        self
    }

    /// Mark as a terminal state
    pub fn terminal(mut self) -> Self {
        self.terminal = true;
        self
    }

    /// Mark as requiring review
    pub fn review_required(mut self) -> Self {
        self.requires_review = true;
        self
    }

    pub fn id(&self) -> StateId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn is_start(&self) -> bool {
        self.start
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal
    }

    pub fn requires_review(&self) -> bool {
        self.requires_review
    }

    pub fn is_builtin(&self) -> bool {
        self.builtin
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.id)
    }
}
