//! Built-in lifecycle states and their transitions
//!
//! The list below is the single registration point for the built-in states.
//! [`StateMachineBuilder::new`](super::StateMachineBuilder::new) walks it
//! before any custom state is registered.

use std::sync::Arc;

use super::action::{DeleteAction, EnableAction, TransitionAction, UpdateStateAction};
use super::machine::Transition;
use super::{LifecycleState, StateId};

pub const INITIATED: StateId = 1;
pub const START_REVIEW: StateId = 2;
pub const CHANGES_REQUIRED: StateId = 3;
pub const REVIEWED: StateId = 4;
pub const ENABLED: StateId = 5;
pub const DISABLED: StateId = 6;
pub const ARCHIVED: StateId = 7;
pub const DELETED: StateId = 8;

struct BuiltinState {
    id: StateId,
    name: &'static str,
    description: &'static str,
    start: bool,
    terminal: bool,
    requires_review: bool,
}

const BUILTIN_STATES: [BuiltinState; 8] = [
    BuiltinState {
        id: INITIATED,
        name: "INITIATED",
        description: "Newly added version, not yet usable by consumers",
        start: true,
        terminal: false,
        requires_review: false,
    },
    BuiltinState {
        id: START_REVIEW,
        name: "START_REVIEW",
        description: "Version is under review",
        start: false,
        terminal: false,
        requires_review: true,
    },
    BuiltinState {
        id: CHANGES_REQUIRED,
        name: "CHANGES_REQUIRED",
        description: "Review asked for changes before the version can proceed",
        start: false,
        terminal: false,
        requires_review: false,
    },
    BuiltinState {
        id: REVIEWED,
        name: "REVIEWED",
        description: "Review passed, the version can be enabled",
        start: false,
        terminal: false,
        requires_review: false,
    },
    BuiltinState {
        id: ENABLED,
        name: "ENABLED",
        description: "Version is usable by producers and consumers",
        start: false,
        terminal: false,
        requires_review: false,
    },
    BuiltinState {
        id: DISABLED,
        name: "DISABLED",
        description: "Version is temporarily withdrawn from use",
        start: false,
        terminal: false,
        requires_review: false,
    },
    BuiltinState {
        id: ARCHIVED,
        name: "ARCHIVED",
        description: "Version is retired and kept for reference",
        start: false,
        terminal: true,
        requires_review: false,
    },
    BuiltinState {
        id: DELETED,
        name: "DELETED",
        description: "Version is deleted and detached from every branch",
        start: false,
        terminal: true,
        requires_review: false,
    },
];

#[derive(Clone, Copy)]
enum BuiltinAction {
    UpdateState,
    Enable,
    Delete,
}

const BUILTIN_TRANSITIONS: &[(StateId, StateId, BuiltinAction)] = &[
    (INITIATED, START_REVIEW, BuiltinAction::UpdateState),
    (INITIATED, ENABLED, BuiltinAction::Enable),
    (INITIATED, ARCHIVED, BuiltinAction::UpdateState),
    (INITIATED, DELETED, BuiltinAction::Delete),
    (START_REVIEW, REVIEWED, BuiltinAction::UpdateState),
    (START_REVIEW, CHANGES_REQUIRED, BuiltinAction::UpdateState),
    (CHANGES_REQUIRED, START_REVIEW, BuiltinAction::UpdateState),
    (CHANGES_REQUIRED, INITIATED, BuiltinAction::UpdateState),
    (CHANGES_REQUIRED, DELETED, BuiltinAction::Delete),
    (REVIEWED, ENABLED, BuiltinAction::Enable),
    (REVIEWED, ARCHIVED, BuiltinAction::UpdateState),
    (REVIEWED, DELETED, BuiltinAction::Delete),
    (ENABLED, DISABLED, BuiltinAction::UpdateState),
    (ENABLED, ARCHIVED, BuiltinAction::UpdateState),
    (DISABLED, ENABLED, BuiltinAction::Enable),
    (DISABLED, ARCHIVED, BuiltinAction::UpdateState),
    (DISABLED, DELETED, BuiltinAction::Delete),
];

/// Built-in states in id order
pub(crate) fn states() -> impl Iterator<Item = LifecycleState> {
    BUILTIN_STATES.iter().map(|s| {
        let mut state = LifecycleState::builtin(s.id, s.name, s.description);
        if s.start {
            state = state.start();
        }
        if s.terminal {
            state = state.terminal();
        }
        if s.requires_review {
            state = state.review_required();
        }
        state
    })
}

/// Built-in transitions with their bound actions
pub(crate) fn transitions() -> Vec<(Transition, Arc<dyn TransitionAction>)> {
    let update: Arc<dyn TransitionAction> = Arc::new(UpdateStateAction);
    let enable: Arc<dyn TransitionAction> = Arc::new(EnableAction);
    let delete: Arc<dyn TransitionAction> = Arc::new(DeleteAction);

    BUILTIN_TRANSITIONS
        .iter()
        .map(|&(source, target, action)| {
            let action = match action {
                BuiltinAction::UpdateState => Arc::clone(&update),
                BuiltinAction::Enable => Arc::clone(&enable),
                BuiltinAction::Delete => Arc::clone(&delete),
            };
            (Transition::new(source, target), action)
        })
        .collect()
}
