//! Error types for the schema catalog

use thiserror::Error;

use crate::state::StateId;

/// Result type for catalog operations
pub type Result<T> = std::result::Result<T, CatalogError>;

/// Request-time catalog errors
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("Schema not found: {0}")]
    SchemaNotFound(String),

    #[error("Schema already exists: {0}")]
    SchemaAlreadyExists(String),

    #[error("Schema branch not found: {0}")]
    SchemaBranchNotFound(String),

    #[error("Schema branch already exists: {0}")]
    SchemaBranchAlreadyExists(String),

    #[error("Invalid schema branch deletion: {message}")]
    InvalidSchemaBranchDeletion {
        message: String,
        #[source]
        source: Option<Box<CatalogError>>,
    },

    #[error("Incompatible schema: {0}")]
    IncompatibleSchema(String),

    #[error("Invalid schema: {0}")]
    InvalidSchema(String),

    #[error("Unsupported schema type: {0}")]
    UnsupportedSchemaType(String),

    #[error("Schema lifecycle error: {0}")]
    Lifecycle(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("State machine error: {0}")]
    StateMachine(#[from] StateMachineError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CatalogError {
    /// Lifecycle error for a move with no registered edge
    pub fn illegal_transition(source: StateId, target: StateId) -> Self {
        CatalogError::Lifecycle(format!(
            "no transition registered from state [{}] to state [{}]",
            source, target
        ))
    }

    /// Wrap an error raised while cascading a branch deletion
    pub fn branch_deletion(message: impl Into<String>, source: CatalogError) -> Self {
        CatalogError::InvalidSchemaBranchDeletion {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}

/// Errors raised while assembling the lifecycle state machine.
///
/// These are fatal at startup: a catalog cannot serve requests with a
/// malformed lifecycle definition.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StateMachineError {
    #[error("State [{id}] is already registered as '{existing}'")]
    DuplicateState { id: StateId, existing: String },

    #[error("State [{0}] is not yet registered")]
    UnknownState(StateId),

    #[error("Transition already exists, from: [{source_id}] to: [{target_id}]")]
    DuplicateTransition { source_id: StateId, target_id: StateId },

    #[error("Custom state id [{id}] must be greater than {max}")]
    InvalidCustomStateId { id: StateId, max: StateId },
}

/// Errors surfaced by storage backends
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Row already exists in '{namespace}': {key}")]
    AlreadyExists { namespace: String, key: String },

    #[error("Malformed row in '{namespace}': {message}")]
    Malformed { namespace: String, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Backend failure: {0}")]
    Backend(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
