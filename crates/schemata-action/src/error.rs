//! Error types for the action engine.

use std::fmt;

use schemata_core::types::ActionResponse;

use crate::store::StoreError;

/// Errors raised while authorizing, validating or executing an action.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("No such action: {on_type}:{action}")]
    NoSuchAction { on_type: String, action: String },
    #[error("Subject not found: {0}")]
    SubjectNotFound(String),
    #[error("Forbidden: {0}")]
    Forbidden(String),
    #[error("Unknown user: {0}")]
    UnknownUser(String),
    #[error("Field {0} cannot be blank")]
    FieldRequired(String),
    #[error("Invalid value for {field}: failed rule {rule}")]
    InvalidFieldValue { field: String, rule: String },
    #[error("Failed to resolve {segment} in {template}")]
    PathResolutionFailed { template: String, segment: String },
    #[error("Index [{index}] is out of range [{len} values] in {template}")]
    OutOfRange {
        template: String,
        index: usize,
        len: usize,
    },
    #[error("Expected an object at {segment} in {template}")]
    TypeMismatch { template: String, segment: String },
    #[error("Script failed: {script}: {cause}")]
    ScriptError { script: String, cause: String },
    #[error("Script exceeded its budget of {budget}: {script}")]
    ScriptTimeout { script: String, budget: ScriptBudget },
    #[error("Failed to {method} {outcome_type}: {source}")]
    DispatchFailed {
        outcome_type: String,
        method: String,
        #[source]
        source: StoreError,
    },
    #[error("Performer {performer} failed: {message}")]
    PerformerFailed { performer: String, message: String },
    #[error("Invalid outcome {outcome_type}: {message}")]
    InvalidOutcome {
        outcome_type: String,
        message: String,
    },
}

/// The sandbox limit a script ran into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptBudget {
    /// Wall-clock limit in milliseconds.
    WallClock(u64),
    /// Interpreter operation limit.
    Operations(u64),
}

impl fmt::Display for ScriptBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptBudget::WallClock(ms) => write!(f, "{} ms", ms),
            ScriptBudget::Operations(ops) => write!(f, "{} operations", ops),
        }
    }
}

impl ActionError {
    /// Whether the error was raised before any outcome ran.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            ActionError::NoSuchAction { .. }
                | ActionError::SubjectNotFound(_)
                | ActionError::Forbidden(_)
                | ActionError::UnknownUser(_)
                | ActionError::FieldRequired(_)
                | ActionError::InvalidFieldValue { .. }
        )
    }
}

/// Failure of a whole invocation: the terminal error plus every response
/// accumulated before it.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct InvocationError {
    pub responses: Vec<ActionResponse>,
    #[source]
    pub error: ActionError,
}

impl InvocationError {
    pub fn new(responses: Vec<ActionResponse>, error: ActionError) -> Self {
        Self { responses, error }
    }

    /// A failure that happened before any outcome produced output.
    pub fn rejected(error: ActionError) -> Self {
        Self::new(Vec::new(), error)
    }
}

impl From<ActionError> for InvocationError {
    fn from(error: ActionError) -> Self {
        Self::rejected(error)
    }
}
