//! Core error types.

use std::fmt;
use thiserror::Error;

/// A failure raised by transition logic.
///
/// `kind` identifies the failure class and is what actions list in
/// `accepted_failures` to turn the failure into ordinary output data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionFailure {
    pub kind: String,
    pub message: String,
}

impl TransitionFailure {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for TransitionFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransitionFailure {}

/// Errors from the state machine runtime.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("configuration error: {reason}")]
    Configuration { reason: String },

    #[error("invalid identity: {reason}")]
    InvalidIdentity { reason: String },

    #[error("instance not found: {machine} {id}")]
    NotFound { machine: String, id: String },

    #[error("machine not found: {machine}")]
    UnknownMachine { machine: String },

    #[error("action not found: {machine}.{action}")]
    UnknownAction { machine: String, action: String },

    #[error("transition failed: {0}")]
    Transition(#[from] TransitionFailure),

    #[error("query error: {0}")]
    Query(#[from] relstm_query::QueryError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn configuration(reason: impl Into<String>) -> Self {
        CoreError::Configuration {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_identity(reason: impl Into<String>) -> Self {
        CoreError::InvalidIdentity {
            reason: reason.into(),
        }
    }

    /// Returns the failure kind an action may accept, if any.
    ///
    /// Only transition failures carry an acceptable kind; identity,
    /// configuration and backend errors are always fatal.
    pub fn failure_kind(&self) -> Option<&str> {
        match self {
            CoreError::Transition(failure) => Some(&failure.kind),
            _ => None,
        }
    }

    /// Returns true for a missing instance.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CoreError::NotFound { .. })
    }

    /// Returns an error code suitable for callers.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::Configuration { .. } => "CONFIGURATION",
            CoreError::InvalidIdentity { .. } => "INVALID_IDENTITY",
            CoreError::NotFound { .. } => "NOT_FOUND",
            CoreError::UnknownMachine { .. } => "MACHINE_NOT_FOUND",
            CoreError::UnknownAction { .. } => "ACTION_NOT_FOUND",
            CoreError::Transition(_) => "TRANSITION_FAILED",
            CoreError::Query(e) => e.error_code(),
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_kind_only_for_transitions() {
        let err = CoreError::from(TransitionFailure::new("out_of_stock", "no items left"));
        assert_eq!(err.failure_kind(), Some("out_of_stock"));
        assert_eq!(err.to_string(), "transition failed: out_of_stock: no items left");

        let err = CoreError::invalid_identity("empty ID");
        assert_eq!(err.failure_kind(), None);
        assert_eq!(err.error_code(), "INVALID_IDENTITY");
    }
}
