use thiserror::Error;

use crate::workstream::{TransitionError, WorkstreamId};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DomainError {
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("cannot roll back {requested} step(s); only {available} snapshot(s) available")]
    InsufficientSnapshots { requested: usize, available: usize },
    #[error("rollback depth must be at least 1")]
    InvalidRollbackDepth,
    #[error("unknown workstream `{0}`")]
    UnknownWorkstream(WorkstreamId),
    #[error("domain invariant violation: {0}")]
    InvariantViolation(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ApplicationError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("classification failure: {0}")]
    Classification(String),
    #[error("agent `{intent_type}` failed: {message}")]
    Agent { intent_type: String, message: String },
    #[error("no agent registered for intent `{0}`")]
    UnknownAgent(String),
    #[error("persistence failure: {0}")]
    Persistence(String),
    #[error("configuration failure: {0}")]
    Configuration(String),
}

impl ApplicationError {
    /// Text safe to show the end user in an `Info` action.
    pub fn user_message(&self) -> String {
        match self {
            Self::Domain(DomainError::InsufficientSnapshots { .. })
            | Self::Domain(DomainError::InvalidRollbackDepth) => {
                "There is nothing further back to undo.".to_owned()
            }
            Self::Domain(_) => "That request could not be applied to the conversation.".to_owned(),
            Self::Classification(_) => {
                "I could not understand that message. Could you rephrase it?".to_owned()
            }
            Self::Agent { intent_type, .. } => format!(
                "Something went wrong while handling your {intent_type} request. Please try again."
            ),
            Self::UnknownAgent(intent_type) => {
                format!("I can't help with {intent_type} requests yet.")
            }
            Self::Persistence(_) => {
                "The conversation could not be saved right now. Please retry shortly.".to_owned()
            }
            Self::Configuration(_) => "An unexpected internal error occurred.".to_owned(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Agent { .. } | Self::Persistence(_) | Self::Classification(_))
    }
}
