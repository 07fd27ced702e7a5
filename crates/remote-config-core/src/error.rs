//! Error taxonomy shared by the service boundary and the scheduler.

use thiserror::Error;

use crate::{
    model::{AttributeId, ExplicitDecision},
    session::SessionState,
};

/// Structured failure reported by the configuration engine.
///
/// Passed through verbatim to the caller whose operation failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BusinessError {
    #[error("Decision on {attribute} conflicts with {} other decision(s)", .causes.len())]
    Conflict {
        attribute: AttributeId,
        causes: Vec<ExplicitDecision>,
    },
    #[error("Attribute not found: {0}")]
    AttributeNotFound(AttributeId),
    #[error("Model is not feasible")]
    ModelNotFeasible,
    #[error("{0}")]
    Other(String),
}

/// Error surfaced to callers of a session operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// The remote session expired or never existed.
    #[error("Session not found")]
    SessionNotFound,
    #[error(transparent)]
    Business(#[from] BusinessError),
    /// Connection failure or malformed response.
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Operation cancelled")]
    Cancelled,
    /// Operation submitted after shutdown.
    #[error("Session manager is shut down")]
    ShutDown,
}

impl SessionError {
    #[must_use]
    pub const fn is_session_not_found(&self) -> bool {
        matches!(self, Self::SessionNotFound)
    }
}

/// Failure of a state-mutating operation.
///
/// Some failures still leave the remote session in a valid new state; that
/// state travels along so the scheduler can adopt it.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct MutationError {
    pub error: SessionError,
    pub state: Option<SessionState>,
}

impl MutationError {
    #[must_use]
    pub const fn with_state(error: SessionError, state: SessionState) -> Self {
        Self {
            error,
            state: Some(state),
        }
    }
}

impl From<SessionError> for MutationError {
    fn from(error: SessionError) -> Self {
        Self { error, state: None }
    }
}

impl From<BusinessError> for MutationError {
    fn from(error: BusinessError) -> Self {
        SessionError::from(error).into()
    }
}
