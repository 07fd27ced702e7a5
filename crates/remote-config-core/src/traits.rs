//! Service boundary towards the remote configuration engine.

use async_trait::async_trait;

use crate::{
    RemoteContext,
    error::{MutationError, SessionError},
    model::{ExplainQuestion, Explanation, ExplicitDecision},
    session::SessionState,
};

/// Remote session service.
///
/// Implemented by the wire client. The scheduler treats the engine as an
/// opaque function from (session, operation) to (new session, result).
/// An expired or unknown session id must be reported as
/// [`SessionError::SessionNotFound`].
#[async_trait]
pub trait SessionService: Send + Sync {
    /// Create a session and apply `decisions` to reach an equivalent state.
    async fn create_session(
        &self,
        context: &RemoteContext,
        decisions: &[ExplicitDecision],
    ) -> Result<SessionState, SessionError>;

    /// Close a session. Best-effort; callers ignore the outcome.
    async fn close_session(&self, state: &SessionState) -> Result<(), SessionError>;

    /// Apply explicit decisions.
    async fn make_decisions(
        &self,
        state: &SessionState,
        decisions: &[ExplicitDecision],
    ) -> Result<SessionState, MutationError>;

    /// Drop every explicit decision.
    async fn reset(&self, state: &SessionState) -> Result<SessionState, MutationError>;

    /// Explain why an attribute holds its current state.
    async fn explain(
        &self,
        state: &SessionState,
        question: &ExplainQuestion,
    ) -> Result<Explanation, SessionError>;
}
