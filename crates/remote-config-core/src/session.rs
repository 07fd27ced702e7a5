//! Session state owned by the scheduler.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{RemoteContext, configuration::Configuration, model::ExplicitDecision, raw::RawData};

/// Remote session identifier.
pub type SessionId = Uuid;

/// Immutable snapshot of one remote session.
///
/// Replaced wholesale on every confirmed transition; cloning is cheap.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionState {
    pub session_id: Option<SessionId>,
    pub context: Arc<RemoteContext>,
    pub configuration: Arc<Configuration>,
}

impl SessionState {
    #[must_use]
    pub fn new(
        session_id: SessionId,
        context: Arc<RemoteContext>,
        configuration: Configuration,
    ) -> Self {
        Self {
            session_id: Some(session_id),
            context,
            configuration: Arc::new(configuration),
        }
    }

    /// Merged raw data behind the configuration.
    #[must_use]
    pub fn raw(&self) -> &RawData {
        self.configuration.raw()
    }

    /// Same state with the session id cleared and the context kept.
    #[must_use]
    pub fn without_session(&self) -> Self {
        Self {
            session_id: None,
            ..self.clone()
        }
    }

    #[must_use]
    pub fn with_configuration(&self, configuration: Arc<Configuration>) -> Self {
        Self {
            configuration,
            ..self.clone()
        }
    }

    /// Decisions needed to rebuild an equivalent remote session.
    #[must_use]
    pub fn confirmed_decisions(&self) -> Vec<ExplicitDecision> {
        self.configuration.explicit_decisions()
    }

    /// Context and decisions, enough to restore this session later.
    #[must_use]
    pub fn store(&self) -> StoredSession {
        StoredSession {
            context: RemoteContext::clone(&self.context),
            decisions: self.confirmed_decisions(),
        }
    }
}

/// Stored form of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSession {
    pub context: RemoteContext,
    pub decisions: Vec<ExplicitDecision>,
}
