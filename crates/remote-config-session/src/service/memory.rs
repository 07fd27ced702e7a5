//! In-memory configuration engine.

use std::{
    collections::HashMap,
    sync::{
        Arc, RwLock,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use remote_config_core::{
    BusinessError, ClientPool, Configuration, MutationError, RawData, RawDataUpdate, RemoteContext,
    SessionError, SessionId, SessionService, SessionState,
    model::{AttributeKind, ExplainQuestion, Explanation, ExplicitDecision},
};
use uuid::Uuid;

/// Sessions kept by one engine endpoint.
///
/// Data is lost on drop.
pub struct MemoryEngine {
    base: RawData,
    sessions: RwLock<HashMap<SessionId, RawData>>,
    creates: AtomicUsize,
    closes: AtomicUsize,
}

impl MemoryEngine {
    /// Create an engine whose sessions start from `base`.
    #[must_use]
    pub fn new(base: RawData) -> Self {
        Self {
            base,
            sessions: RwLock::new(HashMap::new()),
            creates: AtomicUsize::new(0),
            closes: AtomicUsize::new(0),
        }
    }

    /// Forget a session, as if it timed out on the server.
    pub fn expire(&self, id: SessionId) -> bool {
        self.sessions
            .write()
            .is_ok_and(|mut sessions| sessions.remove(&id).is_some())
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().map_or(0, |sessions| sessions.len())
    }

    /// Number of `create_session` calls, including failed ones.
    #[must_use]
    pub fn create_count(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    fn load(&self, id: Option<SessionId>) -> Result<RawData, SessionError> {
        let id = id.ok_or(SessionError::SessionNotFound)?;
        self.sessions
            .read()
            .map_err(|e| SessionError::Transport(e.to_string()))?
            .get(&id)
            .cloned()
            .ok_or(SessionError::SessionNotFound)
    }

    fn save(&self, id: SessionId, raw: RawData) -> Result<(), SessionError> {
        self.sessions
            .write()
            .map_err(|e| SessionError::Transport(e.to_string()))?
            .insert(id, raw);
        Ok(())
    }

    /// Validate and apply decisions, then recompute satisfaction.
    fn decide(raw: &RawData, decisions: &[ExplicitDecision]) -> Result<RawData, BusinessError> {
        for decision in decisions {
            let attribute = decision.attribute();
            let meta = raw
                .meta(attribute)
                .ok_or_else(|| BusinessError::AttributeNotFound(attribute.clone()))?;
            match decision {
                ExplicitDecision::Scalar { .. } if meta.kind == AttributeKind::Choice => {
                    return Err(BusinessError::Other(format!(
                        "{attribute} expects a choice decision"
                    )));
                }
                ExplicitDecision::Choice { .. } if meta.kind != AttributeKind::Choice => {
                    return Err(BusinessError::Other(format!(
                        "{attribute} expects a scalar decision"
                    )));
                }
                ExplicitDecision::Choice {
                    value,
                    state: Some(_),
                    ..
                } => {
                    let allowed = raw.consequence(attribute).is_none_or(|c| {
                        c.possible_values.is_empty() || c.possible_values.contains(value)
                    });
                    if !allowed {
                        return Err(BusinessError::Conflict {
                            attribute: attribute.clone(),
                            causes: raw
                                .explicit_decisions()
                                .into_iter()
                                .filter(|d| d.attribute() != attribute)
                                .collect(),
                        });
                    }
                }
                ExplicitDecision::Scalar { .. } | ExplicitDecision::Choice { .. } => {}
            }
        }
        Ok(Self::settle(&raw.merge(&RawDataUpdate::from_decisions(decisions))))
    }

    /// Satisfied iff every required attribute holds a decision.
    fn settle(raw: &RawData) -> RawData {
        let satisfied = raw
            .meta_entries()
            .filter(|(_, meta)| meta.required)
            .all(|(id, _)| raw.decision(id).is_some());
        raw.merge(&RawDataUpdate::default().with_satisfied(satisfied))
    }
}

fn next_state(state: &SessionState, raw: RawData) -> SessionState {
    state.with_configuration(Arc::new(state.configuration.replace_raw(raw)))
}

/// [`SessionService`] backed by in-process engines, one per base URL.
///
/// Useful for development and tests.
pub struct MemoryService {
    engines: Arc<ClientPool<MemoryEngine>>,
}

impl MemoryService {
    /// Every base URL gets its own engine seeded with `base`.
    #[must_use]
    pub fn new(base: RawData) -> Self {
        Self::with_pool(Arc::new(ClientPool::new(move |_| MemoryEngine::new(base.clone()))))
    }

    /// Use an existing engine pool.
    #[must_use]
    pub const fn with_pool(engines: Arc<ClientPool<MemoryEngine>>) -> Self {
        Self { engines }
    }

    /// Engine serving `base_url`.
    #[must_use]
    pub fn engine(&self, base_url: &str) -> Arc<MemoryEngine> {
        self.engines.get(base_url)
    }

    fn engine_for(&self, state: &SessionState) -> Arc<MemoryEngine> {
        self.engine(&state.context.base_url)
    }
}

#[async_trait]
impl SessionService for MemoryService {
    async fn create_session(
        &self,
        context: &RemoteContext,
        decisions: &[ExplicitDecision],
    ) -> Result<SessionState, SessionError> {
        let engine = self.engine(&context.base_url);
        engine.creates.fetch_add(1, Ordering::SeqCst);

        let raw = MemoryEngine::decide(&MemoryEngine::settle(&engine.base), decisions)?;
        let id = Uuid::new_v4();
        engine.save(id, raw.clone())?;
        tracing::debug!(
            session_id = %id,
            model_id = %context.model_id,
            "created in-memory session"
        );

        Ok(SessionState::new(
            id,
            Arc::new(context.clone()),
            Configuration::from_raw(raw),
        ))
    }

    async fn close_session(&self, state: &SessionState) -> Result<(), SessionError> {
        let engine = self.engine_for(state);
        engine.closes.fetch_add(1, Ordering::SeqCst);
        let id = state.session_id.ok_or(SessionError::SessionNotFound)?;
        if engine.expire(id) {
            Ok(())
        } else {
            Err(SessionError::SessionNotFound)
        }
    }

    async fn make_decisions(
        &self,
        state: &SessionState,
        decisions: &[ExplicitDecision],
    ) -> Result<SessionState, MutationError> {
        let engine = self.engine_for(state);
        let raw = engine.load(state.session_id)?;
        let raw = MemoryEngine::decide(&raw, decisions)?;
        if let Some(id) = state.session_id {
            engine.save(id, raw.clone())?;
        }
        Ok(next_state(state, raw))
    }

    async fn reset(&self, state: &SessionState) -> Result<SessionState, MutationError> {
        let engine = self.engine_for(state);
        engine.load(state.session_id)?;
        let raw = MemoryEngine::settle(&engine.base);
        if let Some(id) = state.session_id {
            engine.save(id, raw.clone())?;
        }
        Ok(next_state(state, raw))
    }

    async fn explain(
        &self,
        state: &SessionState,
        question: &ExplainQuestion,
    ) -> Result<Explanation, SessionError> {
        let raw = self.engine_for(state).load(state.session_id)?;
        if raw.meta(&question.attribute).is_none() {
            return Err(BusinessError::AttributeNotFound(question.attribute.clone()).into());
        }
        Ok(Explanation {
            attribute: question.attribute.clone(),
            causes: raw
                .explicit_decisions()
                .into_iter()
                .filter(|d| d.attribute() != &question.attribute)
                .collect(),
        })
    }
}
