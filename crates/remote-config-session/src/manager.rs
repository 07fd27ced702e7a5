//! Session manager for one remote configuration session.

use std::sync::Arc;

use futures::{StreamExt, stream::BoxStream};
use remote_config_core::{
    Configuration, ConfigurationChanges, RemoteContext, SessionError, SessionService, SessionState,
    StoredSession,
    model::{ExplainQuestion, Explanation, ExplicitDecision},
};
use tokio::task::AbortHandle;
use tokio_util::sync::CancellationToken;

use crate::{
    config::SchedulerConfig,
    notify::{ChangeNotifier, ListenerId},
    scheduler::{Phase, Scheduler},
    transitions::Transition,
    work::{QueueInfo, WorkItem},
};

/// Caller-facing handle to a remote configuration session.
///
/// Every operation is queued on the scheduler, so decisions apply in call
/// order and an expired remote session is recreated transparently.
/// Dropping the manager shuts the session down.
pub struct SessionManager<S> {
    service: Arc<S>,
    scheduler: Scheduler,
    notifier: Arc<ChangeNotifier>,
    forwarder: AbortHandle,
}

impl<S> SessionManager<S>
where
    S: SessionService + 'static,
{
    /// Open a new session.
    ///
    /// # Errors
    /// Returns error if the remote session cannot be created.
    pub async fn connect(
        service: Arc<S>,
        context: RemoteContext,
        config: SchedulerConfig,
    ) -> Result<Self, SessionError> {
        let initial = service.create_session(&context, &[]).await?;
        tracing::info!(
            session_id = ?initial.session_id,
            model_id = %context.model_id,
            "session opened"
        );
        Ok(Self::start(service, initial, config))
    }

    /// Open a session reproducing a stored one.
    ///
    /// # Errors
    /// Returns error if the remote session cannot be created or a stored
    /// decision is rejected.
    pub async fn restore(
        service: Arc<S>,
        stored: StoredSession,
        config: SchedulerConfig,
    ) -> Result<Self, SessionError> {
        let initial = service
            .create_session(&stored.context, &stored.decisions)
            .await?;
        tracing::info!(
            session_id = ?initial.session_id,
            decisions = stored.decisions.len(),
            "session restored"
        );
        Ok(Self::start(service, initial, config))
    }

    fn start(service: Arc<S>, initial: SessionState, config: SchedulerConfig) -> Self {
        let scheduler = Scheduler::spawn(Arc::clone(&service), initial, config);
        let notifier = Arc::new(ChangeNotifier::new());
        notifier.update(Arc::clone(&scheduler.latest().session.configuration));

        let mut transitions = scheduler.subscribe();
        let forwarder = tokio::spawn({
            let notifier = Arc::clone(&notifier);
            async move {
                while let Some(transition) = transitions.next().await {
                    notifier.update(Arc::clone(&transition.session.configuration));
                    if transition.phase == Phase::ShutDown {
                        break;
                    }
                }
            }
        });

        Self {
            service,
            scheduler,
            notifier,
            forwarder: forwarder.abort_handle(),
        }
    }

    /// Apply decisions; resolves with the confirmed configuration.
    ///
    /// # Errors
    /// Returns the engine's business error, or a lifecycle error if the
    /// session shut down first.
    pub async fn make_decisions(
        &self,
        decisions: Vec<ExplicitDecision>,
    ) -> Result<Arc<Configuration>, SessionError> {
        self.make_decisions_inner(decisions, None).await
    }

    /// Like [`make_decisions`](Self::make_decisions), abandoned when `token`
    /// is cancelled.
    ///
    /// # Errors
    /// Returns [`SessionError::Cancelled`] if `token` fires while queued.
    pub async fn make_decisions_with(
        &self,
        decisions: Vec<ExplicitDecision>,
        token: CancellationToken,
    ) -> Result<Arc<Configuration>, SessionError> {
        self.make_decisions_inner(decisions, Some(token)).await
    }

    async fn make_decisions_inner(
        &self,
        decisions: Vec<ExplicitDecision>,
        token: Option<CancellationToken>,
    ) -> Result<Arc<Configuration>, SessionError> {
        let decisions: Arc<[ExplicitDecision]> = decisions.into();
        let service = Arc::clone(&self.service);
        let predicted = Arc::clone(&decisions);

        let (item, completion) = WorkItem::mutating(move |state: SessionState, _: QueueInfo| {
            let service = Arc::clone(&service);
            let decisions = Arc::clone(&decisions);
            async move {
                let next = service.make_decisions(&state, &decisions).await?;
                let configuration = Arc::clone(&next.configuration);
                Ok((next, configuration))
            }
        });
        let mut item = item.with_effect(move |cfg| cfg.with_decisions(&predicted));
        if let Some(token) = token {
            item = item.with_cancellation(token);
        }
        self.scheduler.submit(item);
        completion.await
    }

    /// Drop every explicit decision.
    ///
    /// # Errors
    /// Returns error if the engine rejects the reset.
    pub async fn reset(&self) -> Result<Arc<Configuration>, SessionError> {
        let service = Arc::clone(&self.service);
        let (item, completion) = WorkItem::mutating(move |state: SessionState, _: QueueInfo| {
            let service = Arc::clone(&service);
            async move {
                let next = service.reset(&state).await?;
                let configuration = Arc::clone(&next.configuration);
                Ok((next, configuration))
            }
        });
        self.scheduler
            .submit(item.with_effect(Configuration::without_explicit_decisions));
        completion.await
    }

    /// Ask the engine why an attribute holds its state.
    ///
    /// # Errors
    /// Returns error if the attribute is unknown.
    pub async fn explain(&self, question: ExplainQuestion) -> Result<Explanation, SessionError> {
        let service = Arc::clone(&self.service);
        let question = Arc::new(question);
        let (item, completion) = WorkItem::preserving(move |state: SessionState, _: QueueInfo| {
            let service = Arc::clone(&service);
            let question = Arc::clone(&question);
            async move { service.explain(&state, &question).await }
        });
        self.scheduler.submit(item);
        completion.await
    }

    /// Snapshot the session once all earlier work has settled.
    ///
    /// # Errors
    /// Returns a lifecycle error if the session shut down first.
    pub async fn store(&self) -> Result<StoredSession, SessionError> {
        let (item, completion) =
            WorkItem::preserving(|state: SessionState, _: QueueInfo| async move {
                Ok(state.store())
            });
        self.scheduler.submit(item);
        completion.await
    }

    /// Wait until work queued so far has drained.
    ///
    /// # Errors
    /// Returns [`SessionError::Cancelled`] if `token` is or becomes cancelled.
    pub async fn schedule_task(&self, token: CancellationToken) -> Result<usize, SessionError> {
        self.scheduler.schedule_task(token).await
    }

    /// Current view, including optimistic effects of pending work.
    #[must_use]
    pub fn configuration(&self) -> Arc<Configuration> {
        self.scheduler.latest().view
    }

    /// Last state confirmed by the engine.
    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.scheduler.latest().session
    }

    /// Latest transition, then every following one.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, Transition> {
        self.scheduler.subscribe()
    }

    pub fn add_change_listener(
        &self,
        listener: impl Fn(&ConfigurationChanges) + Send + Sync + 'static,
    ) -> ListenerId {
        self.notifier.add_change_listener(listener)
    }

    pub fn add_reset_listener(
        &self,
        listener: impl Fn(bool) + Send + Sync + 'static,
    ) -> ListenerId {
        self.notifier.add_reset_listener(listener)
    }

    pub fn remove_listener(&self, id: ListenerId) -> bool {
        self.notifier.remove_listener(id)
    }

    /// Cancel pending work and close the remote session.
    pub fn shutdown(&self) {
        self.scheduler.shutdown();
    }
}

impl<S> Drop for SessionManager<S> {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
