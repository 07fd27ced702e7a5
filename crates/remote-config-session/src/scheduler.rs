//! Work scheduler and session-recovery state machine.
//!
//! The scheduler owns the queue, the running set, the attempt counters and
//! the confirmed session state. All of it lives inside one actor task and is
//! only touched from its command loop, so none of it is locked. Attempts run
//! as separate tasks and report back through the same command channel.
//!
//! ```text
//!              session not found
//!   Processing ─────────────────────▶ RestoringSession
//!       ▲                                   │
//!       └───────── recreated / failed ──────┘
//!
//!   any phase ── shutdown ──▶ ShutDown
//! ```

use std::{
    collections::{HashMap, VecDeque},
    sync::Arc,
};

use futures::stream::BoxStream;
use remote_config_core::{MutationError, SessionError, SessionService, SessionState, overlay};
use tokio::{
    sync::mpsc::{self, error::SendError},
    task::AbortHandle,
};
use tokio_util::sync::CancellationToken;

use crate::{
    completion::{Completion, Promise, Settle},
    config::SchedulerConfig,
    transitions::{Resolution, Transition, TransitionStore},
    work::{Delivery, QueueInfo, WorkId, WorkItem, WorkKind},
};

/// Scheduler phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Running queued work against the confirmed session.
    Processing,
    /// Recreating an expired remote session; nothing new is started.
    RestoringSession,
    /// Terminal.
    ShutDown,
}

enum Command {
    Submit(WorkItem),
    Shutdown,
    /// A caller cancelled an item; purge it.
    Wake,
    Finished {
        id: WorkId,
        attempt: u32,
        outcome: Outcome,
    },
    Restored {
        epoch: u64,
        result: Result<SessionState, SessionError>,
    },
}

enum Outcome {
    Mutated(Result<(SessionState, Delivery), MutationError>),
    Preserved(Result<Delivery, SessionError>),
}

struct RunningAttempt {
    attempt: u32,
    handle: AbortHandle,
}

/// Caller notification held back until its transition is published.
enum Settlement {
    Deliver(Delivery),
    Reject(Arc<dyn Settle>, SessionError),
}

/// Handle to a running scheduler.
///
/// Dropping every handle shuts the scheduler down once in-flight attempts
/// have reported back.
pub struct Scheduler {
    commands: mpsc::UnboundedSender<Command>,
    store: Arc<TransitionStore>,
}

impl Scheduler {
    /// Start a scheduler around an established session.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn spawn<S>(service: Arc<S>, initial: SessionState, config: SchedulerConfig) -> Self
    where
        S: SessionService + 'static,
    {
        let (tx, rx) = mpsc::unbounded_channel();
        let store = Arc::new(TransitionStore::new(
            Transition::idle(initial.clone()),
            config.transition_capacity,
        ));
        let engine = Engine {
            service,
            config,
            phase: Phase::Processing,
            session: initial,
            queue: VecDeque::new(),
            attempts: HashMap::new(),
            running: HashMap::new(),
            restore_epoch: 0,
            restoring: None,
            commands: tx.downgrade(),
            store: Arc::clone(&store),
            resolutions: Vec::new(),
            settlements: Vec::new(),
        };
        tokio::spawn(engine.run(rx));
        Self {
            commands: tx,
            store,
        }
    }

    /// Append an item to the queue.
    ///
    /// After shutdown the item is rejected immediately instead.
    pub fn submit(&self, item: WorkItem) {
        if let Err(SendError(Command::Submit(item))) = self.commands.send(Command::Submit(item)) {
            tracing::debug!(work_id = %item.id(), "rejecting work submitted after shutdown");
            item.reject(SessionError::ShutDown);
        }
    }

    /// Cancel everything and close the remote session.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Wait until the work queued before this call has drained.
    ///
    /// Resolves with the number of other items still queued when it runs.
    pub fn schedule_task(&self, token: CancellationToken) -> Completion<usize> {
        if token.is_cancelled() {
            let (promise, completion) = Promise::pair();
            promise.reject(SessionError::Cancelled);
            return completion;
        }
        let (item, completion) = WorkItem::preserving(|_state, info: QueueInfo| async move {
            Ok(info.queue_length.saturating_sub(1))
        });
        self.submit(item.with_cancellation(token));
        completion
    }

    /// Latest transition, then every following one.
    #[must_use]
    pub fn subscribe(&self) -> BoxStream<'static, Transition> {
        self.store.latest_plus_stream()
    }

    #[must_use]
    pub fn latest(&self) -> Transition {
        self.store.latest()
    }
}

struct Engine<S> {
    service: Arc<S>,
    config: SchedulerConfig,
    phase: Phase,
    session: SessionState,
    queue: VecDeque<WorkItem>,
    attempts: HashMap<WorkId, u32>,
    running: HashMap<WorkId, RunningAttempt>,
    restore_epoch: u64,
    restoring: Option<AbortHandle>,
    commands: mpsc::WeakUnboundedSender<Command>,
    store: Arc<TransitionStore>,
    /// Resolutions produced since the last published transition.
    resolutions: Vec<Resolution>,
    /// Caller notifications for those resolutions.
    settlements: Vec<Settlement>,
}

impl<S> Engine<S>
where
    S: SessionService + 'static,
{
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            if self.handle(command) {
                self.publish();
            }
            if self.phase == Phase::ShutDown {
                break;
            }
        }

        if self.phase != Phase::ShutDown {
            tracing::debug!("all scheduler handles dropped");
            self.enter_shut_down();
            self.publish();
        }

        rx.close();
        while let Ok(command) = rx.try_recv() {
            if let Command::Submit(item) = command {
                item.reject(SessionError::ShutDown);
            }
        }
    }

    /// Apply one command; `false` if it was stale and changed nothing.
    fn handle(&mut self, command: Command) -> bool {
        match command {
            Command::Submit(item) => {
                self.enqueue(item);
                self.schedule();
                true
            }
            Command::Shutdown => {
                self.enter_shut_down();
                true
            }
            Command::Wake => {
                self.schedule();
                true
            }
            Command::Finished {
                id,
                attempt,
                outcome,
            } => self.on_finished(id, attempt, outcome),
            Command::Restored { epoch, result } => self.on_restored(epoch, result),
        }
    }

    /// Publish the current transition, then settle the callers it resolved.
    ///
    /// A caller woken by its completion always observes the state its
    /// operation produced through [`Scheduler::latest`].
    fn publish(&mut self) {
        let view = overlay(
            &self.session.configuration,
            self.queue.iter().filter_map(WorkItem::effect),
        );
        self.store.push(Transition {
            phase: self.phase,
            session: self.session.clone(),
            view,
            resolutions: std::mem::take(&mut self.resolutions),
            pending: self.queue.len(),
        });
        for settlement in std::mem::take(&mut self.settlements) {
            match settlement {
                Settlement::Deliver(delivery) => {
                    if !delivery() {
                        tracing::debug!("dropping result for already settled caller");
                    }
                }
                Settlement::Reject(settle, error) => {
                    settle.reject(error);
                }
            }
        }
    }

    fn enqueue(&mut self, item: WorkItem) {
        if let Some(token) = item.cancellation().cloned() {
            if token.is_cancelled() {
                self.settle_rejected(&item, SessionError::Cancelled);
                return;
            }
            self.watch_cancellation(item.id(), token, Arc::clone(&item.settle));
        }
        tracing::debug!(
            work_id = %item.id(),
            mutating = item.is_mutating(),
            queued = self.queue.len(),
            "work submitted"
        );
        self.queue.push_back(item);
    }

    /// Reject the item as soon as its token fires, then wake the loop so it
    /// is purged before anything runs it again.
    fn watch_cancellation(&self, id: WorkId, token: CancellationToken, settle: Arc<dyn Settle>) {
        let commands = self.commands.clone();
        let settled = settle.settled();
        tokio::spawn(async move {
            tokio::select! {
                () = token.cancelled() => {
                    if settle.reject(SessionError::Cancelled) {
                        tracing::debug!(work_id = %id, "work cancelled by caller");
                        if let Some(tx) = commands.upgrade() {
                            let _ = tx.send(Command::Wake);
                        }
                    }
                }
                () = settled.cancelled() => {}
            }
        });
    }

    /// Drop queued items that were settled from outside and are not running.
    fn purge_settled(&mut self) {
        let running = &self.running;
        let mut purged = Vec::new();
        self.queue.retain(|item| {
            let stale = item.is_settled() && !running.contains_key(&item.id());
            if stale {
                purged.push(item.id());
            }
            !stale
        });
        for id in purged {
            self.attempts.remove(&id);
            self.resolutions.push(Resolution {
                id,
                outcome: Err(SessionError::Cancelled),
            });
        }
    }

    fn runnable_count(&self) -> usize {
        match self.queue.front() {
            None => 0,
            Some(head) if head.is_mutating() => 1,
            Some(_) => self.queue.iter().take_while(|item| !item.is_mutating()).count(),
        }
    }

    /// Scheduling pass: start every runnable item that is not running yet.
    fn schedule(&mut self) {
        if self.phase == Phase::ShutDown {
            return;
        }
        self.purge_settled();
        if self.phase != Phase::Processing {
            return;
        }

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        let runnable_count = self.runnable_count();
        let info = QueueInfo {
            queue_length: self.queue.len(),
            runnable_count,
        };
        for index in 0..runnable_count {
            let id = self.queue[index].id();
            if self.running.contains_key(&id) {
                continue;
            }
            let attempt = {
                let counter = self.attempts.entry(id).or_insert(0);
                *counter += 1;
                *counter
            };
            self.start(index, attempt, info, commands.clone());
        }
    }

    fn start(
        &mut self,
        index: usize,
        attempt: u32,
        info: QueueInfo,
        commands: mpsc::UnboundedSender<Command>,
    ) {
        let item = &self.queue[index];
        let id = item.id();
        let session = self.session.clone();
        tracing::debug!(
            work_id = %id,
            attempt,
            session_id = ?session.session_id,
            mutating = item.is_mutating(),
            "starting attempt"
        );

        let handle = match &item.kind {
            WorkKind::Mutating { run, .. } => {
                let pending = run(session, info);
                tokio::spawn(async move {
                    let outcome = Outcome::Mutated(pending.await);
                    let _ = commands.send(Command::Finished {
                        id,
                        attempt,
                        outcome,
                    });
                })
            }
            WorkKind::Preserving { run } => {
                let pending = run(session, info);
                tokio::spawn(async move {
                    let outcome = Outcome::Preserved(pending.await);
                    let _ = commands.send(Command::Finished {
                        id,
                        attempt,
                        outcome,
                    });
                })
            }
        };
        self.running.insert(
            id,
            RunningAttempt {
                attempt,
                handle: handle.abort_handle(),
            },
        );
    }

    fn on_finished(&mut self, id: WorkId, attempt: u32, outcome: Outcome) -> bool {
        match self.running.get(&id) {
            Some(current) if current.attempt == attempt => {}
            _ => {
                tracing::debug!(work_id = %id, attempt, "ignoring superseded attempt");
                return false;
            }
        }
        self.running.remove(&id);

        match outcome {
            Outcome::Mutated(Err(MutationError {
                error: SessionError::SessionNotFound,
                state,
            })) => {
                self.session_expired(id, state);
                return true;
            }
            Outcome::Preserved(Err(SessionError::SessionNotFound)) => {
                self.session_expired(id, None);
                return true;
            }
            Outcome::Mutated(Ok((state, delivery))) => {
                self.session = state;
                self.complete(id, Ok(delivery));
            }
            Outcome::Mutated(Err(MutationError { error, state })) => {
                if let Some(state) = state {
                    self.session = state;
                }
                self.complete(id, Err(error));
            }
            Outcome::Preserved(result) => self.complete(id, result),
        }

        self.schedule();
        true
    }

    fn remove_item(&mut self, id: WorkId) -> Option<WorkItem> {
        self.attempts.remove(&id);
        let index = self.queue.iter().position(|item| item.id() == id)?;
        self.queue.remove(index)
    }

    fn complete(&mut self, id: WorkId, result: Result<Delivery, SessionError>) {
        let Some(item) = self.remove_item(id) else {
            return;
        };
        match result {
            Ok(delivery) => {
                let outcome = if item.is_settled() {
                    Err(SessionError::Cancelled)
                } else {
                    Ok(())
                };
                tracing::debug!(work_id = %id, "work completed");
                self.resolutions.push(Resolution { id, outcome });
                self.settlements.push(Settlement::Deliver(delivery));
            }
            Err(error) => {
                tracing::debug!(work_id = %id, "work failed: {error}");
                self.settle_rejected(&item, error);
            }
        }
    }

    fn settle_rejected(&mut self, item: &WorkItem, error: SessionError) {
        let outcome = if item.is_settled() {
            Err(SessionError::Cancelled)
        } else {
            Err(error.clone())
        };
        self.resolutions.push(Resolution {
            id: item.id(),
            outcome,
        });
        self.settlements
            .push(Settlement::Reject(Arc::clone(&item.settle), error));
    }

    fn fail_where(&mut self, error: &SessionError, doomed: impl Fn(&Self, &WorkItem) -> bool) {
        let ids: Vec<WorkId> = self
            .queue
            .iter()
            .filter(|item| doomed(self, item))
            .map(WorkItem::id)
            .collect();
        for id in ids {
            if let Some(item) = self.remove_item(id) {
                self.settle_rejected(&item, error.clone());
            }
        }
    }

    fn session_expired(&mut self, id: WorkId, state: Option<SessionState>) {
        tracing::info!(
            work_id = %id,
            session_id = ?self.session.session_id,
            "remote session expired"
        );
        for (other, running) in self.running.drain() {
            tracing::debug!(work_id = %other, "discarding running attempt");
            running.handle.abort();
        }
        if let Some(state) = state {
            self.session = state;
        }
        self.session = self.session.without_session();
        self.enter_restoring();
    }

    fn enter_restoring(&mut self) {
        self.phase = Phase::RestoringSession;

        let limit = self.config.retry_limit;
        self.fail_where(&SessionError::SessionNotFound, |engine, item| {
            let exhausted = engine.attempts.get(&item.id()).copied().unwrap_or(0) > limit;
            if exhausted {
                tracing::warn!(work_id = %item.id(), "retries exhausted after session loss");
            }
            exhausted
        });

        let Some(commands) = self.commands.upgrade() else {
            return;
        };
        self.restore_epoch += 1;
        let epoch = self.restore_epoch;
        let service = Arc::clone(&self.service);
        let context = Arc::clone(&self.session.context);
        let decisions = self.session.confirmed_decisions();
        tracing::info!(epoch, decisions = decisions.len(), "recreating remote session");

        let handle = tokio::spawn(async move {
            let result = service.create_session(&context, &decisions).await;
            let _ = commands.send(Command::Restored { epoch, result });
        });
        self.restoring = Some(handle.abort_handle());
    }

    fn on_restored(&mut self, epoch: u64, result: Result<SessionState, SessionError>) -> bool {
        if self.phase != Phase::RestoringSession || epoch != self.restore_epoch {
            return false;
        }
        self.restoring = None;

        match result {
            Ok(state) => {
                tracing::info!(session_id = ?state.session_id, "remote session recreated");
                self.session = state;
            }
            Err(e) => {
                tracing::warn!("failed to recreate remote session: {e}");
                self.fail_where(&SessionError::SessionNotFound, |_, item| {
                    item.cancels_on_failed_recovery()
                });
            }
        }

        self.phase = Phase::Processing;
        self.schedule();
        true
    }

    fn enter_shut_down(&mut self) {
        tracing::info!(
            pending = self.queue.len(),
            running = self.running.len(),
            "shutting down scheduler"
        );
        self.phase = Phase::ShutDown;

        for (_, running) in self.running.drain() {
            running.handle.abort();
        }
        if let Some(handle) = self.restoring.take() {
            handle.abort();
        }
        while let Some(item) = self.queue.pop_front() {
            self.settle_rejected(&item, SessionError::Cancelled);
        }
        self.attempts.clear();

        if self.session.session_id.is_some() {
            let service = Arc::clone(&self.service);
            let state = self.session.clone();
            tokio::spawn(async move {
                if let Err(e) = service.close_session(&state).await {
                    tracing::debug!("ignoring close-session failure: {e}");
                }
            });
        }
    }
}

#[cfg(test)]
mod tests;
