use std::{
    future::Future,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use futures::{StreamExt, stream::BoxStream};
use remote_config_core::{
    BusinessError, Configuration, RemoteContext, SessionState,
    model::{AttributeId, ExplainQuestion, Explanation, ExplicitDecision, ScalarValue},
};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};
use uuid::Uuid;

use super::*;

const WAIT: Duration = Duration::from_secs(2);

#[derive(Default)]
struct StubService {
    creates: Mutex<Vec<Vec<ExplicitDecision>>>,
    closes: AtomicUsize,
    fail_create: AtomicBool,
    /// Park `create_session` until `release` is notified.
    hold_create: AtomicBool,
    release: tokio::sync::Notify,
}

impl StubService {
    fn creates(&self) -> Vec<Vec<ExplicitDecision>> {
        self.creates.lock().unwrap().clone()
    }
}

#[async_trait]
impl SessionService for StubService {
    async fn create_session(
        &self,
        context: &RemoteContext,
        decisions: &[ExplicitDecision],
    ) -> Result<SessionState, SessionError> {
        self.creates.lock().unwrap().push(decisions.to_vec());
        if self.hold_create.load(Ordering::SeqCst) {
            self.release.notified().await;
        }
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(SessionError::Transport("engine unreachable".into()));
        }
        Ok(SessionState::new(
            Uuid::new_v4(),
            Arc::new(context.clone()),
            Configuration::default().with_decisions(decisions),
        ))
    }

    async fn close_session(&self, _state: &SessionState) -> Result<(), SessionError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Err(SessionError::Transport("close is best-effort".into()))
    }

    async fn make_decisions(
        &self,
        _state: &SessionState,
        _decisions: &[ExplicitDecision],
    ) -> Result<SessionState, MutationError> {
        Err(SessionError::Transport("unused".into()).into())
    }

    async fn reset(&self, _state: &SessionState) -> Result<SessionState, MutationError> {
        Err(SessionError::Transport("unused".into()).into())
    }

    async fn explain(
        &self,
        _state: &SessionState,
        question: &ExplainQuestion,
    ) -> Result<Explanation, SessionError> {
        Err(BusinessError::AttributeNotFound(question.attribute.clone()).into())
    }
}

/// Scripted outcome of one attempt.
enum Step {
    /// Succeed, setting the item's attribute to the value.
    Succeed(i64),
    Fail(SessionError),
    /// Fail, but still report a post-state with the attribute set.
    FailWithState(SessionError, i64),
}

/// One observed invocation of a `run` function.
#[derive(Debug, Clone)]
struct Started {
    label: &'static str,
    state: SessionState,
    info: QueueInfo,
}

fn set_attr(state: &SessionState, label: &str, value: i64) -> SessionState {
    let cfg = state
        .configuration
        .with_decisions(&[ExplicitDecision::set(label, ScalarValue::Int(value))]);
    state.with_configuration(Arc::new(cfg))
}

struct Harness {
    service: Arc<StubService>,
    scheduler: Scheduler,
    started_tx: mpsc::UnboundedSender<Started>,
    started: mpsc::UnboundedReceiver<Started>,
}

type Steps = mpsc::UnboundedSender<Step>;

impl Harness {
    fn new() -> Self {
        Self::with_initial(Configuration::default())
    }

    fn with_initial(configuration: Configuration) -> Self {
        let service = Arc::new(StubService::default());
        let initial = SessionState::new(
            Uuid::new_v4(),
            Arc::new(RemoteContext::new("mem://engine", "bike")),
            configuration,
        );
        let scheduler = Scheduler::spawn(Arc::clone(&service), initial, SchedulerConfig::default());
        let (started_tx, started) = mpsc::unbounded_channel();
        Self {
            service,
            scheduler,
            started_tx,
            started,
        }
    }

    fn script(
        &self,
        label: &'static str,
    ) -> (
        impl Fn(SessionState, QueueInfo) -> ScriptedRun + Send + Sync + 'static,
        Steps,
    ) {
        let (steps_tx, steps_rx) = mpsc::unbounded_channel::<Step>();
        let steps = Arc::new(tokio::sync::Mutex::new(steps_rx));
        let started = self.started_tx.clone();
        let run = move |state: SessionState, info: QueueInfo| ScriptedRun {
            label,
            state,
            info,
            started: started.clone(),
            steps: Arc::clone(&steps),
        };
        (run, steps_tx)
    }

    fn mutating(&self, label: &'static str) -> (WorkItem, Completion<i64>, Steps) {
        let (script, steps) = self.script(label);
        let (item, completion) = WorkItem::mutating(move |state, info| {
            let run = script(state, info);
            async move {
                let (state, step) = run.next().await;
                match step {
                    Step::Succeed(v) => Ok((set_attr(&state, label, v), v)),
                    Step::Fail(e) => Err(MutationError::from(e)),
                    Step::FailWithState(e, v) => {
                        Err(MutationError::with_state(e, set_attr(&state, label, v)))
                    }
                }
            }
        });
        (item, completion, steps)
    }

    fn preserving(&self, label: &'static str) -> (WorkItem, Completion<i64>, Steps) {
        let (script, steps) = self.script(label);
        let (item, completion) = WorkItem::preserving(move |state, info| {
            let run = script(state, info);
            async move {
                match run.next().await.1 {
                    Step::Succeed(v) => Ok(v),
                    Step::Fail(e) | Step::FailWithState(e, _) => Err(e),
                }
            }
        });
        (item, completion, steps)
    }

    async fn next_started(&mut self) -> Started {
        tokio::time::timeout(WAIT, self.started.recv())
            .await
            .expect("timed out waiting for an attempt")
            .expect("started channel closed")
    }

    async fn assert_nothing_started(&mut self) {
        tokio::time::sleep(Duration::from_millis(50)).await;
        if let Ok(started) = self.started.try_recv() {
            panic!("unexpected attempt of {}", started.label);
        }
    }

    /// Wait for a transition that is still current once reached.
    async fn wait_for(&self, pred: impl Fn(&Transition) -> bool) -> Transition {
        next_matching(&mut self.scheduler.subscribe(), pred).await
    }
}

async fn next_matching(
    stream: &mut BoxStream<'static, Transition>,
    pred: impl Fn(&Transition) -> bool,
) -> Transition {
    tokio::time::timeout(WAIT, async {
        while let Some(transition) = stream.next().await {
            if pred(&transition) {
                return transition;
            }
        }
        panic!("transition stream ended");
    })
    .await
    .expect("timed out waiting for transition")
}

struct ScriptedRun {
    label: &'static str,
    state: SessionState,
    info: QueueInfo,
    started: mpsc::UnboundedSender<Started>,
    steps: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Step>>>,
}

impl ScriptedRun {
    fn next(self) -> impl Future<Output = (SessionState, Step)> + Send {
        async move {
            let _ = self.started.send(Started {
                label: self.label,
                state: self.state.clone(),
                info: self.info,
            });
            let step = self
                .steps
                .lock()
                .await
                .recv()
                .await
                .unwrap_or(Step::Fail(SessionError::Transport("script ended".into())));
            (self.state, step)
        }
    }
}

fn decision_of(state: &SessionState, label: &str) -> Option<ExplicitDecision> {
    state
        .confirmed_decisions()
        .into_iter()
        .find(|d| d.attribute() == &AttributeId::new(label))
}

#[tokio::test]
async fn mutating_items_run_in_submission_order_against_latest_state() {
    let mut h = Harness::new();
    let (a, a_done, a_steps) = h.mutating("a");
    let (b, b_done, b_steps) = h.mutating("b");
    let (c, c_done, c_steps) = h.mutating("c");
    h.scheduler.submit(a);
    h.scheduler.submit(b);
    h.scheduler.submit(c);

    let started = h.next_started().await;
    assert_eq!(started.label, "a");
    assert_eq!(started.info.runnable_count, 1);
    h.assert_nothing_started().await;

    a_steps.send(Step::Succeed(1)).unwrap();
    let started = h.next_started().await;
    assert_eq!(started.label, "b");
    assert!(decision_of(&started.state, "a").is_some());

    b_steps
        .send(Step::Fail(BusinessError::ModelNotFeasible.into()))
        .unwrap();
    let started = h.next_started().await;
    assert_eq!(started.label, "c");
    assert!(decision_of(&started.state, "a").is_some());
    assert!(decision_of(&started.state, "b").is_none());

    c_steps.send(Step::Succeed(3)).unwrap();
    assert_eq!(assert_ok!(a_done.await), 1);
    assert_eq!(
        assert_err!(b_done.await),
        SessionError::Business(BusinessError::ModelNotFeasible)
    );
    assert_eq!(assert_ok!(c_done.await), 3);
}

#[tokio::test]
async fn failed_mutation_can_still_carry_post_state() {
    let mut h = Harness::new();
    let (a, a_done, a_steps) = h.mutating("a");
    let (b, _b_done, _b_steps) = h.mutating("b");
    h.scheduler.submit(a);
    h.scheduler.submit(b);

    h.next_started().await;
    a_steps
        .send(Step::FailWithState(BusinessError::Other("partial".into()).into(), 9))
        .unwrap();
    assert_err!(a_done.await);

    let started = h.next_started().await;
    assert_eq!(started.label, "b");
    assert!(decision_of(&started.state, "a").is_some());
}

#[tokio::test]
async fn preserving_prefix_runs_before_later_mutation() {
    let mut h = Harness::new();
    let (p1, p1_done, p1_steps) = h.preserving("p1");
    let (p2, p2_done, p2_steps) = h.preserving("p2");
    let (m, m_done, m_steps) = h.mutating("m");
    let (p3, p3_done, p3_steps) = h.preserving("p3");
    h.scheduler.submit(p1);
    h.scheduler.submit(p2);
    h.scheduler.submit(m);
    h.scheduler.submit(p3);

    let first = h.next_started().await;
    let second = h.next_started().await;
    let mut labels = [first.label, second.label];
    labels.sort_unstable();
    assert_eq!(labels, ["p1", "p2"]);
    h.assert_nothing_started().await;

    p2_steps.send(Step::Succeed(2)).unwrap();
    assert_eq!(assert_ok!(p2_done.await), 2);
    h.assert_nothing_started().await;

    p1_steps.send(Step::Succeed(1)).unwrap();
    assert_eq!(h.next_started().await.label, "m");
    h.assert_nothing_started().await;

    m_steps.send(Step::Succeed(5)).unwrap();
    let started = h.next_started().await;
    assert_eq!(started.label, "p3");
    assert!(decision_of(&started.state, "m").is_some());

    p3_steps.send(Step::Succeed(3)).unwrap();
    assert_eq!(assert_ok!(p1_done.await), 1);
    assert_eq!(assert_ok!(m_done.await), 5);
    assert_eq!(assert_ok!(p3_done.await), 3);
}

#[tokio::test]
async fn concurrent_preserving_items_resolve_their_own_handles() {
    let mut h = Harness::new();
    let (p1, p1_done, p1_steps) = h.preserving("p1");
    let (p2, p2_done, p2_steps) = h.preserving("p2");
    let (p3, p3_done, p3_steps) = h.preserving("p3");
    h.scheduler.submit(p1);
    h.scheduler.submit(p2);
    h.scheduler.submit(p3);
    for _ in 0..3 {
        h.next_started().await;
    }

    p3_steps.send(Step::Succeed(30)).unwrap();
    assert_eq!(assert_ok!(p3_done.await), 30);
    p1_steps.send(Step::Succeed(10)).unwrap();
    assert_eq!(assert_ok!(p1_done.await), 10);
    p2_steps.send(Step::Succeed(20)).unwrap();
    assert_eq!(assert_ok!(p2_done.await), 20);
}

#[tokio::test]
async fn mutation_without_effect_leaves_view_unchanged() {
    let mut h = Harness::with_initial(
        Configuration::default().with_decisions(&[ExplicitDecision::set("x", ScalarValue::Int(0))]),
    );
    let before = h.scheduler.latest().view;

    let (a, _a_done, _a_steps) = h.mutating("a");
    let id = a.id();
    h.scheduler.submit(a);
    h.next_started().await;

    let after = h.wait_for(|t| t.pending == 1).await;
    assert!(Arc::ptr_eq(&before, &after.view));
    assert!(after.resolutions.iter().all(|r| r.id != id));
}

#[tokio::test]
async fn optimistic_view_tracks_pending_mutations() {
    let mut h = Harness::new();
    let x_is_one = |cfg: &Configuration| {
        cfg.explicit_decisions()
            .contains(&ExplicitDecision::set("x", ScalarValue::Int(1)))
    };

    let (a, a_done, a_steps) = h.mutating("a");
    let (b, b_done, b_steps) = h.mutating("x");
    let b = b.with_effect(|cfg| {
        cfg.with_decisions(&[ExplicitDecision::set("x", ScalarValue::Int(1))])
    });
    h.scheduler.submit(a);
    h.next_started().await;
    h.scheduler.submit(b);

    let view = h.wait_for(|t| t.pending == 2).await;
    assert!(x_is_one(&view.view));
    assert!(!x_is_one(&view.session.configuration));

    a_steps
        .send(Step::Fail(BusinessError::ModelNotFeasible.into()))
        .unwrap();
    assert_err!(a_done.await);
    let view = h.wait_for(|t| t.pending == 1).await;
    assert!(x_is_one(&view.view));
    assert_eq!(h.next_started().await.label, "x");

    b_steps.send(Step::Succeed(1)).unwrap();
    assert_ok!(b_done.await);
    let done = h.wait_for(|t| t.pending == 0).await;
    assert!(x_is_one(&done.session.configuration));
    assert!(Arc::ptr_eq(&done.view, &done.session.configuration));
}

#[tokio::test]
async fn expired_session_is_recreated_with_confirmed_decisions() {
    let seat = ExplicitDecision::set("seat", ScalarValue::Int(2));
    let initial = Configuration::default().with_decisions(&[seat]);
    let mut h = Harness::with_initial(initial);
    let old_id = h.scheduler.latest().session.session_id;

    let (a, a_done, a_steps) = h.mutating("a");
    let (p, p_done, p_steps) = h.preserving("p");
    h.scheduler.submit(a);
    h.next_started().await;
    h.scheduler.submit(p);

    let mut transitions = h.scheduler.subscribe();
    a_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();
    let restoring = next_matching(&mut transitions, |t| t.phase == Phase::RestoringSession).await;
    assert!(restoring.session.session_id.is_none());
    assert_eq!(restoring.pending, 2);

    let retried = h.next_started().await;
    assert_eq!(retried.label, "a");
    assert!(retried.state.session_id.is_some());
    assert_ne!(retried.state.session_id, old_id);
    assert_eq!(
        h.service.creates(),
        vec![vec![ExplicitDecision::set("seat", ScalarValue::Int(2))]]
    );

    a_steps.send(Step::Succeed(1)).unwrap();
    assert_eq!(h.next_started().await.label, "p");
    p_steps.send(Step::Succeed(7)).unwrap();
    assert_ok!(a_done.await);
    assert_eq!(assert_ok!(p_done.await), 7);
    assert_eq!(h.service.creates().len(), 1);
}

#[tokio::test]
async fn running_siblings_are_discarded_and_retried_after_recovery() {
    let mut h = Harness::new();
    let (p1, p1_done, p1_steps) = h.preserving("p1");
    let (p2, p2_done, p2_steps) = h.preserving("p2");
    h.scheduler.submit(p1);
    h.scheduler.submit(p2);
    h.next_started().await;
    h.next_started().await;

    p1_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();

    // Both come back: p1 for its retry, p2 because its attempt was discarded.
    let a = h.next_started().await;
    let b = h.next_started().await;
    let mut labels = [a.label, b.label];
    labels.sort_unstable();
    assert_eq!(labels, ["p1", "p2"]);
    assert!(a.state.session_id.is_some() && b.state.session_id.is_some());

    p1_steps.send(Step::Succeed(1)).unwrap();
    p2_steps.send(Step::Succeed(2)).unwrap();
    assert_eq!(assert_ok!(p1_done.await), 1);
    assert_eq!(assert_ok!(p2_done.await), 2);
}

#[tokio::test]
async fn superseded_attempt_report_is_ignored() {
    let mut h = Harness::new();
    let (a, a_done, a_steps) = h.mutating("a");
    let id = a.id();
    h.scheduler.submit(a);
    h.next_started().await;
    a_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();
    h.next_started().await;

    // A late report from the first attempt must not restart recovery.
    let late = Command::Finished {
        id,
        attempt: 1,
        outcome: Outcome::Mutated(Err(SessionError::SessionNotFound.into())),
    };
    assert!(h.scheduler.commands.send(late).is_ok());
    h.assert_nothing_started().await;
    assert_eq!(h.service.creates().len(), 1);
    assert_eq!(h.scheduler.latest().phase, Phase::Processing);

    a_steps.send(Step::Succeed(4)).unwrap();
    assert_eq!(assert_ok!(a_done.await), 4);
}

#[tokio::test]
async fn cancelled_running_item_keeps_server_state() {
    let mut h = Harness::new();
    let mut transitions = h.scheduler.subscribe();
    let token = CancellationToken::new();
    let (a, a_done, a_steps) = h.mutating("a");
    let id = a.id();
    h.scheduler.submit(a.with_cancellation(token.clone()));
    h.next_started().await;

    token.cancel();
    assert_eq!(assert_err!(a_done.await), SessionError::Cancelled);
    h.assert_nothing_started().await;

    a_steps.send(Step::Succeed(1)).unwrap();
    let done = next_matching(&mut transitions, |t| t.resolutions.iter().any(|r| r.id == id)).await;
    assert_eq!(
        done.resolutions,
        vec![Resolution {
            id,
            outcome: Err(SessionError::Cancelled)
        }]
    );
    assert!(decision_of(&done.session, "a").is_some());

    let (b, _b_done, _b_steps) = h.mutating("b");
    h.scheduler.submit(b);
    let started = h.next_started().await;
    assert_eq!(started.label, "b");
    assert!(decision_of(&started.state, "a").is_some());
}

#[tokio::test]
async fn cancellation_during_recovery_purges_item() {
    let mut h = Harness::new();
    h.service.hold_create.store(true, Ordering::SeqCst);
    let mut transitions = h.scheduler.subscribe();
    let token = CancellationToken::new();
    let (a, a_done, a_steps) = h.mutating("a");
    let (b, b_done, _b_steps) = h.mutating("b");
    let b_id = b.id();
    h.scheduler.submit(a);
    h.scheduler.submit(b.with_cancellation(token.clone()));
    h.next_started().await;

    a_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();
    next_matching(&mut transitions, |t| t.phase == Phase::RestoringSession).await;

    token.cancel();
    assert_eq!(assert_err!(b_done.await), SessionError::Cancelled);
    let purged = next_matching(&mut transitions, |t| {
        t.resolutions.iter().any(|r| r.id == b_id)
    })
    .await;
    assert_eq!(purged.phase, Phase::RestoringSession);
    assert_eq!(purged.pending, 1);

    h.service.release.notify_one();
    assert_eq!(h.next_started().await.label, "a");
    a_steps.send(Step::Succeed(1)).unwrap();
    assert_ok!(a_done.await);
    h.assert_nothing_started().await;
}

#[tokio::test]
async fn item_is_never_attempted_a_third_time() {
    let mut h = Harness::new();
    let (a, a_done, a_steps) = h.mutating("a");
    h.scheduler.submit(a);

    h.next_started().await;
    a_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();
    h.next_started().await;
    a_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();

    assert_eq!(assert_err!(a_done.await), SessionError::SessionNotFound);
    h.assert_nothing_started().await;
    assert_eq!(h.service.creates().len(), 2);
}

#[tokio::test]
async fn failed_recovery_fails_cancellable_work_only() {
    let mut h = Harness::new();
    h.service.fail_create.store(true, Ordering::SeqCst);

    let (a, a_done, a_steps) = h.mutating("a");
    let (b, b_done, _b_steps) = h.mutating("b");
    let (c, c_done, _c_steps) = h.mutating("c");
    let (p, p_done, _p_steps) = h.preserving("p");
    h.scheduler.submit(a);
    h.scheduler.submit(b.allow_concurrent_cancellation());
    h.scheduler.submit(c);
    h.scheduler.submit(p);
    h.next_started().await;

    a_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();
    assert_eq!(assert_err!(b_done.await), SessionError::SessionNotFound);
    assert_eq!(assert_err!(p_done.await), SessionError::SessionNotFound);

    // `a` stays queued and is retried without a session.
    let retried = h.next_started().await;
    assert_eq!(retried.label, "a");
    assert!(retried.state.session_id.is_none());

    a_steps.send(Step::Succeed(1)).unwrap();
    assert_ok!(a_done.await);
    assert_eq!(h.next_started().await.label, "c");
    h.scheduler.shutdown();
    assert_eq!(assert_err!(c_done.await), SessionError::Cancelled);
}

#[tokio::test]
async fn shutdown_cancels_queue_and_closes_session_once() {
    let mut h = Harness::new();
    let (a, a_done, _a_steps) = h.mutating("a");
    let (b, b_done, _b_steps) = h.preserving("b");
    h.scheduler.submit(a);
    h.scheduler.submit(b);
    h.next_started().await;

    h.scheduler.shutdown();
    h.scheduler.shutdown();
    assert_eq!(assert_err!(a_done.await), SessionError::Cancelled);
    assert_eq!(assert_err!(b_done.await), SessionError::Cancelled);

    let done = h.wait_for(|t| t.phase == Phase::ShutDown).await;
    assert_eq!(done.pending, 0);

    let (late, late_done, _late_steps) = h.preserving("late");
    h.scheduler.submit(late);
    assert_eq!(assert_err!(late_done.await), SessionError::ShutDown);
    h.assert_nothing_started().await;

    assert_eq!(h.service.closes.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn shutdown_without_session_skips_close() {
    let mut h = Harness::new();
    h.service.fail_create.store(true, Ordering::SeqCst);
    let (a, a_done, a_steps) = h.mutating("a");
    h.scheduler.submit(a.allow_concurrent_cancellation());
    h.next_started().await;
    a_steps.send(Step::Fail(SessionError::SessionNotFound)).unwrap();
    assert_err!(a_done.await);

    h.wait_for(|t| t.phase == Phase::Processing && t.session.session_id.is_none())
        .await;
    h.scheduler.shutdown();
    h.wait_for(|t| t.phase == Phase::ShutDown).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(h.service.closes.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn cancelled_item_rejects_immediately_and_never_runs() {
    let mut h = Harness::new();
    let (a, a_done, a_steps) = h.mutating("a");
    let (b, b_done, _b_steps) = h.mutating("b");
    let token = CancellationToken::new();
    h.scheduler.submit(a);
    h.scheduler.submit(b.with_cancellation(token.clone()));
    h.next_started().await;

    token.cancel();
    assert_eq!(assert_err!(b_done.await), SessionError::Cancelled);

    a_steps.send(Step::Succeed(1)).unwrap();
    assert_ok!(a_done.await);
    h.assert_nothing_started().await;
    let idle = h.wait_for(|t| t.pending == 0).await;
    assert_eq!(idle.phase, Phase::Processing);
}

#[tokio::test]
async fn schedule_task_waits_for_earlier_mutations() {
    let mut h = Harness::new();
    let (a, a_done, a_steps) = h.mutating("a");
    h.scheduler.submit(a);
    h.next_started().await;

    let drained = tokio::spawn(h.scheduler.schedule_task(CancellationToken::new()));
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(!drained.is_finished());

    a_steps.send(Step::Succeed(1)).unwrap();
    assert_ok!(a_done.await);
    assert_eq!(assert_ok!(drained.await.unwrap()), 0);
}

#[tokio::test]
async fn schedule_task_with_cancelled_token_rejects_at_once() {
    let h = Harness::new();
    let token = CancellationToken::new();
    token.cancel();
    assert_eq!(
        assert_err!(h.scheduler.schedule_task(token).await),
        SessionError::Cancelled
    );
}

#[tokio::test]
async fn resolutions_are_reported_once() {
    let mut h = Harness::new();
    let mut stream = h.scheduler.subscribe();
    let (a, a_done, a_steps) = h.mutating("a");
    let id = a.id();
    h.scheduler.submit(a);
    h.next_started().await;
    a_steps.send(Step::Succeed(1)).unwrap();
    assert_ok!(a_done.await);

    let (b, b_done, b_steps) = h.preserving("b");
    h.scheduler.submit(b);
    h.next_started().await;
    b_steps.send(Step::Succeed(2)).unwrap();
    assert_ok!(b_done.await);

    let mut seen = 0;
    while let Ok(Some(transition)) =
        tokio::time::timeout(Duration::from_millis(100), stream.next()).await
    {
        seen += transition.resolutions.iter().filter(|r| r.id == id).count();
    }
    assert_eq!(seen, 1);
}

#[tokio::test]
async fn dropping_the_handle_shuts_down() {
    let h = Harness::new();
    let mut transitions = h.scheduler.subscribe();
    let service = Arc::clone(&h.service);
    drop(h);

    next_matching(&mut transitions, |t| t.phase == Phase::ShutDown).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(service.closes.load(Ordering::SeqCst), 1);
}
