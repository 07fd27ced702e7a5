//! Units of work submitted to the scheduler.

use std::{fmt, future::Future, sync::Arc};

use futures::{FutureExt, future::BoxFuture};
use remote_config_core::{
    Configuration, MutationError, OptimisticEffect, SessionError, SessionState,
};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::completion::{Completion, Promise, Settle};

/// Work item identifier.
pub type WorkId = Uuid;

/// Queue bookkeeping passed to every attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueInfo {
    /// Items in the queue, including this one.
    pub queue_length: usize,
    /// Items selected to run in the current scheduling pass.
    pub runnable_count: usize,
}

/// Hands an attempt's output to the caller; `false` if already settled.
pub(crate) type Delivery = Box<dyn FnOnce() -> bool + Send>;

type Mutated = Result<(SessionState, Delivery), MutationError>;
type Preserved = Result<Delivery, SessionError>;

pub(crate) type MutatingRun =
    Arc<dyn Fn(SessionState, QueueInfo) -> BoxFuture<'static, Mutated> + Send + Sync>;

pub(crate) type PreservingRun =
    Arc<dyn Fn(SessionState, QueueInfo) -> BoxFuture<'static, Preserved> + Send + Sync>;

/// What an item does to the session.
pub(crate) enum WorkKind {
    /// Changes decision state; runs exclusively.
    Mutating {
        run: MutatingRun,
        effect: Option<OptimisticEffect>,
    },
    /// Reads only; may run alongside other preserving items.
    Preserving { run: PreservingRun },
}

/// An operation queued against the session.
pub struct WorkItem {
    id: WorkId,
    pub(crate) kind: WorkKind,
    pub(crate) settle: Arc<dyn Settle>,
    cancellation: Option<CancellationToken>,
    allow_concurrent_cancellation: bool,
}

impl WorkItem {
    /// Create a state-mutating item.
    ///
    /// `run` may be invoked more than once when the session is recreated.
    pub fn mutating<T, F, Fut>(run: F) -> (Self, Completion<T>)
    where
        T: Send + 'static,
        F: Fn(SessionState, QueueInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(SessionState, T), MutationError>> + Send + 'static,
    {
        let (promise, completion) = Promise::pair();
        let settle: Arc<dyn Settle> = Arc::new(promise.clone());
        let run: MutatingRun = Arc::new(move |state: SessionState, info: QueueInfo| {
            let attempt = run(state, info);
            let promise = promise.clone();
            async move {
                let (state, value) = attempt.await?;
                let delivery: Delivery = Box::new(move || promise.resolve(value));
                Ok::<_, MutationError>((state, delivery))
            }
            .boxed()
        });
        let item = Self::with_kind(WorkKind::Mutating { run, effect: None }, settle);
        (item, completion)
    }

    /// Create a state-preserving item.
    pub fn preserving<T, F, Fut>(run: F) -> (Self, Completion<T>)
    where
        T: Send + 'static,
        F: Fn(SessionState, QueueInfo) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, SessionError>> + Send + 'static,
    {
        let (promise, completion) = Promise::pair();
        let settle: Arc<dyn Settle> = Arc::new(promise.clone());
        let run: PreservingRun = Arc::new(move |state: SessionState, info: QueueInfo| {
            let attempt = run(state, info);
            let promise = promise.clone();
            async move {
                let value = attempt.await?;
                let delivery: Delivery = Box::new(move || promise.resolve(value));
                Ok::<_, SessionError>(delivery)
            }
            .boxed()
        });
        let item = Self::with_kind(WorkKind::Preserving { run }, settle);
        (item, completion)
    }

    fn with_kind(kind: WorkKind, settle: Arc<dyn Settle>) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            settle,
            cancellation: None,
            allow_concurrent_cancellation: false,
        }
    }

    /// Predict the local effect of a mutating item. Ignored for preserving items.
    #[must_use]
    pub fn with_effect(
        mut self,
        effect: impl Fn(&Configuration) -> Configuration + Send + Sync + 'static,
    ) -> Self {
        if let WorkKind::Mutating { effect: slot, .. } = &mut self.kind {
            let effect: OptimisticEffect = Arc::new(effect);
            *slot = Some(effect);
        } else {
            tracing::debug!(work_id = %self.id, "ignoring optimistic effect on preserving item");
        }
        self
    }

    /// Reject the item as soon as `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Fail this item, rather than keep it queued, when session recovery fails.
    #[must_use]
    pub const fn allow_concurrent_cancellation(mut self) -> Self {
        self.allow_concurrent_cancellation = true;
        self
    }

    #[must_use]
    pub const fn id(&self) -> WorkId {
        self.id
    }

    #[must_use]
    pub const fn is_mutating(&self) -> bool {
        matches!(self.kind, WorkKind::Mutating { .. })
    }

    pub(crate) const fn effect(&self) -> Option<&OptimisticEffect> {
        match &self.kind {
            WorkKind::Mutating { effect, .. } => effect.as_ref(),
            WorkKind::Preserving { .. } => None,
        }
    }

    pub(crate) const fn cancellation(&self) -> Option<&CancellationToken> {
        self.cancellation.as_ref()
    }

    pub(crate) const fn cancels_on_failed_recovery(&self) -> bool {
        self.allow_concurrent_cancellation || !self.is_mutating()
    }

    /// Whether the completion handle already settled, e.g. through cancellation.
    pub(crate) fn is_settled(&self) -> bool {
        self.settle.is_settled()
    }

    pub(crate) fn reject(&self, error: SessionError) -> bool {
        self.settle.reject(error)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem")
            .field("id", &self.id)
            .field("mutating", &self.is_mutating())
            .field("has_effect", &self.effect().is_some())
            .field("allow_concurrent_cancellation", &self.allow_concurrent_cancellation)
            .finish_non_exhaustive()
    }
}
