//! Broadcast + latest-value store of scheduler transitions.

use std::sync::{Arc, PoisonError, RwLock};

use futures::{StreamExt, stream::BoxStream};
use remote_config_core::{Configuration, SessionError, SessionState};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::{scheduler::Phase, work::WorkId};

/// How a work item left the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolution {
    pub id: WorkId,
    pub outcome: Result<(), SessionError>,
}

/// Snapshot emitted after every scheduler transition.
#[derive(Debug, Clone)]
pub struct Transition {
    pub phase: Phase,
    /// Confirmed session state.
    pub session: SessionState,
    /// Confirmed configuration with pending optimistic effects applied.
    pub view: Arc<Configuration>,
    /// Items removed by this transition; each appears exactly once.
    pub resolutions: Vec<Resolution>,
    /// Items still queued.
    pub pending: usize,
}

impl Transition {
    /// Idle transition over a freshly established session.
    #[must_use]
    pub fn idle(session: SessionState) -> Self {
        Self {
            phase: Phase::Processing,
            view: Arc::clone(&session.configuration),
            session,
            resolutions: Vec::new(),
            pending: 0,
        }
    }
}

/// Transition store with broadcast and latest-value support.
///
/// New subscribers receive the latest transition, then live updates.
pub struct TransitionStore {
    latest: RwLock<Transition>,
    sender: broadcast::Sender<Transition>,
}

impl TransitionStore {
    /// Create a store holding `initial`, buffering `capacity` transitions
    /// per subscriber.
    #[must_use]
    pub fn new(initial: Transition, capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            latest: RwLock::new(initial),
            sender,
        }
    }

    /// Publish a transition to live subscribers and keep it as latest.
    ///
    /// The latest value is replaced and broadcast under one write lock, so a
    /// new subscriber sees each transition exactly once.
    pub fn push(&self, transition: Transition) {
        let mut latest = self.latest.write().unwrap_or_else(PoisonError::into_inner);
        *latest = transition.clone();
        let _ = self.sender.send(transition); // no subscribers is fine
    }

    #[must_use]
    pub fn latest(&self) -> Transition {
        self.latest
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<Transition> {
        self.sender.subscribe()
    }

    /// Stream that yields the latest transition first, then live updates.
    ///
    /// Lagging subscribers skip the transitions they missed.
    #[must_use]
    pub fn latest_plus_stream(&self) -> BoxStream<'static, Transition> {
        let (rx, latest) = {
            let latest = self.latest.read().unwrap_or_else(PoisonError::into_inner);
            (self.get_receiver(), latest.clone())
        };

        let head = futures::stream::once(async move { latest });
        let live = BroadcastStream::new(rx).filter_map(|res| async move {
            match res {
                Ok(transition) => Some(transition),
                Err(e) => {
                    tracing::debug!("transition subscriber lagged: {e}");
                    None
                }
            }
        });

        head.chain(live).boxed()
    }
}
