//! Edge-triggered change and reset notifications over confirmed snapshots.

use std::sync::{Arc, Mutex, PoisonError};

use remote_config_core::{Configuration, ConfigurationChanges, diff};

/// Handle returned when registering a listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type ChangeListener = Arc<dyn Fn(&ConfigurationChanges) + Send + Sync>;
type ResetListener = Arc<dyn Fn(bool) + Send + Sync>;

#[derive(Default)]
struct Inner {
    current: Option<Arc<Configuration>>,
    can_reset: Option<bool>,
    next_id: u64,
    change: Vec<(ListenerId, ChangeListener)>,
    reset: Vec<(ListenerId, ResetListener)>,
}

impl Inner {
    fn next_id(&mut self) -> ListenerId {
        self.next_id += 1;
        ListenerId(self.next_id)
    }
}

/// Tracks the last confirmed configuration and notifies listeners when
/// something observable changed.
///
/// Listeners are called outside the internal lock, so they may register or
/// remove listeners themselves.
#[derive(Default)]
pub struct ChangeNotifier {
    inner: Mutex<Inner>,
}

impl ChangeNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed the next confirmed snapshot.
    pub fn update(&self, confirmed: Arc<Configuration>) {
        let (changes, reset_edge, change_listeners, reset_listeners) = {
            let mut inner = self.lock();
            if inner
                .current
                .as_ref()
                .is_some_and(|current| Arc::ptr_eq(current, &confirmed))
            {
                return;
            }
            let changes = diff(inner.current.as_deref(), &confirmed);
            let can_reset = confirmed.can_reset();
            let reset_edge = (inner.can_reset != Some(can_reset)).then_some(can_reset);
            inner.can_reset = Some(can_reset);
            inner.current = Some(confirmed);
            (
                changes,
                reset_edge,
                inner.change.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>(),
                inner.reset.iter().map(|(_, l)| Arc::clone(l)).collect::<Vec<_>>(),
            )
        };

        if !changes.is_empty() {
            tracing::debug!(
                added = changes.added.len(),
                changed = changes.changed.len(),
                removed = changes.removed.len(),
                satisfaction_changed = changes.satisfaction_changed,
                "configuration changed"
            );
            for listener in &change_listeners {
                listener(&changes);
            }
        }
        if let Some(can_reset) = reset_edge {
            for listener in &reset_listeners {
                listener(can_reset);
            }
        }
    }

    /// Register a change listener.
    ///
    /// It is called right away with the full current configuration as added,
    /// unless that delta is empty.
    pub fn add_change_listener(
        &self,
        listener: impl Fn(&ConfigurationChanges) + Send + Sync + 'static,
    ) -> ListenerId {
        let listener: ChangeListener = Arc::new(listener);
        let (id, current) = {
            let mut inner = self.lock();
            let id = inner.next_id();
            inner.change.push((id, Arc::clone(&listener)));
            (id, inner.current.clone())
        };
        if let Some(current) = current {
            let changes = diff(None, &current);
            if !changes.is_empty() {
                listener(&changes);
            }
        }
        id
    }

    /// Register a listener for whether a reset would change anything.
    ///
    /// It is called right away with the current value, if there is one.
    pub fn add_reset_listener(
        &self,
        listener: impl Fn(bool) + Send + Sync + 'static,
    ) -> ListenerId {
        let listener: ResetListener = Arc::new(listener);
        let (id, can_reset) = {
            let mut inner = self.lock();
            let id = inner.next_id();
            inner.reset.push((id, Arc::clone(&listener)));
            (id, inner.can_reset)
        };
        if let Some(can_reset) = can_reset {
            listener(can_reset);
        }
        id
    }

    /// Remove a listener; `false` if it was not registered.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut inner = self.lock();
        let before = inner.change.len() + inner.reset.len();
        inner.change.retain(|(other, _)| *other != id);
        inner.reset.retain(|(other, _)| *other != id);
        before != inner.change.len() + inner.reset.len()
    }

    /// Last snapshot passed to [`update`](Self::update).
    #[must_use]
    pub fn current(&self) -> Option<Arc<Configuration>> {
        self.lock().current.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
