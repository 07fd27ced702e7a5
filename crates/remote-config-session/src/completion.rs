//! Single-assignment completion handles.

use std::{
    future::Future,
    pin::Pin,
    sync::{Arc, Mutex, PoisonError},
    task::{Context, Poll},
};

use remote_config_core::SessionError;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

type Outcome<T> = Result<T, SessionError>;

struct Inner<T> {
    sender: Mutex<Option<oneshot::Sender<Outcome<T>>>>,
    settled: CancellationToken,
}

/// Write side of a completion handle.
///
/// Settles at most once; later calls report `false` and change nothing.
pub struct Promise<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T> Promise<T> {
    /// Create a promise and the completion its caller awaits.
    #[must_use]
    pub fn pair() -> (Self, Completion<T>) {
        let (tx, rx) = oneshot::channel();
        let promise = Self {
            inner: Arc::new(Inner {
                sender: Mutex::new(Some(tx)),
                settled: CancellationToken::new(),
            }),
        };
        (promise, Completion { rx })
    }

    fn settle(&self, outcome: Outcome<T>) -> bool {
        let Some(tx) = self
            .inner
            .sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return false;
        };
        self.inner.settled.cancel();
        // The caller may have dropped its completion; it is still settled.
        let _ = tx.send(outcome);
        true
    }

    /// Resolve with a value.
    pub fn resolve(&self, value: T) -> bool {
        self.settle(Ok(value))
    }

    /// Reject with an error.
    pub fn reject(&self, error: SessionError) -> bool {
        self.settle(Err(error))
    }
}

/// Type-erased settle-side view used by the scheduler.
pub trait Settle: Send + Sync {
    /// Reject unless already settled.
    fn reject(&self, error: SessionError) -> bool;

    fn is_settled(&self) -> bool;

    /// Token cancelled once the handle settles.
    fn settled(&self) -> CancellationToken;
}

impl<T: Send> Settle for Promise<T> {
    fn reject(&self, error: SessionError) -> bool {
        self.settle(Err(error))
    }

    fn is_settled(&self) -> bool {
        self.inner.settled.is_cancelled()
    }

    fn settled(&self) -> CancellationToken {
        self.inner.settled.clone()
    }
}

/// Read side of a completion handle.
///
/// Resolves with [`SessionError::Cancelled`] if the promise is dropped
/// without being settled.
#[must_use = "completions do nothing unless awaited"]
pub struct Completion<T> {
    rx: oneshot::Receiver<Outcome<T>>,
}

impl<T> Future for Completion<T> {
    type Output = Outcome<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.unwrap_or(Err(SessionError::Cancelled)))
    }
}
