//! Cold retrieval descriptions and their emission streams.

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};

use futures_util::Stream;
use larder_core::ProviderError;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::notify::NotificationContext;

/// Cancellation handle for one running retrieval.
///
/// Cancellation is best-effort: work already in flight may finish (including
/// its cache write-back) and an emission already handed to the notification
/// context may still arrive.
#[derive(Debug, Clone)]
pub struct RetrievalHandle {
    id: Uuid,
    cancelled: Arc<AtomicBool>,
}

impl RetrievalHandle {
    pub(crate) fn new() -> Self {
        Self {
            id: Uuid::now_v7(),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Emissions of one retrieval run.
///
/// Ends after the terminal emission. Dropping the stream cancels the run.
pub struct RetrievalStream<V, E> {
    emissions: mpsc::UnboundedReceiver<Result<V, E>>,
    handle: RetrievalHandle,
}

impl<V, E> RetrievalStream<V, E> {
    pub(crate) fn new(
        emissions: mpsc::UnboundedReceiver<Result<V, E>>,
        handle: RetrievalHandle,
    ) -> Self {
        Self { emissions, handle }
    }

    /// A handle that can cancel this run from elsewhere.
    pub fn handle(&self) -> RetrievalHandle {
        self.handle.clone()
    }

    pub fn cancel(&self) {
        self.handle.cancel();
    }
}

impl<V, E> Stream for RetrievalStream<V, E> {
    type Item = Result<V, E>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.emissions.poll_recv(cx)
    }
}

impl<V, E> Drop for RetrievalStream<V, E> {
    fn drop(&mut self) {
        self.handle.cancel();
    }
}

/// Cold description of a retrieval.
///
/// Nothing happens until [`Retrieval::stream`] is called; every call starts
/// an independent run with its own cache lookup and remote fetch.
pub struct Retrieval<V, E> {
    start: Arc<dyn Fn() -> RetrievalStream<V, E> + Send + Sync>,
}

impl<V, E> Retrieval<V, E> {
    pub(crate) fn new(start: impl Fn() -> RetrievalStream<V, E> + Send + Sync + 'static) -> Self {
        Self {
            start: Arc::new(start),
        }
    }

    /// Start a run and return its emissions.
    pub fn stream(&self) -> RetrievalStream<V, E> {
        (self.start)()
    }
}

impl<V, E> Clone for Retrieval<V, E> {
    fn clone(&self) -> Self {
        Self {
            start: Arc::clone(&self.start),
        }
    }
}

/// Worker-side half of a retrieval run.
pub(crate) struct Emitter<V, I> {
    tx: mpsc::UnboundedSender<Result<V, ProviderError<I>>>,
    notify: Arc<dyn NotificationContext>,
    handle: RetrievalHandle,
    owner: Weak<()>,
    finished: bool,
}

impl<V, I> Emitter<V, I>
where
    V: Send + 'static,
    I: Send + 'static,
{
    pub(crate) fn channel(
        notify: Arc<dyn NotificationContext>,
        owner: Weak<()>,
    ) -> (Self, RetrievalStream<V, ProviderError<I>>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RetrievalHandle::new();
        let emitter = Self {
            tx,
            notify,
            handle: handle.clone(),
            owner,
            finished: false,
        };
        (emitter, RetrievalStream::new(rx, handle))
    }

    pub(crate) fn handle(&self) -> &RetrievalHandle {
        &self.handle
    }

    pub(crate) fn owner_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }

    /// No further emission will be delivered.
    pub(crate) fn is_closed(&self) -> bool {
        self.finished || self.handle.is_cancelled()
    }

    /// Deliver a success. `on_delivered` runs just before the hand-off and
    /// only if the value is really delivered.
    pub(crate) fn success(&mut self, value: V, on_delivered: impl FnOnce(&V)) {
        if self.is_closed() {
            return;
        }
        if !self.owner_alive() {
            self.failure(ProviderError::NoLiveOrchestrator);
            return;
        }
        on_delivered(&value);
        self.deliver(Ok(value));
    }

    /// Deliver the terminal failure. A released owner turns any failure into
    /// `NoLiveOrchestrator`.
    pub(crate) fn failure(&mut self, err: ProviderError<I>) {
        if self.is_closed() {
            return;
        }
        let err = if self.owner_alive() {
            err
        } else {
            ProviderError::NoLiveOrchestrator
        };
        self.finished = true;
        self.deliver(Err(err));
    }

    fn deliver(&self, emission: Result<V, ProviderError<I>>) {
        let tx = self.tx.clone();
        self.notify.deliver(Box::new(move || {
            // Receiver gone means the caller stopped listening.
            let _ = tx.send(emission);
        }));
    }
}

/// A stream that fails immediately, for retrievals started after the
/// orchestrator was released.
pub(crate) fn released<V, I>() -> RetrievalStream<V, ProviderError<I>> {
    let (tx, rx) = mpsc::unbounded_channel();
    let _ = tx.send(Err(ProviderError::NoLiveOrchestrator));
    RetrievalStream::new(rx, RetrievalHandle::new())
}
