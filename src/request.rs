use std::{
    fmt,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    },
    task::{Context, Poll},
};

use log::trace;
use parking_lot::Mutex;
use tokio::{
    sync::{oneshot, Notify},
    time::Instant,
};

use crate::{
    error::{Error, Result},
    message::Protocol,
    transport::Transport,
};

/// Lifecycle of a queued request.
///
/// `New → Accepted → Registered → Await → Sent → Done`. Statuses only move
/// forward; `Retry` is the one side path, taken from `Await` when a write
/// failed and the request goes back to the tail of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    /// Unprocessed, sitting in the queue.
    New,
    /// Taken off the queue, about to be registered.
    Accepted,
    /// Marked for another attempt after a failed write.
    Retry,
    /// Session registered, about to be written.
    Registered,
    /// Write handed to the transport.
    Await,
    /// Write acknowledged; waiting for a response or a timeout.
    Sent,
    /// Promise settled.
    Done,
}

impl RequestStatus {
    fn rank(self) -> u8 {
        match self {
            RequestStatus::New => 0,
            RequestStatus::Accepted | RequestStatus::Retry => 1,
            RequestStatus::Registered => 2,
            RequestStatus::Await => 3,
            RequestStatus::Sent => 4,
            RequestStatus::Done => 5,
        }
    }

    pub fn can_advance_to(self, next: RequestStatus) -> bool {
        match (self, next) {
            (RequestStatus::Done, _) => false,
            (_, RequestStatus::Done) => true,
            (RequestStatus::Await, RequestStatus::Retry) => true,
            (_, RequestStatus::Retry) => false,
            (RequestStatus::Retry, next) => next == RequestStatus::Accepted,
            (current, next) => next.rank() > current.rank(),
        }
    }
}

type Promise<P> = oneshot::Sender<Result<<P as Protocol>::Response>>;

/// A request together with the promise its caller is waiting on.
pub struct RequestContext<P: Protocol> {
    request: Arc<P::Request>,
    promise: Mutex<Option<Promise<P>>>,
    status: Mutex<RequestStatus>,
    retries: AtomicU32,
    transport: Arc<dyn Transport<P>>,
    created_at: Instant,
    settled: Notify,
}

impl<P: Protocol> RequestContext<P> {
    pub fn new(
        request: P::Request,
        transport: Arc<dyn Transport<P>>,
    ) -> (Arc<Self>, ResponseFuture<P::Response>) {
        let (tx, rx) = oneshot::channel();
        let context = RequestContext {
            request: Arc::new(request),
            promise: Mutex::new(Some(tx)),
            status: Mutex::new(RequestStatus::New),
            retries: AtomicU32::new(0),
            transport,
            created_at: Instant::now(),
            settled: Notify::new(),
        };
        (Arc::new(context), ResponseFuture { rx })
    }

    pub fn request(&self) -> &Arc<P::Request> {
        &self.request
    }

    pub fn transport(&self) -> &Arc<dyn Transport<P>> {
        &self.transport
    }

    pub fn status(&self) -> RequestStatus {
        *self.status.lock()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn retries(&self) -> u32 {
        self.retries.load(Ordering::Acquire)
    }

    /// Returns the retry count before the increment.
    pub fn increment_retry(&self) -> u32 {
        self.retries.fetch_add(1, Ordering::AcqRel)
    }

    /// Moves to `next` if that is a legal transition. Late transitions (a
    /// write ack arriving after the response) are ignored.
    pub fn advance(&self, next: RequestStatus) -> bool {
        let mut status = self.status.lock();
        if status.can_advance_to(next) {
            trace!("request {:?}: {:?} -> {:?}", self.request, *status, next);
            *status = next;
            true
        } else {
            false
        }
    }

    pub fn is_done(&self) -> bool {
        self.status() == RequestStatus::Done
    }

    /// Settles the promise. Only the first call has any effect; it returns
    /// `true` for that call and `false` for every later one.
    pub fn complete(&self, result: Result<P::Response>) -> bool {
        let Some(promise) = self.promise.lock().take() else {
            return false;
        };

        *self.status.lock() = RequestStatus::Done;
        // the caller may have dropped its future, which still counts as settled
        let _ = promise.send(result);
        self.settled.notify_one();
        true
    }

    /// Resolves once the promise is settled.
    pub async fn settled(&self) {
        if self.is_done() {
            return;
        }
        self.settled.notified().await;
    }
}

impl<P: Protocol> fmt::Debug for RequestContext<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestContext")
            .field("request", &self.request)
            .field("status", &self.status())
            .field("retries", &self.retries())
            .field("age", &self.created_at.elapsed())
            .finish()
    }
}

/// Future handed back by `Messenger::send`, resolving exactly once.
#[must_use = "futures do nothing unless polled"]
pub struct ResponseFuture<S> {
    rx: oneshot::Receiver<Result<S>>,
}

impl<S> ResponseFuture<S> {
    /// A future that is already rejected with `error`.
    pub fn failed(error: Error) -> Self {
        let (tx, rx) = oneshot::channel();
        let _ = tx.send(Err(error));
        ResponseFuture { rx }
    }
}

impl<S> Future for ResponseFuture<S> {
    type Output = Result<S>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Error::Closed)),
            Poll::Pending => Poll::Pending,
        }
    }
}
