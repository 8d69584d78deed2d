//! The correlation engine.
//!
//! A [Messenger] owns a bounded request queue, a single dispatch worker
//! draining it, the [SessionManager] pairing responses with requests, and the
//! [Transport] writing them out. Responses come back through [Messenger::accept]
//! (or the [ResponseSink] handed to the transport), are matched to the oldest
//! pending session with the same id and settle that request's future.
use std::{
    mem,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use log::{debug, error, info, trace, warn};
use parking_lot::Mutex;
use tokio::{
    runtime::Handle,
    sync::{
        mpsc::{self, error::TrySendError},
        watch,
    },
    task::JoinHandle,
};

use crate::{
    error::{Error, ResponseError, Result},
    message::{Envelope, Protocol},
    request::{RequestContext, RequestStatus, ResponseFuture},
    session::{SessionIdFactory, SessionManager, SessionValue, DEFAULT_READ_TIMEOUT},
    transport::{ResponseSink, Transport},
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 30;
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// How the dispatch worker treats requests it has written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingMode {
    /// One request in flight at a time. The next request is not written until
    /// the previous one has settled.
    Synchronous,
    /// Requests are written as soon as they are dequeued.
    Asynchronous,
}

#[derive(Debug, Clone)]
pub struct MessengerConfig {
    pub mode: ProcessingMode,
    pub queue_capacity: usize,
    pub read_timeout: Duration,
    pub shutdown_timeout: Duration,
    /// Write attempts on top of the first one. Zero disables retries.
    pub max_write_retries: u32,
    /// Runtime driving the worker. Defaults to the one `send` is called from.
    pub runtime: Option<Handle>,
}

impl Default for MessengerConfig {
    fn default() -> Self {
        MessengerConfig {
            mode: ProcessingMode::Asynchronous,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            read_timeout: DEFAULT_READ_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            max_write_retries: 0,
            runtime: None,
        }
    }
}

impl MessengerConfig {
    pub fn new(mode: ProcessingMode) -> Self {
        MessengerConfig {
            mode,
            ..Default::default()
        }
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    pub fn with_max_write_retries(mut self, retries: u32) -> Self {
        self.max_write_retries = retries;
        self
    }

    pub fn with_runtime(mut self, runtime: Handle) -> Self {
        self.runtime = Some(runtime);
        self
    }
}

type Delivery<P> =
    std::result::Result<<P as Protocol>::Response, ResponseError<<P as Protocol>::Request>>;
type Queue<P> = mpsc::Sender<Arc<RequestContext<P>>>;
type QueueReceiver<P> = mpsc::Receiver<Arc<RequestContext<P>>>;

enum WorkerState<P: Protocol> {
    Idle(QueueReceiver<P>),
    Running(JoinHandle<()>),
    Stopped,
}

pub struct Messenger<P: Protocol> {
    config: MessengerConfig,
    sessions: SessionManager<P>,
    transport: Arc<dyn Transport<P>>,
    queue: Queue<P>,
    worker: Mutex<WorkerState<P>>,
    shutdown: watch::Sender<bool>,
    closed: AtomicBool,
}

impl<P: Protocol> Messenger<P> {
    /// Builds a messenger. `transport` receives the sink its channels must
    /// feed decoded responses into.
    pub fn new<T, F>(config: MessengerConfig, factory: Arc<dyn SessionIdFactory<P>>, transport: F) -> Self
    where
        T: Transport<P> + 'static,
        F: FnOnce(ResponseSink<P>) -> Arc<T>,
    {
        let sessions = SessionManager::new(factory, config.read_timeout);
        let sink: ResponseSink<P> = {
            let sessions = sessions.clone();
            Arc::new(move |result: Delivery<P>| correlate(&sessions, result))
        };
        let transport: Arc<dyn Transport<P>> = transport(sink);

        let (queue, rx) = mpsc::channel(config.queue_capacity.max(1));

        Messenger {
            config,
            sessions,
            transport,
            queue,
            worker: Mutex::new(WorkerState::Idle(rx)),
            shutdown: watch::channel(false).0,
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &MessengerConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionManager<P> {
        &self.sessions
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Queues `request` and returns the future of its response.
    ///
    /// Never blocks: a full queue, a closed messenger or a missing runtime
    /// reject the returned future right away.
    pub fn send(&self, request: P::Request) -> ResponseFuture<P::Response> {
        if self.is_closed() {
            return ResponseFuture::failed(Error::Closed);
        }
        if let Err(e) = self.start_worker() {
            return ResponseFuture::failed(e);
        }

        let (context, future) = RequestContext::new(request, Arc::clone(&self.transport));

        match self.queue.try_send(Arc::clone(&context)) {
            Ok(()) => {
                debug!("queued request {:?}", context.request());
                future
            }
            Err(TrySendError::Full(_)) => {
                debug!("queue full, rejecting request {:?}", context.request());
                ResponseFuture::failed(Error::QueueFull(self.config.queue_capacity))
            }
            Err(TrySendError::Closed(_)) => ResponseFuture::failed(Error::Closed),
        }
    }

    /// Entry point for decoded responses and decode failures.
    pub fn accept(&self, result: Delivery<P>) {
        correlate(&self.sessions, result);
    }

    fn start_worker(&self) -> Result<()> {
        let mut worker = self.worker.lock();
        if !matches!(*worker, WorkerState::Idle(_)) {
            return Ok(());
        }

        let runtime = match &self.config.runtime {
            Some(runtime) => runtime.clone(),
            None => Handle::try_current().map_err(|_| Error::NoRuntime)?,
        };

        if let WorkerState::Idle(rx) = mem::replace(&mut *worker, WorkerState::Stopped) {
            let dispatcher = Arc::new(Dispatcher {
                sessions: self.sessions.clone(),
                queue: self.queue.clone(),
                mode: self.config.mode,
                max_write_retries: self.config.max_write_retries,
            });
            let shutdown = self.shutdown.subscribe();
            debug!("starting dispatch worker ({:?})", self.config.mode);
            *worker = WorkerState::Running(runtime.spawn(dispatcher.run(rx, shutdown)));
        }
        Ok(())
    }

    /// Stops the worker, reports requests that never left the queue, then
    /// closes the session registry and the transport. Each step is bounded by
    /// the shutdown timeout.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("closing messenger");

        let _ = self.shutdown.send(true);
        let worker = mem::replace(&mut *self.worker.lock(), WorkerState::Stopped);

        match worker {
            WorkerState::Running(handle) => {
                let abort = handle.abort_handle();
                if tokio::time::timeout(self.config.shutdown_timeout, handle)
                    .await
                    .is_err()
                {
                    warn!(
                        "dispatch worker did not stop within {:?}, aborting it",
                        self.config.shutdown_timeout
                    );
                    abort.abort();
                }
            }
            WorkerState::Idle(rx) => report_orphans(rx),
            WorkerState::Stopped => {}
        }

        self.sessions.close();

        if tokio::time::timeout(self.config.shutdown_timeout, self.transport.close())
            .await
            .is_err()
        {
            warn!(
                "transport did not close within {:?}",
                self.config.shutdown_timeout
            );
        }
    }
}

impl<P: Protocol> Drop for Messenger<P> {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

/// Settles whichever request `result` belongs to. Nothing here can fail the
/// caller: unmatched responses and orphaned errors are logged and dropped.
fn correlate<P: Protocol>(sessions: &SessionManager<P>, result: Delivery<P>) {
    match result {
        Ok(response) => match sessions.get_session_for(Envelope::Response(&response)) {
            Ok(Some(value)) => {
                debug!(
                    "matched response with session '{}' (index: {})",
                    value.id(),
                    value.index()
                );
                sessions.settle(&value, Ok(response));
            }
            Ok(None) => debug!("no session found for response {:?}, discarding", response),
            Err(e) => debug!("cannot correlate response {:?}: {}", response, e),
        },
        Err(ResponseError {
            request: Some(request),
            error,
        }) => match sessions.get_session_of(&request) {
            Some(value) => {
                debug!("routing error to session '{}': {}", value.id(), error);
                sessions.settle(&value, Err(error));
            }
            None => debug!("request {:?} is no longer pending, dropping error: {}", request, error),
        },
        Err(ResponseError {
            request: None,
            error,
        }) => warn!("discarding error not tied to any request: {}", error),
    }
}

fn report_orphans<P: Protocol>(mut rx: QueueReceiver<P>) {
    rx.close();
    let mut orphans = Vec::new();
    while let Ok(context) = rx.try_recv() {
        orphans.push(context);
    }

    if !orphans.is_empty() {
        warn!("{} request(s) left in the queue", orphans.len());
        for context in &orphans {
            warn!("\torphaned: {:?}", context);
        }
    }
}

struct Dispatcher<P: Protocol> {
    sessions: SessionManager<P>,
    queue: Queue<P>,
    mode: ProcessingMode,
    max_write_retries: u32,
}

impl<P: Protocol> Dispatcher<P> {
    async fn run(self: Arc<Self>, mut rx: QueueReceiver<P>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let context = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                next = rx.recv() => match next {
                    Some(context) => context,
                    None => break,
                },
            };

            match self.mode {
                ProcessingMode::Asynchronous => {
                    if let Some(value) = self.accept(&context) {
                        let dispatcher = Arc::clone(&self);
                        tokio::spawn(async move { dispatcher.write(context, value).await });
                    }
                }
                ProcessingMode::Synchronous => {
                    let Some(value) = self.accept(&context) else {
                        continue;
                    };

                    // a write that never completes must not outlive the request's timeout
                    let mut write = tokio::spawn(Arc::clone(&self).write(Arc::clone(&context), value));
                    let written = tokio::select! {
                        biased;
                        _ = shutdown.changed() => {
                            write.abort();
                            break;
                        }
                        _ = context.settled() => {
                            debug!("request {:?} settled before its write finished", context.request());
                            continue;
                        }
                        joined = &mut write => joined.unwrap_or(false),
                    };
                    if !written {
                        continue;
                    }

                    tokio::select! {
                        biased;
                        _ = shutdown.changed() => break,
                        _ = context.settled() => trace!("request {:?} settled", context.request()),
                    }
                }
            }
        }

        debug!("dispatch worker stopping");
        report_orphans(rx);
    }

    /// Registers the session of a dequeued request. A failure rejects that
    /// request only.
    fn accept(&self, context: &Arc<RequestContext<P>>) -> Option<Arc<SessionValue<P>>> {
        if !context.advance(RequestStatus::Accepted) {
            debug!("skipping request {:?} ({:?})", context.request(), context.status());
            return None;
        }

        match self.sessions.register(context) {
            Ok(value) => {
                context.advance(RequestStatus::Await);
                Some(value)
            }
            Err(e) => {
                error!("cannot register request {:?}: {}", context.request(), e);
                context.complete(Err(e));
                None
            }
        }
    }

    /// Hands the request to its transport. Returns `true` if the request is
    /// now waiting for its response.
    async fn write(self: Arc<Self>, context: Arc<RequestContext<P>>, value: Arc<SessionValue<P>>) -> bool {
        let request = Arc::clone(context.request());

        let e = match context.transport().send(request).await {
            Ok(()) => {
                context.advance(RequestStatus::Sent);
                trace!("request {:?} written", context.request());
                return true;
            }
            Err(e) => e,
        };

        if context.retries() < self.max_write_retries && context.advance(RequestStatus::Retry) {
            let attempt = context.increment_retry() + 1;
            debug!(
                "write of {:?} failed ({}), retry {}/{}",
                context.request(),
                e,
                attempt,
                self.max_write_retries
            );
            self.sessions.delete_value(&value);

            if let Err(rejected) = self.queue.try_send(context) {
                let context = match rejected {
                    TrySendError::Full(context) | TrySendError::Closed(context) => context,
                };
                error!("cannot requeue {:?} for retry: {}", context.request(), e);
                context.complete(Err(e));
            }
            return false;
        }

        error!("failed to send request {:?}: {}", context.request(), e);
        self.sessions.settle(&value, Err(e));
        false
    }
}
