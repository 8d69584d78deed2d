use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Weak,
    },
    time::Duration,
};

use log::{debug, warn};
use parking_lot::Mutex;
use tokio::{runtime::Handle, task::AbortHandle, time::Instant};

use super::id::{SessionId, SessionIdFactory};
use crate::{
    error::{Error, Result},
    message::{Envelope, Message, Protocol},
    request::{RequestContext, RequestStatus},
};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Registry record for one in-flight request.
pub struct SessionValue<P: Protocol> {
    id: SessionId,
    index: u64,
    context: Arc<RequestContext<P>>,
    expected_response: Option<P::Kind>,
    timeout: Mutex<Option<AbortHandle>>,
    registered_at: Instant,
}

impl<P: Protocol> SessionValue<P> {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn context(&self) -> &Arc<RequestContext<P>> {
        &self.context
    }

    pub fn expected_response(&self) -> Option<P::Kind> {
        self.expected_response
    }

    pub fn registered_at(&self) -> Instant {
        self.registered_at
    }

    pub fn has_timeout(&self) -> bool {
        self.timeout.lock().is_some()
    }

    fn cancel_timeout(&self) {
        if let Some(timeout) = self.timeout.lock().take() {
            timeout.abort();
        }
    }
}

impl<P: Protocol> fmt::Debug for SessionValue<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionValue")
            .field("id", &self.id)
            .field("index", &self.index)
            .field("request", self.context.request())
            .field("registered", &self.registered_at.elapsed())
            .finish()
    }
}

type Bucket<P> = BTreeMap<u64, Arc<SessionValue<P>>>;

struct Registry<P: Protocol> {
    factory: Arc<dyn SessionIdFactory<P>>,
    directory: HashMap<P::Kind, P::Kind>,
    sessions: Mutex<HashMap<SessionId, Bucket<P>>>,
    index: AtomicU64,
    read_timeout: Duration,
    closed: AtomicBool,
}

/// Maps session ids to in-flight requests and owns their read timeouts.
///
/// Several requests may share one id (the same query sent twice to the same
/// server). They are kept in registration order and lookups always resolve
/// the oldest one still pending.
pub struct SessionManager<P: Protocol> {
    inner: Arc<Registry<P>>,
}

impl<P: Protocol> Clone for SessionManager<P> {
    fn clone(&self) -> Self {
        SessionManager {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> SessionManager<P> {
    pub fn new(factory: Arc<dyn SessionIdFactory<P>>, read_timeout: Duration) -> Self {
        SessionManager {
            inner: Arc::new(Registry {
                factory,
                directory: P::response_mappings().into_iter().collect(),
                sessions: Mutex::new(HashMap::new()),
                index: AtomicU64::new(0),
                read_timeout,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn factory(&self) -> &Arc<dyn SessionIdFactory<P>> {
        &self.inner.factory
    }

    pub fn read_timeout(&self) -> Duration {
        self.inner.read_timeout
    }

    /// Registers the request and arms its read timeout.
    pub fn create(&self, context: &Arc<RequestContext<P>>) -> Result<SessionId> {
        self.register(context).map(|value| value.id().clone())
    }

    pub(crate) fn register(&self, context: &Arc<RequestContext<P>>) -> Result<Arc<SessionValue<P>>> {
        if self.inner.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }

        let runtime = Handle::try_current().map_err(|_| Error::NoRuntime)?;
        let id = self
            .inner
            .factory
            .create_id(Envelope::Request(context.request().as_ref()))?;
        let index = self.inner.index.fetch_add(1, Ordering::AcqRel) + 1;

        debug!("registering session with id '{}' (index: {})", id, index);

        let value = Arc::new(SessionValue {
            id: id.clone(),
            index,
            context: Arc::clone(context),
            expected_response: self.inner.directory.get(&context.request().kind()).copied(),
            timeout: Mutex::new(None),
            registered_at: Instant::now(),
        });

        self.inner
            .sessions
            .lock()
            .entry(id.clone())
            .or_default()
            .insert(index, Arc::clone(&value));

        self.arm_timeout(&runtime, &value);
        context.advance(RequestStatus::Registered);

        Ok(value)
    }

    fn arm_timeout(&self, runtime: &Handle, value: &Arc<SessionValue<P>>) {
        let registry: Weak<Registry<P>> = Arc::downgrade(&self.inner);
        let id = value.id.clone();
        let index = value.index;
        let read_timeout = self.inner.read_timeout;

        let timer = runtime.spawn(async move {
            tokio::time::sleep(read_timeout).await;
            if let Some(inner) = registry.upgrade() {
                SessionManager { inner }.expire(&id, index);
            }
        });

        let mut slot = value.timeout.lock();
        if value.context.is_done() {
            timer.abort();
        } else {
            *slot = Some(timer.abort_handle());
        }
    }

    fn expire(&self, id: &SessionId, index: u64) {
        let value = self
            .inner
            .sessions
            .lock()
            .get(id)
            .and_then(|bucket| bucket.get(&index))
            .cloned();

        let Some(value) = value else {
            debug!("timer fired for '{}' but the session is already gone", id);
            return;
        };

        // the timer is firing, there is nothing left to abort
        value.timeout.lock().take();

        let elapsed = value.registered_at.elapsed();
        debug!("timeout occurred for session '{}' after {:?}", id, elapsed);

        let error = Error::ReadTimeout {
            id: self.inner.factory.duplicate(id),
            elapsed,
        };
        self.settle(&value, Err(error));
    }

    /// Oldest pending session registered under `id`.
    pub fn get_session(&self, id: &SessionId) -> Option<Arc<SessionValue<P>>> {
        self.inner
            .sessions
            .lock()
            .get(id)
            .and_then(|bucket| bucket.values().next())
            .cloned()
    }

    /// Derives the id of `message` and resolves the oldest session for it.
    pub fn get_session_for(&self, message: Envelope<'_, P>) -> Result<Option<Arc<SessionValue<P>>>> {
        let id = self.inner.factory.create_id(message)?;
        Ok(self.get_session(&id))
    }

    /// The session holding exactly this request, compared by identity so a
    /// duplicate registered under the same id is never picked by mistake.
    pub fn get_session_of(&self, request: &Arc<P::Request>) -> Option<Arc<SessionValue<P>>> {
        let owns = |value: &Arc<SessionValue<P>>| Arc::ptr_eq(value.context.request(), request);
        let sessions = self.inner.sessions.lock();

        match self.inner.factory.create_id(Envelope::Request(request.as_ref())) {
            Ok(id) => sessions.get(&id)?.values().find(|value| owns(*value)).cloned(),
            Err(_) => sessions
                .values()
                .flat_map(BTreeMap::values)
                .find(|value| owns(*value))
                .cloned(),
        }
    }

    /// Completes the request behind `value` and unregisters it. Returns
    /// `true` if this call was the one that settled the promise.
    pub fn settle(&self, value: &Arc<SessionValue<P>>, result: Result<P::Response>) -> bool {
        let settled = value.context.complete(result);
        self.delete_value(value);
        settled
    }

    /// Removes the oldest session registered under `id`.
    pub fn delete(&self, id: &SessionId) -> bool {
        match self.get_session(id) {
            Some(value) => self.delete_value(&value),
            None => false,
        }
    }

    /// Cancels the timeout of `value` and removes it. Removing a session
    /// that is already gone is a no-op.
    pub fn delete_value(&self, value: &SessionValue<P>) -> bool {
        value.cancel_timeout();

        let mut sessions = self.inner.sessions.lock();
        let Some(bucket) = sessions.get_mut(&value.id) else {
            return false;
        };
        let removed = bucket.remove(&value.index).is_some();
        if bucket.is_empty() {
            sessions.remove(&value.id);
        }

        if removed {
            debug!("unregistered session '{}' (index: {})", value.id, value.index);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.sessions.lock().values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Every registered session, ordered by id then index.
    pub fn entries(&self) -> Vec<Arc<SessionValue<P>>> {
        let sessions = self.inner.sessions.lock();
        let mut ids: Vec<&SessionId> = sessions.keys().collect();
        ids.sort();
        ids.into_iter()
            .flat_map(|id| sessions[id].values().cloned())
            .collect()
    }

    /// Cancels every timer and clears the registry. Pending sessions are
    /// reported, not failed; their callers see `Error::Closed` once the last
    /// reference to the request is gone.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);

        let remaining = self.entries();
        if !remaining.is_empty() {
            warn!(
                "session manager closed with {} pending session(s)",
                remaining.len()
            );
            for value in &remaining {
                warn!("\tpending: {:?}", value);
            }
        }

        for value in &remaining {
            value.cancel_timeout();
        }
        self.inner.sessions.lock().clear();
    }
}
