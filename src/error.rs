use std::{fmt, net::SocketAddr, sync::Arc, time::Duration};

use thiserror::Error;

use crate::session::SessionId;

pub type Result<T> = std::result::Result<T, Error>;

/// Possible errors for the package.
#[derive(Error, Debug)]
pub enum Error {
    /// Returned by `send()` when the request queue has no room left.
    #[error("request queue is full (capacity: {0})")]
    QueueFull(usize),
    /// The messenger was closed, or the request was dropped before it settled.
    #[error("messenger is closed")]
    Closed,
    /// `send()` was called outside of a tokio runtime and no handle was configured.
    #[error("no tokio runtime available to drive requests")]
    NoRuntime,
    /// Returned if the host is down or behind a firewall.
    #[error("host cannot be reached")]
    UnreachableHost(#[source] std::io::Error),
    /// The transport could not push the request bytes to the host.
    #[error("cannot send message to host")]
    SendError(#[source] std::io::Error),
    /// The channel was established, but reading from the socket failed.
    #[error("cannot receive response from host")]
    ReceiveError(#[source] std::io::Error),
    /// Returned if the server did not respond in time.
    #[error("timeout for '{id}' ({secs:.3}s elapsed)", secs = .elapsed.as_secs_f64())]
    ReadTimeout { id: SessionId, elapsed: Duration },
    /// Protocol level failure reported for a specific request.
    #[error("server rejected the request: {0}")]
    Response(String),
    /// The message has no sender/recipient address to derive a session id from.
    #[error("unable to resolve address for message: {0}")]
    UnresolvedAddress(String),
    /// No response type was registered for the request kind.
    #[error("no response mapping registered for request kind '{0}'")]
    UnmappedRequest(String),
    /// Returned if we received a packet that does not have a type known to us.
    #[error("unknown packet type: {0}")]
    UnknownPacketType(i32),
    /// Returned if the packet is truncated or its header is mangled.
    #[error("packet malformed: {0}")]
    MalformedPacket(String),
    /// Returned if a string field is not valid utf-8.
    #[error("packet body malformed (not valid ascii or utf-8)")]
    MalformedPacketBody(#[from] std::str::Utf8Error),
    /// Split (multi-datagram) responses are not reassembled.
    #[error("split packets are not supported")]
    SplitPacket,
    /// Returned if you can't remember the password.
    #[error("bad password")]
    AuthenticationError,
    /// A command was issued to a server we never authenticated against.
    #[error("not authenticated with {0}")]
    NotAuthenticated(SocketAddr),
}

/// An error raised by the protocol layer while handling inbound data.
///
/// When the channel knows which request the failure belongs to, the request
/// is attached and the error is delivered straight to that request's caller.
pub struct ResponseError<Q> {
    pub request: Option<Arc<Q>>,
    pub error: Error,
}

impl<Q> ResponseError<Q> {
    pub fn new(error: Error) -> Self {
        ResponseError {
            request: None,
            error,
        }
    }

    pub fn for_request(request: Arc<Q>, error: Error) -> Self {
        ResponseError {
            request: Some(request),
            error,
        }
    }
}

impl<Q: fmt::Debug> fmt::Debug for ResponseError<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseError")
            .field("request", &self.request)
            .field("error", &self.error)
            .finish()
    }
}

impl<Q> fmt::Display for ResponseError<Q> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.error, f)
    }
}
