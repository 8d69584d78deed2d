//! The capability set a protocol hands to the correlation engine.
//!
//! The engine never looks at wire formats. A protocol is a zero sized marker
//! type implementing [Protocol]: it names its request and response types, the
//! discriminant used to tell messages apart, which response kind answers which
//! request kind, and how to turn requests into bytes and bytes into responses.
use std::{fmt, hash::Hash, net::SocketAddr};

use crate::error::Result;

/// A request or response travelling to or from a game server.
pub trait Message: fmt::Debug + Send + Sync + 'static {
    type Kind;

    /// Discriminant used to pair requests with responses.
    fn kind(&self) -> Self::Kind;

    fn sender(&self) -> Option<SocketAddr>;

    fn recipient(&self) -> Option<SocketAddr>;
}

pub trait Protocol: Send + Sync + 'static {
    type Kind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static;
    type Request: Message<Kind = Self::Kind>;
    type Response: Message<Kind = Self::Kind>;

    /// Request kind to expected response kind, one entry per request kind.
    fn response_mappings() -> Vec<(Self::Kind, Self::Kind)>;

    fn encode(request: &Self::Request) -> Result<Vec<u8>>;

    /// Decode a single frame (one datagram, or one length-prefixed stream frame).
    fn decode(frame: &[u8], sender: SocketAddr) -> Result<Self::Response>;
}

/// Borrowed view of either side of an exchange, used when deriving session ids.
pub enum Envelope<'a, P: Protocol> {
    Request(&'a P::Request),
    Response(&'a P::Response),
}

impl<P: Protocol> Envelope<'_, P> {
    pub fn kind(&self) -> P::Kind {
        match self {
            Envelope::Request(request) => request.kind(),
            Envelope::Response(response) => response.kind(),
        }
    }
}

impl<P: Protocol> fmt::Debug for Envelope<'_, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Envelope::Request(request) => write!(f, "Request({:?})", request),
            Envelope::Response(response) => write!(f, "Response({:?})", response),
        }
    }
}
