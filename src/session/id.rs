use std::{collections::HashMap, fmt, net::SocketAddr};

use crate::{
    error::{Error, Result},
    message::{Envelope, Message, Protocol},
};

/// Normalized key correlating a request with the response it expects.
///
/// Ids compare case-insensitively; they are upper-cased on construction so a
/// request-derived id and a response-derived id end up byte-identical.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl AsRef<str>) -> Self {
        SessionId(id.as_ref().to_ascii_uppercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.0)
    }
}

/// Derives session ids from requests and responses.
///
/// Both sides must normalize identically: the id of a request has to equal
/// the id of the response that answers it.
pub trait SessionIdFactory<P: Protocol>: Send + Sync + 'static {
    fn create_id(&self, message: Envelope<'_, P>) -> Result<SessionId>;

    /// A copy of `id` that shares nothing with the registry key.
    fn duplicate(&self, id: &SessionId) -> SessionId {
        SessionId(id.0.as_str().to_owned())
    }
}

/// `KIND:ip:port`, where a request uses the response kind it expects and its
/// recipient, and a response uses its own kind and its sender.
pub struct DefaultSessionIdFactory<P: Protocol> {
    lookup: HashMap<P::Kind, P::Kind>,
}

impl<P: Protocol> DefaultSessionIdFactory<P> {
    pub fn new() -> Self {
        DefaultSessionIdFactory {
            lookup: P::response_mappings().into_iter().collect(),
        }
    }

    pub fn expected_response(&self, request: P::Kind) -> Option<P::Kind> {
        self.lookup.get(&request).copied()
    }

    /// The `KIND:ip:port` part shared by every factory.
    pub fn base_id(&self, message: &Envelope<'_, P>) -> Result<String> {
        let (kind, address) = match message {
            Envelope::Request(request) => {
                let kind = self
                    .expected_response(request.kind())
                    .ok_or_else(|| Error::UnmappedRequest(request.kind().to_string()))?;
                (kind, request.recipient())
            }
            Envelope::Response(response) => (response.kind(), response.sender()),
        };

        let address = address.ok_or_else(|| Error::UnresolvedAddress(format!("{:?}", message)))?;

        Ok(format_id(&kind, address))
    }
}

impl<P: Protocol> Default for DefaultSessionIdFactory<P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<P: Protocol> SessionIdFactory<P> for DefaultSessionIdFactory<P> {
    fn create_id(&self, message: Envelope<'_, P>) -> Result<SessionId> {
        self.base_id(&message).map(SessionId::new)
    }
}

fn format_id(kind: &impl fmt::Display, address: SocketAddr) -> String {
    format!("{}:{}:{}", kind, address.ip(), address.port())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum TestKind {
        Info,
        Ping,
        Orphan,
    }

    impl fmt::Display for TestKind {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            let name = match self {
                TestKind::Info => "INFO",
                TestKind::Ping => "PING",
                TestKind::Orphan => "ORPHAN",
            };
            f.write_str(name)
        }
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct TestMessage {
        pub kind: TestKind,
        pub address: Option<SocketAddr>,
        pub body: &'static str,
    }

    impl TestMessage {
        pub fn request(kind: TestKind, address: &str) -> Self {
            TestMessage {
                kind,
                address: address.parse().ok(),
                body: "",
            }
        }

        pub fn response(kind: TestKind, address: &str, body: &'static str) -> Self {
            TestMessage {
                kind,
                address: address.parse().ok(),
                body,
            }
        }
    }

    impl Message for TestMessage {
        type Kind = TestKind;

        fn kind(&self) -> TestKind {
            self.kind
        }

        fn sender(&self) -> Option<SocketAddr> {
            self.address
        }

        fn recipient(&self) -> Option<SocketAddr> {
            self.address
        }
    }

    /// Protocol used by the engine's unit tests. `Orphan` has no mapping.
    pub struct TestProtocol;

    impl Protocol for TestProtocol {
        type Kind = TestKind;
        type Request = TestMessage;
        type Response = TestMessage;

        fn response_mappings() -> Vec<(TestKind, TestKind)> {
            vec![(TestKind::Info, TestKind::Info), (TestKind::Ping, TestKind::Ping)]
        }

        fn encode(request: &TestMessage) -> Result<Vec<u8>> {
            Ok(request.body.as_bytes().to_vec())
        }

        fn decode(_frame: &[u8], sender: SocketAddr) -> Result<TestMessage> {
            Ok(TestMessage {
                kind: TestKind::Info,
                address: Some(sender),
                body: "decoded",
            })
        }
    }

    #[test]
    fn request_and_response_ids_match() {
        let factory = DefaultSessionIdFactory::<TestProtocol>::new();
        let request = TestMessage::request(TestKind::Info, "127.0.0.1:27015");
        let response = TestMessage::response(TestKind::Info, "127.0.0.1:27015", "hi");

        let request_id = factory.create_id(Envelope::Request(&request)).unwrap();
        let response_id = factory.create_id(Envelope::Response(&response)).unwrap();

        assert_eq!(request_id, response_id);
        assert_eq!(request_id.as_str(), "INFO:127.0.0.1:27015");
    }

    #[test]
    fn ids_compare_case_insensitively() {
        assert_eq!(SessionId::new("info:10.0.0.1:1"), SessionId::new("INFO:10.0.0.1:1"));
    }

    #[test]
    fn unresolved_address_fails() {
        let factory = DefaultSessionIdFactory::<TestProtocol>::new();
        let request = TestMessage::request(TestKind::Info, "not an address");

        let result = factory.create_id(Envelope::Request(&request));
        assert!(matches!(result, Err(Error::UnresolvedAddress(_))));
    }

    #[test]
    fn unmapped_request_kind_fails() {
        let factory = DefaultSessionIdFactory::<TestProtocol>::new();
        let request = TestMessage::request(TestKind::Orphan, "127.0.0.1:1");

        let result = factory.create_id(Envelope::Request(&request));
        assert!(matches!(result, Err(Error::UnmappedRequest(kind)) if kind == "ORPHAN"));
    }

    #[test]
    fn duplicate_is_an_equal_copy() {
        let factory = DefaultSessionIdFactory::<TestProtocol>::new();
        let id = SessionId::new("PING:127.0.0.1:9");
        let copy = factory.duplicate(&id);

        assert_eq!(id, copy);
        assert_ne!(id.as_str().as_ptr(), copy.as_str().as_ptr());
    }
}
