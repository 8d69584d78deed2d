//! Correlation registry: session ids and the manager that owns them.
pub mod id;
pub mod manager;

pub use id::{DefaultSessionIdFactory, SessionId, SessionIdFactory};
pub use manager::{SessionManager, SessionValue, DEFAULT_READ_TIMEOUT};
