//! Asynchronous clients for Source engine game servers: server queries
//! ([A2S](https://developer.valvesoftware.com/wiki/Server_queries)),
//! [RCON](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol) and the
//! Steam master server.
//!
//! Every client is a thin layer over one [messenger::Messenger], which queues
//! requests, writes them through a [transport::Transport] and pairs each
//! decoded response with the request waiting for it.
pub mod error;
pub mod master;
pub mod message;
pub mod messenger;
pub mod query;
pub mod rcon;
pub mod request;
pub mod session;
pub mod transport;

pub use error::{Error, Result};
pub use messenger::{Messenger, MessengerConfig, ProcessingMode};
