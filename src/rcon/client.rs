use std::{
    collections::HashSet,
    net::SocketAddr,
    sync::{
        atomic::{AtomicI32, Ordering},
        Arc,
    },
};

use log::{debug, trace};
use parking_lot::Mutex;

use super::{RconProtocol, RconRequest, RconSessionIdFactory};
use crate::{
    error::{Error, Result},
    messenger::{Messenger, MessengerConfig, ProcessingMode},
    transport::{Pipeline, PooledTcpTransport},
};

/// Asynchronous rcon client. Commands are written one at a time per client,
/// each waiting for its reply before the next goes out.
///
/// ## Example
/// ```no_run
/// use gamequery::rcon::RconClient;
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let server = "127.0.0.1:27015".parse()?;
///     let client = RconClient::new();
///
///     if client.authenticate(server, "<put rcon password here>").await? {
///         let response = client.execute(server, "echo hi").await?;
///         assert_eq!(response, "hi");
///     }
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct RconClient {
    messenger: Messenger<RconProtocol>,
    next_packet_id: AtomicI32,
    authenticated: Mutex<HashSet<SocketAddr>>,
}

impl RconClient {
    pub fn new() -> Self {
        Self::with_config(MessengerConfig::new(ProcessingMode::Synchronous))
    }

    pub fn with_config(config: MessengerConfig) -> Self {
        let messenger = Messenger::new(
            config,
            Arc::new(RconSessionIdFactory::default()),
            |sink| Arc::new(PooledTcpTransport::<RconProtocol>::new(Pipeline::new(sink))),
        );

        RconClient {
            messenger,
            // IDs below 100 are left alone, -1 is what srcds sends on a bad password
            next_packet_id: AtomicI32::new(100),
            authenticated: Mutex::new(HashSet::new()),
        }
    }

    fn next_packet_id(&self) -> i32 {
        self.next_packet_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Logs in to `address`. A wrong password resolves to `Ok(false)`.
    pub async fn authenticate(&self, address: SocketAddr, password: &str) -> Result<bool> {
        let request = RconRequest::auth(address, self.next_packet_id(), password);
        trace!("sending auth packet {} to {}", request.id(), address);

        match self.messenger.send(request).await {
            Ok(_) => {
                debug!("authenticated with {}", address);
                self.authenticated.lock().insert(address);
                Ok(true)
            }
            Err(Error::AuthenticationError) => {
                debug!("{} rejected the password", address);
                self.authenticated.lock().remove(&address);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    pub fn is_authenticated(&self, address: SocketAddr) -> bool {
        self.authenticated.lock().contains(&address)
    }

    /// Runs `command` on a server we authenticated with and returns its output.
    pub async fn execute(&self, address: SocketAddr, command: &str) -> Result<String> {
        if !self.is_authenticated(address) {
            return Err(Error::NotAuthenticated(address));
        }

        let request = RconRequest::command(address, self.next_packet_id(), command);
        trace!("sending command packet {} to {}", request.id(), address);

        let response = self.messenger.send(request).await?;
        Ok(response.body().to_owned())
    }

    pub async fn close(&self) {
        self.authenticated.lock().clear();
        self.messenger.close().await;
    }
}

impl Default for RconClient {
    fn default() -> Self {
        Self::new()
    }
}
