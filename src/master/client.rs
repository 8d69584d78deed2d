use std::{
    net::{SocketAddr, SocketAddrV4},
    sync::Arc,
    time::Duration,
};

use log::{debug, warn};

use super::{
    MasterProtocol, MasterServerRequest, MasterServerType, Region, ServerFilter, TERMINATOR,
};
use crate::{
    error::{Error, Result},
    messenger::{Messenger, MessengerConfig, ProcessingMode},
    session::DefaultSessionIdFactory,
    transport::{Pipeline, UdpTransport},
};

pub const DEFAULT_PAGE_TIMEOUT: Duration = Duration::from_secs(3);

/// Pages through a master server's list of game servers.
///
/// ## Example
/// ```no_run
/// use gamequery::master::{MasterServerClient, MasterServerType, Region, ServerFilter};
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let client = MasterServerClient::new().with_max_retries(2);
///     let filter = ServerFilter::new().app_id(440).dedicated(true);
///
///     let servers = client
///         .server_list(MasterServerType::Source, Region::All, &filter, |server| {
///             println!("{}", server)
///         })
///         .await?;
///     println!("{} servers", servers.len());
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct MasterServerClient {
    messenger: Messenger<MasterProtocol>,
    max_retries: u32,
}

impl MasterServerClient {
    pub fn new() -> Self {
        Self::with_config(
            MessengerConfig::new(ProcessingMode::Asynchronous).with_read_timeout(DEFAULT_PAGE_TIMEOUT),
        )
    }

    pub fn with_config(config: MessengerConfig) -> Self {
        let messenger = Messenger::new(
            config,
            Arc::new(DefaultSessionIdFactory::<MasterProtocol>::new()),
            |sink| Arc::new(UdpTransport::<MasterProtocol>::new(Pipeline::new(sink))),
        );
        MasterServerClient {
            messenger,
            max_retries: 0,
        }
    }

    /// Resend a page request up to `retries` times when it times out.
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    pub async fn server_list<F>(
        &self,
        kind: MasterServerType,
        region: Region,
        filter: &ServerFilter,
        callback: F,
    ) -> Result<Vec<SocketAddrV4>>
    where
        F: FnMut(SocketAddrV4),
    {
        let master = tokio::net::lookup_host(kind.host())
            .await
            .map_err(Error::UnreachableHost)?
            .find(SocketAddr::is_ipv4)
            .ok_or_else(|| Error::UnresolvedAddress(kind.host().to_owned()))?;

        self.server_list_from(master, region, filter, callback).await
    }

    /// Collects every server `master` knows about, calling `callback` for each
    /// one as its page arrives.
    ///
    /// A page that times out after all retries ends the listing early with
    /// whatever was collected so far.
    pub async fn server_list_from<F>(
        &self,
        master: SocketAddr,
        region: Region,
        filter: &ServerFilter,
        mut callback: F,
    ) -> Result<Vec<SocketAddrV4>>
    where
        F: FnMut(SocketAddrV4),
    {
        let filter = filter.to_string();
        let mut servers = Vec::new();
        let mut seed = TERMINATOR;
        let mut attempts = 0;

        loop {
            debug!("requesting servers after {} from {} (filter: '{}')", seed, master, filter);

            let request = MasterServerRequest {
                master,
                region,
                seed,
                filter: filter.clone(),
            };

            let page = match self.messenger.send(request).await {
                Ok(page) => page,
                Err(e @ Error::ReadTimeout { .. }) => {
                    if attempts < self.max_retries {
                        attempts += 1;
                        debug!("{}, retrying ({}/{})", e, attempts, self.max_retries);
                        continue;
                    }
                    warn!(
                        "master server {} stopped answering after {} server(s): {}",
                        master,
                        servers.len(),
                        e
                    );
                    break;
                }
                Err(e) => return Err(e),
            };
            attempts = 0;

            for &server in page.servers.iter().filter(|&&server| server != seed && server != TERMINATOR) {
                callback(server);
                servers.push(server);
            }

            match page.servers.last() {
                Some(&last) if last != TERMINATOR && last != seed => seed = last,
                _ => break,
            }
        }

        debug!("got {} server(s) from {}", servers.len(), master);
        Ok(servers)
    }

    pub async fn close(&self) {
        self.messenger.close().await;
    }
}

impl Default for MasterServerClient {
    fn default() -> Self {
        Self::new()
    }
}
