use std::{collections::HashMap, net::SocketAddr, sync::Arc};

use log::trace;

use super::{ChallengeType, Player, QueryProtocol, QueryRequest, QueryResponse, SourceServer};
use crate::{
    error::{Error, Result},
    messenger::{Messenger, MessengerConfig, ProcessingMode},
    session::DefaultSessionIdFactory,
    transport::{Pipeline, PooledUdpTransport},
};

/// Queries Source engine servers. Any number of queries, to any number of
/// servers, may be in flight at once.
///
/// ## Example
/// ```no_run
/// use gamequery::query::QueryClient;
/// use std::error::Error;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn Error>> {
///     let client = QueryClient::new();
///     let info = client.server_info("127.0.0.1:27015".parse()?).await?;
///     println!("{} is playing {}", info.name, info.map);
///     client.close().await;
///     Ok(())
/// }
/// ```
pub struct QueryClient {
    messenger: Messenger<QueryProtocol>,
}

fn unexpected(response: QueryResponse) -> Error {
    Error::MalformedPacket(format!("unexpected reply {:?}", response))
}

impl QueryClient {
    pub fn new() -> Self {
        Self::with_config(MessengerConfig::new(ProcessingMode::Asynchronous))
    }

    pub fn with_config(config: MessengerConfig) -> Self {
        let messenger = Messenger::new(
            config,
            Arc::new(DefaultSessionIdFactory::<QueryProtocol>::new()),
            |sink| Arc::new(PooledUdpTransport::<QueryProtocol>::new(Pipeline::new(sink))),
        );
        QueryClient { messenger }
    }

    pub async fn server_info(&self, address: SocketAddr) -> Result<SourceServer> {
        match self.messenger.send(QueryRequest::Info(address)).await? {
            QueryResponse::Info(_, server) => Ok(server),
            other => Err(unexpected(other)),
        }
    }

    pub async fn challenge(&self, address: SocketAddr, kind: ChallengeType) -> Result<i32> {
        match self.messenger.send(QueryRequest::Challenge(address, kind)).await? {
            QueryResponse::Challenge(_, challenge) => {
                trace!("got challenge {} from {}", challenge, address);
                Ok(challenge)
            }
            other => Err(unexpected(other)),
        }
    }

    /// Fetches a challenge number, then the player list.
    pub async fn players(&self, address: SocketAddr) -> Result<Vec<Player>> {
        let challenge = self.challenge(address, ChallengeType::Players).await?;
        self.players_with_challenge(address, challenge).await
    }

    pub async fn players_with_challenge(&self, address: SocketAddr, challenge: i32) -> Result<Vec<Player>> {
        match self.messenger.send(QueryRequest::Players(address, challenge)).await? {
            QueryResponse::Players(_, players) => Ok(players),
            other => Err(unexpected(other)),
        }
    }

    /// Fetches a challenge number, then the server's rules (cvars).
    pub async fn rules(&self, address: SocketAddr) -> Result<HashMap<String, String>> {
        let challenge = self.challenge(address, ChallengeType::Rules).await?;
        self.rules_with_challenge(address, challenge).await
    }

    pub async fn rules_with_challenge(
        &self,
        address: SocketAddr,
        challenge: i32,
    ) -> Result<HashMap<String, String>> {
        match self.messenger.send(QueryRequest::Rules(address, challenge)).await? {
            QueryResponse::Rules(_, rules) => Ok(rules),
            other => Err(unexpected(other)),
        }
    }

    pub async fn close(&self) {
        self.messenger.close().await;
    }
}

impl Default for QueryClient {
    fn default() -> Self {
        Self::new()
    }
}
