use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::{debug, trace};

use super::{Channel, ChannelHandler, ChannelPool, Transport};
use crate::{
    error::{Error, Result},
    message::{Message, Protocol},
};

fn recipient<P: Protocol>(request: &P::Request) -> Result<SocketAddr> {
    request
        .recipient()
        .ok_or_else(|| Error::UnresolvedAddress(format!("{:?}", request)))
}

async fn connect<P: Protocol>(
    address: SocketAddr,
    handler: &Arc<dyn ChannelHandler<P>>,
) -> Result<Arc<Channel<P>>> {
    let (channel, reader) = Channel::connect(address).await?;
    handler.on_create(&channel, reader);
    Ok(channel)
}

async fn write<P: Protocol>(
    handler: &Arc<dyn ChannelHandler<P>>,
    channel: &Arc<Channel<P>>,
    request: &Arc<P::Request>,
    bytes: &[u8],
) -> Result<()> {
    handler.on_acquire(channel);
    let written = channel.write(request, bytes).await;
    handler.on_release(channel);
    written
}

/// Opens a new connection for every request. The connection stays up until
/// the server hangs up or the transport is closed.
pub struct TcpTransport<P: Protocol> {
    handler: Arc<dyn ChannelHandler<P>>,
    pool: ChannelPool<SocketAddr, P>,
}

impl<P: Protocol> TcpTransport<P> {
    pub fn new(handler: Arc<dyn ChannelHandler<P>>) -> Self {
        TcpTransport {
            handler,
            pool: ChannelPool::new(),
        }
    }
}

#[async_trait]
impl<P: Protocol> Transport<P> for TcpTransport<P> {
    async fn send(&self, request: Arc<P::Request>) -> Result<()> {
        let address = recipient::<P>(&request)?;
        let bytes = P::encode(&request)?;

        let channel = connect(address, &self.handler).await?;
        self.pool.track(&channel);

        write(&self.handler, &channel, &request, &bytes).await
    }

    async fn close(&self) {
        self.pool.close_all().await;
    }
}

/// One connection per server, reused across requests.
///
/// RCON authentication is bound to the connection, so a client that issues
/// its commands one at a time keeps talking over the socket it authenticated.
pub struct PooledTcpTransport<P: Protocol> {
    handler: Arc<dyn ChannelHandler<P>>,
    pool: ChannelPool<SocketAddr, P>,
}

impl<P: Protocol> PooledTcpTransport<P> {
    pub fn new(handler: Arc<dyn ChannelHandler<P>>) -> Self {
        PooledTcpTransport {
            handler,
            pool: ChannelPool::new(),
        }
    }

    pub fn pool(&self) -> &ChannelPool<SocketAddr, P> {
        &self.pool
    }
}

#[async_trait]
impl<P: Protocol> Transport<P> for PooledTcpTransport<P> {
    async fn send(&self, request: Arc<P::Request>) -> Result<()> {
        let address = recipient::<P>(&request)?;
        let bytes = P::encode(&request)?;

        let channel = match self.pool.acquire(&address) {
            Some(channel) => channel,
            None => {
                debug!("opening connection to {}", address);
                let channel = connect(address, &self.handler).await?;
                self.pool.track(&channel);
                channel
            }
        };

        let written = write(&self.handler, &channel, &request, &bytes).await;
        trace!("releasing channel {}", channel);
        self.pool.release(address, channel);
        written
    }

    async fn close(&self) {
        self.pool.close_all().await;
    }
}
