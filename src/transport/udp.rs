use std::{net::SocketAddr, sync::Arc};

use async_trait::async_trait;
use log::trace;
use tokio::sync::OnceCell;

use super::{Channel, ChannelHandler, ChannelPool, Transport};
use crate::{
    error::Result,
    message::{Message, Protocol},
};

fn any_address() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 0))
}

async fn open<P: Protocol>(
    address: SocketAddr,
    handler: &Arc<dyn ChannelHandler<P>>,
) -> Result<Arc<Channel<P>>> {
    let (channel, reader) = Channel::bind(address).await?;
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

/// Every request goes out of one socket, bound on first use.
pub struct UdpTransport<P: Protocol> {
    bind_address: SocketAddr,
    handler: Arc<dyn ChannelHandler<P>>,
    channel: OnceCell<Arc<Channel<P>>>,
}

impl<P: Protocol> UdpTransport<P> {
    pub fn new(handler: Arc<dyn ChannelHandler<P>>) -> Self {
        Self::bind_to(any_address(), handler)
    }

    pub fn bind_to(bind_address: SocketAddr, handler: Arc<dyn ChannelHandler<P>>) -> Self {
        UdpTransport {
            bind_address,
            handler,
            channel: OnceCell::new(),
        }
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.channel.get().map(|channel| channel.local_addr())
    }
}

#[async_trait]
impl<P: Protocol> Transport<P> for UdpTransport<P> {
    async fn send(&self, request: Arc<P::Request>) -> Result<()> {
        let bytes = P::encode(&request)?;
        let channel = self
            .channel
            .get_or_try_init(|| open(self.bind_address, &self.handler))
            .await?;

        write(&self.handler, channel, &request, &bytes).await
    }

    async fn close(&self) {
        if let Some(channel) = self.channel.get() {
            channel.close().await;
        }
    }
}

impl<P: Protocol> Drop for UdpTransport<P> {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.get() {
            channel.abort_reader();
        }
    }
}

/// Sockets pooled by request kind, so each kind of query has its own
/// source port and concurrent requests of one kind can borrow extra sockets.
pub struct PooledUdpTransport<P: Protocol> {
    bind_address: SocketAddr,
    handler: Arc<dyn ChannelHandler<P>>,
    pool: ChannelPool<P::Kind, P>,
}

impl<P: Protocol> PooledUdpTransport<P> {
    pub fn new(handler: Arc<dyn ChannelHandler<P>>) -> Self {
        Self::bind_to(any_address(), handler)
    }

    pub fn bind_to(bind_address: SocketAddr, handler: Arc<dyn ChannelHandler<P>>) -> Self {
        PooledUdpTransport {
            bind_address,
            handler,
            pool: ChannelPool::new(),
        }
    }

    pub fn pool(&self) -> &ChannelPool<P::Kind, P> {
        &self.pool
    }
}

#[async_trait]
impl<P: Protocol> Transport<P> for PooledUdpTransport<P> {
    async fn send(&self, request: Arc<P::Request>) -> Result<()> {
        let bytes = P::encode(&request)?;
        let kind = request.kind();

        let channel = match self.pool.acquire(&kind) {
            Some(channel) => channel,
            None => {
                let channel = open(self.bind_address, &self.handler).await?;
                trace!("created udp channel {} for {}", channel, kind);
                self.pool.track(&channel);
                channel
            }
        };

        let written = write(&self.handler, &channel, &request, &bytes).await;
        self.pool.release(kind, channel);
        written
    }

    async fn close(&self) {
        self.pool.close_all().await;
    }
}
