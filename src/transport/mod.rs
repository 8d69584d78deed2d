//! Transports acquire a channel for a request, write its encoded bytes and
//! report when the write went through. Responses never come back through
//! [Transport::send]; they are decoded by the channel's reader and handed to
//! the messenger through a [ResponseSink].
use std::sync::Arc;

use async_trait::async_trait;

use crate::{
    error::{ResponseError, Result},
    message::Protocol,
};

pub mod channel;
pub mod pool;
pub mod tcp;
pub mod udp;

pub use channel::{Channel, ChannelReader};
pub use pool::ChannelPool;
pub use tcp::{PooledTcpTransport, TcpTransport};
pub use udp::{PooledUdpTransport, UdpTransport};

/// Where decoded responses (or decode failures) are delivered.
pub type ResponseSink<P> = Arc<
    dyn Fn(std::result::Result<<P as Protocol>::Response, ResponseError<<P as Protocol>::Request>>)
        + Send
        + Sync,
>;

#[async_trait]
pub trait Transport<P: Protocol>: Send + Sync {
    /// Writes the request. Resolves once the write is acknowledged, which
    /// says nothing about whether a response will ever arrive.
    async fn send(&self, request: Arc<P::Request>) -> Result<()>;

    async fn close(&self);
}

/// Channel lifecycle hooks. Protocol layers attach their decoding here
/// without the transports knowing anything about wire formats.
pub trait ChannelHandler<P: Protocol>: Send + Sync + 'static {
    /// Called once for every new channel, with the read side of it.
    fn on_create(&self, channel: &Arc<Channel<P>>, reader: ChannelReader);

    fn on_acquire(&self, _channel: &Arc<Channel<P>>) {}

    fn on_release(&self, _channel: &Arc<Channel<P>>) {}
}

/// Default handler: spawns a reader that decodes every inbound frame with
/// the protocol and pushes the result into the sink.
pub struct Pipeline<P: Protocol> {
    sink: ResponseSink<P>,
}

impl<P: Protocol> Pipeline<P> {
    pub fn new(sink: ResponseSink<P>) -> Arc<Self> {
        Arc::new(Pipeline { sink })
    }
}

impl<P: Protocol> ChannelHandler<P> for Pipeline<P> {
    fn on_create(&self, channel: &Arc<Channel<P>>, reader: ChannelReader) {
        let task = tokio::spawn(channel::read_loop(
            Arc::clone(channel),
            reader,
            Arc::clone(&self.sink),
        ));
        channel.attach_reader(task.abort_handle());
    }
}
