use std::{
    fmt,
    io::ErrorKind,
    net::SocketAddr,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use log::{debug, error, trace};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{
        tcp::{OwnedReadHalf, OwnedWriteHalf},
        TcpStream, UdpSocket,
    },
    task::AbortHandle,
};

use super::ResponseSink;
use crate::{
    error::{Error, ResponseError, Result},
    message::{Message, Protocol},
};

/// Largest stream frame we accept before giving up on the connection.
const MAX_FRAME_SIZE: usize = 1 << 20;
const MAX_DATAGRAM_SIZE: usize = 65_535;

/// Read side of a channel, handed to [super::ChannelHandler::on_create].
pub enum ChannelReader {
    Datagram(Arc<UdpSocket>),
    Stream(OwnedReadHalf),
}

enum Writer {
    Datagram(Arc<UdpSocket>),
    Stream(tokio::sync::Mutex<OwnedWriteHalf>),
}

/// A bound UDP socket or a connected TCP stream.
///
/// Stream channels remember the last request written to them, so a frame
/// that fails to decode can be blamed on the request that caused it.
pub struct Channel<P: Protocol> {
    local_addr: SocketAddr,
    peer_addr: Option<SocketAddr>,
    writer: Writer,
    last_request: Mutex<Option<Arc<P::Request>>>,
    reader: Mutex<Option<AbortHandle>>,
    open: AtomicBool,
}

impl<P: Protocol> Channel<P> {
    /// Binds a connectionless channel on `address` (port 0 for any).
    pub async fn bind(address: SocketAddr) -> Result<(Arc<Self>, ChannelReader)> {
        let socket = Arc::new(UdpSocket::bind(address).await.map_err(Error::SendError)?);
        let local_addr = socket.local_addr().map_err(Error::SendError)?;

        trace!("bound udp channel on {}", local_addr);

        let channel = Channel::new(local_addr, None, Writer::Datagram(Arc::clone(&socket)));
        Ok((channel, ChannelReader::Datagram(socket)))
    }

    pub async fn connect(address: SocketAddr) -> Result<(Arc<Self>, ChannelReader)> {
        let stream = TcpStream::connect(address)
            .await
            .map_err(Error::UnreachableHost)?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("could not disable nagle on {}: {}", address, e);
        }
        let local_addr = stream.local_addr().map_err(Error::UnreachableHost)?;

        trace!("opened tcp stream {} -> {}", local_addr, address);

        let (read, write) = stream.into_split();
        let writer = Writer::Stream(tokio::sync::Mutex::new(write));
        let channel = Channel::new(local_addr, Some(address), writer);
        Ok((channel, ChannelReader::Stream(read)))
    }

    fn new(local_addr: SocketAddr, peer_addr: Option<SocketAddr>, writer: Writer) -> Arc<Self> {
        Arc::new(Channel {
            local_addr,
            peer_addr,
            writer,
            last_request: Mutex::new(None),
            reader: Mutex::new(None),
            open: AtomicBool::new(true),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    pub fn last_request(&self) -> Option<Arc<P::Request>> {
        self.last_request.lock().clone()
    }

    pub fn attach_reader(&self, reader: AbortHandle) {
        if let Some(previous) = self.reader.lock().replace(reader) {
            previous.abort();
        }
    }

    /// Encodes nothing: `bytes` is the already encoded request.
    pub async fn write(&self, request: &Arc<P::Request>, bytes: &[u8]) -> Result<()> {
        if !self.is_open() {
            return Err(Error::SendError(std::io::Error::new(
                ErrorKind::NotConnected,
                "channel is closed",
            )));
        }

        match &self.writer {
            Writer::Datagram(socket) => {
                let target = request
                    .recipient()
                    .ok_or_else(|| Error::UnresolvedAddress(format!("{:?}", request)))?;
                socket
                    .send_to(bytes, target)
                    .await
                    .map_err(Error::SendError)?;
            }
            Writer::Stream(writer) => {
                *self.last_request.lock() = Some(Arc::clone(request));
                let mut writer = writer.lock().await;
                let written = match writer.write_all(bytes).await {
                    Ok(()) => writer.flush().await,
                    Err(e) => Err(e),
                };
                if let Err(e) = written {
                    self.open.store(false, Ordering::Release);
                    return Err(Error::SendError(e));
                }
            }
        }

        trace!("wrote {} bytes on {}", bytes.len(), self);
        Ok(())
    }

    /// Stops the reader task. The task owns the read side of the socket, so
    /// the socket is only released once this has happened.
    pub fn abort_reader(&self) {
        if let Some(reader) = self.reader.lock().take() {
            reader.abort();
        }
    }

    pub async fn close(&self) {
        self.open.store(false, Ordering::Release);
        self.abort_reader();
        if let Writer::Stream(writer) = &self.writer {
            let _ = writer.lock().await.shutdown().await;
        }
    }

    fn fail(&self, sink: &ResponseSink<P>, error: Error) {
        let failure = match self.last_request() {
            Some(request) => ResponseError::for_request(request, error),
            None => ResponseError::new(error),
        };
        sink(Err(failure));
    }
}

impl<P: Protocol> fmt::Display for Channel<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.peer_addr {
            Some(peer) => write!(f, "{} -> {}", self.local_addr, peer),
            None => write!(f, "{}", self.local_addr),
        }
    }
}

/// Decodes everything arriving on `reader` until the channel dies.
pub(crate) async fn read_loop<P: Protocol>(
    channel: Arc<Channel<P>>,
    reader: ChannelReader,
    sink: ResponseSink<P>,
) {
    match reader {
        ChannelReader::Datagram(socket) => read_datagrams(&channel, &socket, &sink).await,
        ChannelReader::Stream(stream) => read_frames(&channel, stream, &sink).await,
    }
    channel.open.store(false, Ordering::Release);
    debug!("reader for channel {} stopped", channel);
}

async fn read_datagrams<P: Protocol>(
    channel: &Channel<P>,
    socket: &UdpSocket,
    sink: &ResponseSink<P>,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM_SIZE];

    loop {
        let (len, sender) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                error!("cannot receive on channel {}: {}", channel, e);
                return;
            }
        };

        trace!("received {} bytes from {} on {}", len, sender, channel);

        // a shared datagram socket cannot tell which request a bad packet
        // belongs to, so failures carry no originating request
        match P::decode(&buf[..len], sender) {
            Ok(response) => sink(Ok(response)),
            Err(e) => sink(Err(ResponseError::new(e))),
        }
    }
}

async fn read_frames<P: Protocol>(
    channel: &Channel<P>,
    mut stream: OwnedReadHalf,
    sink: &ResponseSink<P>,
) {
    let Some(peer) = channel.peer_addr else {
        return;
    };

    loop {
        let mut size = [0u8; 4];
        match stream.read_exact(&mut size).await {
            Ok(_) => {}
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                debug!("{} closed the connection", peer);
                return;
            }
            Err(e) => {
                channel.fail(sink, Error::ReceiveError(e));
                return;
            }
        }

        let len = match usize::try_from(i32::from_le_bytes(size)) {
            Ok(len) if len <= MAX_FRAME_SIZE => len,
            _ => {
                let reason = format!("invalid frame size {}", i32::from_le_bytes(size));
                channel.fail(sink, Error::MalformedPacket(reason));
                return;
            }
        };

        let mut frame = vec![0u8; size.len() + len];
        frame[..size.len()].copy_from_slice(&size);
        if let Err(e) = stream.read_exact(&mut frame[size.len()..]).await {
            channel.fail(sink, Error::ReceiveError(e));
            return;
        }

        trace!("received frame of {} bytes from {}", frame.len(), peer);

        match P::decode(&frame, peer) {
            Ok(response) => sink(Ok(response)),
            Err(e) => channel.fail(sink, e),
        }
    }
}
