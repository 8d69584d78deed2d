//! Loopback stand-ins for game servers.
#![allow(dead_code)]

use std::{
    net::{SocketAddr, SocketAddrV4},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use gamequery::rcon::{Packet, PacketType};
use log::{error, info};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream, UdpSocket},
    task::JoinHandle,
};

pub const CHALLENGE: i32 = 0x0a0b_0c0d;
pub const TERMINATOR: SocketAddrV4 = gamequery::master::TERMINATOR;

pub struct FakeServer {
    pub address: SocketAddr,
    handle: JoinHandle<()>,
}

impl Drop for FakeServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// RCON server accepting `password`. `echo <text>` answers `<text>`.
pub async fn rcon_server(password: &'static str) -> FakeServer {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        info!("rcon server running on {}", address);
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_rcon(stream, peer, password));
                }
                Err(e) => error!("{:?}", e),
            }
        }
    });

    FakeServer { address, handle }
}

async fn serve_rcon(mut stream: TcpStream, peer: SocketAddr, password: &'static str) {
    info!("accept from {:?}", peer);
    let mut authenticated = false;

    loop {
        let mut size = [0u8; 4];
        if stream.read_exact(&mut size).await.is_err() {
            return;
        }
        let mut frame = size.to_vec();
        frame.resize(4 + i32::from_le_bytes(size) as usize, 0);
        if stream.read_exact(&mut frame[4..]).await.is_err() {
            return;
        }

        let Ok(packet) = Packet::unpack(&frame) else {
            return;
        };

        let mut replies = Vec::new();
        if packet.packet_type() == PacketType::Auth {
            authenticated = packet.body() == password;
            let id = if authenticated { packet.id() } else { -1 };
            replies.push(Packet::new(packet.id(), PacketType::Response, ""));
            replies.push(Packet::new(id, PacketType::AuthResponse, ""));
        } else if authenticated {
            let output = match packet.body().strip_prefix("echo ") {
                Some(text) => text.to_owned(),
                None => format!("Unknown command \"{}\"", packet.body()),
            };
            replies.push(Packet::new(packet.id(), PacketType::Response, output));
        }

        for reply in replies {
            if stream.write_all(&reply.pack()).await.is_err() {
                return;
            }
        }
    }
}

/// Builds A2S replies.
pub struct Reply(Vec<u8>);

impl Reply {
    pub fn new(kind: u8) -> Self {
        Reply(vec![0xff, 0xff, 0xff, 0xff, kind])
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.0.push(value);
        self
    }

    pub fn u16(mut self, value: u16) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(mut self, value: i32) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn f32(mut self, value: f32) -> Self {
        self.0.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn string(mut self, value: &str) -> Self {
        self.0.extend_from_slice(value.as_bytes());
        self.0.push(0);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

fn a2s_reply(request: &[u8]) -> Option<Vec<u8>> {
    if request.len() < 5 || request[..4] != [0xff; 4] {
        return None;
    }
    let challenge = request
        .get(5..9)
        .map(|bytes| i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]));

    let reply = match (request[4], challenge) {
        (0x54, _) => Reply::new(0x49)
            .u8(17)
            .string("Loopback")
            .string("cp_badlands")
            .string("tf")
            .string("Team Fortress")
            .u16(440)
            .u8(2)
            .u8(24)
            .u8(0)
            .u8(b'd')
            .u8(b'l')
            .u8(0)
            .u8(1)
            .string("1.0.0")
            .u8(0x80)
            .u16(27015),
        (0x55 | 0x56, Some(-1)) => Reply::new(0x41).i32(CHALLENGE),
        (0x55, Some(CHALLENGE)) => Reply::new(0x44)
            .u8(2)
            .u8(0)
            .string("scout")
            .i32(5)
            .f32(120.0)
            .u8(1)
            .string("medic")
            .i32(3)
            .f32(60.0),
        (0x56, Some(CHALLENGE)) => Reply::new(0x45)
            .u16(2)
            .string("mp_timelimit")
            .string("30")
            .string("tf_bot_quota")
            .string("0"),
        _ => return None,
    };
    Some(reply.build())
}

/// A2S server answering info, challenge, player and rules queries.
pub async fn query_server() -> FakeServer {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 1400];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            if let Some(reply) = a2s_reply(&buf[..len]) {
                let _ = socket.send_to(&reply, peer).await;
            }
        }
    });

    FakeServer { address, handle }
}

/// A UDP socket that reads everything and never answers.
pub async fn silent_server() -> FakeServer {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 1400];
        while socket.recv_from(&mut buf).await.is_ok() {}
    });

    FakeServer { address, handle }
}

fn master_page(servers: &[SocketAddrV4], seed: SocketAddrV4, page_size: usize) -> Vec<u8> {
    let start = servers
        .iter()
        .position(|server| *server == seed)
        .map_or(0, |index| index + 1);
    let end = (start + page_size).min(servers.len());

    let mut page = Vec::new();
    if seed != TERMINATOR {
        page.push(seed);
    }
    page.extend_from_slice(&servers[start..end]);
    if end == servers.len() {
        page.push(TERMINATOR);
    }

    let mut frame = vec![0xff, 0xff, 0xff, 0xff, 0x66, 0x0a];
    for server in page {
        frame.extend_from_slice(&server.ip().octets());
        frame.extend_from_slice(&server.port().to_be_bytes());
    }
    frame
}

/// Master server listing `servers`, `page_size` per reply. The first
/// `ignore_first` requests go unanswered. `requests` counts every request received.
pub async fn master_server(
    servers: Vec<SocketAddrV4>,
    page_size: usize,
    ignore_first: usize,
) -> (FakeServer, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let address = socket.local_addr().unwrap();
    let requests = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&requests);

    let handle = tokio::spawn(async move {
        let mut buf = [0u8; 1400];
        loop {
            let Ok((len, peer)) = socket.recv_from(&mut buf).await else {
                return;
            };
            if counter.fetch_add(1, Ordering::SeqCst) < ignore_first {
                continue;
            }

            let request = &buf[..len];
            let seed = request
                .get(2..)
                .and_then(|rest| rest.split(|&byte| byte == 0).next())
                .and_then(|seed| std::str::from_utf8(seed).ok())
                .and_then(|seed| seed.parse().ok())
                .unwrap_or(TERMINATOR);

            let reply = master_page(&servers, seed, page_size);
            let _ = socket.send_to(&reply, peer).await;
        }
    });

    (FakeServer { address, handle }, requests)
}

/// An address nothing is listening on.
pub async fn closed_port() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}
