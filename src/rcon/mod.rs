//! Source [RCON protocol](https://developer.valvesoftware.com/wiki/Source_RCON_Protocol)
//! over pooled TCP connections.
use std::{fmt, net::SocketAddr};

use crate::{
    error::{Error, Result},
    message::{Envelope, Message, Protocol},
    session::{DefaultSessionIdFactory, SessionId, SessionIdFactory},
};

pub mod client;
pub mod packet;

pub use client::RconClient;
pub use packet::{Packet, PacketType};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RconKind {
    Auth,
    Command,
}

impl fmt::Display for RconKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RconKind::Auth => f.write_str("AUTH"),
            RconKind::Command => f.write_str("COMMAND"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RconRequest {
    address: SocketAddr,
    packet: Packet,
}

impl RconRequest {
    pub fn auth(address: SocketAddr, id: i32, password: &str) -> Self {
        RconRequest {
            address,
            packet: Packet::new(id, PacketType::Auth, password),
        }
    }

    pub fn command(address: SocketAddr, id: i32, command: &str) -> Self {
        RconRequest {
            address,
            packet: Packet::new(id, PacketType::Exec, command),
        }
    }

    pub fn id(&self) -> i32 {
        self.packet.id()
    }

    pub fn packet(&self) -> &Packet {
        &self.packet
    }
}

impl Message for RconRequest {
    type Kind = RconKind;

    fn kind(&self) -> RconKind {
        match self.packet.packet_type() {
            PacketType::Auth => RconKind::Auth,
            _ => RconKind::Command,
        }
    }

    fn sender(&self) -> Option<SocketAddr> {
        None
    }

    fn recipient(&self) -> Option<SocketAddr> {
        Some(self.address)
    }
}

#[derive(Debug, Clone)]
pub struct RconResponse {
    address: SocketAddr,
    packet: Packet,
}

impl RconResponse {
    pub fn id(&self) -> i32 {
        self.packet.id()
    }

    pub fn body(&self) -> &str {
        self.packet.body()
    }
}

impl Message for RconResponse {
    type Kind = RconKind;

    fn kind(&self) -> RconKind {
        match self.packet.packet_type() {
            PacketType::AuthResponse => RconKind::Auth,
            _ => RconKind::Command,
        }
    }

    fn sender(&self) -> Option<SocketAddr> {
        Some(self.address)
    }

    fn recipient(&self) -> Option<SocketAddr> {
        None
    }
}

pub struct RconProtocol;

impl Protocol for RconProtocol {
    type Kind = RconKind;
    type Request = RconRequest;
    type Response = RconResponse;

    fn response_mappings() -> Vec<(RconKind, RconKind)> {
        vec![
            (RconKind::Auth, RconKind::Auth),
            (RconKind::Command, RconKind::Command),
        ]
    }

    fn encode(request: &RconRequest) -> Result<Vec<u8>> {
        Ok(request.packet.pack())
    }

    fn decode(frame: &[u8], sender: SocketAddr) -> Result<RconResponse> {
        let packet = Packet::unpack(frame)?;

        // srcds answers a bad password with an auth response for id -1
        if packet.packet_type() == PacketType::AuthResponse && packet.id() == -1 {
            return Err(Error::AuthenticationError);
        }

        Ok(RconResponse {
            address: sender,
            packet,
        })
    }
}

/// `KIND:ip:port:request_id`. Many commands go to the same server over the
/// same connection, so the packet id is part of the key.
#[derive(Default)]
pub struct RconSessionIdFactory {
    base: DefaultSessionIdFactory<RconProtocol>,
}

impl SessionIdFactory<RconProtocol> for RconSessionIdFactory {
    fn create_id(&self, message: Envelope<'_, RconProtocol>) -> Result<SessionId> {
        let id = match &message {
            Envelope::Request(request) => request.id(),
            Envelope::Response(response) => response.id(),
        };
        let base = self.base.base_id(&message)?;
        Ok(SessionId::new(format!("{}:{}", base, id)))
    }
}
