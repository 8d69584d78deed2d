//! Source engine server queries (A2S) over pooled UDP sockets.
use std::{collections::HashMap, fmt, net::SocketAddr};

use crate::{
    error::Result,
    message::{Message, Protocol},
};

pub mod client;
pub mod packet;

pub use client::QueryClient;

use packet::Payload;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueryKind {
    Info,
    Challenge,
    Players,
    Rules,
}

impl fmt::Display for QueryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QueryKind::Info => "INFO",
            QueryKind::Challenge => "CHALLENGE",
            QueryKind::Players => "PLAYERS",
            QueryKind::Rules => "RULES",
        };
        f.write_str(name)
    }
}

/// Which query a challenge number is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeType {
    Players,
    Rules,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryRequest {
    Info(SocketAddr),
    Challenge(SocketAddr, ChallengeType),
    Players(SocketAddr, i32),
    Rules(SocketAddr, i32),
}

impl Message for QueryRequest {
    type Kind = QueryKind;

    fn kind(&self) -> QueryKind {
        match self {
            QueryRequest::Info(_) => QueryKind::Info,
            QueryRequest::Challenge(..) => QueryKind::Challenge,
            QueryRequest::Players(..) => QueryKind::Players,
            QueryRequest::Rules(..) => QueryKind::Rules,
        }
    }

    fn sender(&self) -> Option<SocketAddr> {
        None
    }

    fn recipient(&self) -> Option<SocketAddr> {
        match self {
            QueryRequest::Info(address)
            | QueryRequest::Challenge(address, _)
            | QueryRequest::Players(address, _)
            | QueryRequest::Rules(address, _) => Some(*address),
        }
    }
}

/// Reply to an `A2S_INFO` query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SourceServer {
    pub protocol: u8,
    pub name: String,
    pub map: String,
    pub folder: String,
    pub game: String,
    pub app_id: u16,
    pub players: u8,
    pub max_players: u8,
    pub bots: u8,
    /// `d` dedicated, `l` listen, `p` SourceTV relay.
    pub server_type: char,
    /// `l` linux, `w` windows, `m` or `o` mac.
    pub environment: char,
    pub private: bool,
    /// VAC secured.
    pub secure: bool,
    pub version: String,
    pub port: Option<u16>,
    pub steam_id: Option<u64>,
    pub tv_port: Option<u16>,
    pub tv_name: Option<String>,
    pub keywords: Option<String>,
    pub game_id: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub index: u8,
    pub name: String,
    pub score: i32,
    /// Seconds connected.
    pub duration: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum QueryResponse {
    Challenge(SocketAddr, i32),
    Info(SocketAddr, SourceServer),
    Players(SocketAddr, Vec<Player>),
    Rules(SocketAddr, HashMap<String, String>),
}

impl Message for QueryResponse {
    type Kind = QueryKind;

    fn kind(&self) -> QueryKind {
        match self {
            QueryResponse::Challenge(..) => QueryKind::Challenge,
            QueryResponse::Info(..) => QueryKind::Info,
            QueryResponse::Players(..) => QueryKind::Players,
            QueryResponse::Rules(..) => QueryKind::Rules,
        }
    }

    fn sender(&self) -> Option<SocketAddr> {
        match self {
            QueryResponse::Challenge(address, _)
            | QueryResponse::Info(address, _)
            | QueryResponse::Players(address, _)
            | QueryResponse::Rules(address, _) => Some(*address),
        }
    }

    fn recipient(&self) -> Option<SocketAddr> {
        None
    }
}

pub struct QueryProtocol;

impl Protocol for QueryProtocol {
    type Kind = QueryKind;
    type Request = QueryRequest;
    type Response = QueryResponse;

    fn response_mappings() -> Vec<(QueryKind, QueryKind)> {
        vec![
            (QueryKind::Info, QueryKind::Info),
            (QueryKind::Challenge, QueryKind::Challenge),
            (QueryKind::Players, QueryKind::Players),
            (QueryKind::Rules, QueryKind::Rules),
        ]
    }

    fn encode(request: &QueryRequest) -> Result<Vec<u8>> {
        let packet = match request {
            QueryRequest::Info(_) => packet::info_request(),
            QueryRequest::Challenge(_, ChallengeType::Players) => {
                packet::challenge_request(packet::A2S_PLAYER, packet::NO_CHALLENGE)
            }
            QueryRequest::Challenge(_, ChallengeType::Rules) => {
                packet::challenge_request(packet::A2S_RULES, packet::NO_CHALLENGE)
            }
            QueryRequest::Players(_, challenge) => {
                packet::challenge_request(packet::A2S_PLAYER, *challenge)
            }
            QueryRequest::Rules(_, challenge) => {
                packet::challenge_request(packet::A2S_RULES, *challenge)
            }
        };
        Ok(packet)
    }

    fn decode(frame: &[u8], sender: SocketAddr) -> Result<QueryResponse> {
        let response = match packet::decode(frame)? {
            Payload::Challenge(challenge) => QueryResponse::Challenge(sender, challenge),
            Payload::Info(server) => QueryResponse::Info(sender, server),
            Payload::Players(players) => QueryResponse::Players(sender, players),
            Payload::Rules(rules) => QueryResponse::Rules(sender, rules),
        };
        Ok(response)
    }
}
