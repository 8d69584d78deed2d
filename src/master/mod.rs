//! Steam master server queries, paging through the list of registered game
//! servers.
use std::{
    fmt,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4},
};

use crate::{
    error::{Error, Result},
    message::{Message, Protocol},
};

pub mod client;
pub mod filter;

pub use client::MasterServerClient;
pub use filter::ServerFilter;

const QUERY_HEADER: u8 = 0x31;
const REPLY_HEADER: [u8; 6] = [0xff, 0xff, 0xff, 0xff, 0x66, 0x0a];
const ENTRY_SIZE: usize = 6;

/// Seed of the first page and terminator of the last one.
pub const TERMINATOR: SocketAddrV4 = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Region {
    UsEastCoast,
    UsWestCoast,
    SouthAmerica,
    Europe,
    Asia,
    Australia,
    MiddleEast,
    Africa,
    All,
}

impl Region {
    pub fn code(self) -> u8 {
        match self {
            Region::UsEastCoast => 0x00,
            Region::UsWestCoast => 0x01,
            Region::SouthAmerica => 0x02,
            Region::Europe => 0x03,
            Region::Asia => 0x04,
            Region::Australia => 0x05,
            Region::MiddleEast => 0x06,
            Region::Africa => 0x07,
            Region::All => 0xff,
        }
    }
}

impl std::str::FromStr for Region {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let region = match s.to_ascii_lowercase().as_str() {
            "us-east" => Region::UsEastCoast,
            "us-west" => Region::UsWestCoast,
            "south-america" => Region::SouthAmerica,
            "europe" => Region::Europe,
            "asia" => Region::Asia,
            "australia" => Region::Australia,
            "middle-east" => Region::MiddleEast,
            "africa" => Region::Africa,
            "all" => Region::All,
            other => return Err(format!("unknown region '{}'", other)),
        };
        Ok(region)
    }
}

/// Which master server to ask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MasterServerType {
    Source,
    GoldSrc,
}

impl MasterServerType {
    pub fn host(self) -> &'static str {
        match self {
            MasterServerType::Source => "hl2master.steampowered.com:27011",
            MasterServerType::GoldSrc => "hl1master.steampowered.com:27010",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MasterKind {
    ServerList,
}

impl fmt::Display for MasterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SERVER_LIST")
    }
}

/// One page request: servers after `seed` matching `filter`.
#[derive(Debug, Clone, PartialEq)]
pub struct MasterServerRequest {
    pub master: SocketAddr,
    pub region: Region,
    pub seed: SocketAddrV4,
    pub filter: String,
}

impl Message for MasterServerRequest {
    type Kind = MasterKind;

    fn kind(&self) -> MasterKind {
        MasterKind::ServerList
    }

    fn sender(&self) -> Option<SocketAddr> {
        None
    }

    fn recipient(&self) -> Option<SocketAddr> {
        Some(self.master)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MasterServerResponse {
    pub master: SocketAddr,
    pub servers: Vec<SocketAddrV4>,
}

impl Message for MasterServerResponse {
    type Kind = MasterKind;

    fn kind(&self) -> MasterKind {
        MasterKind::ServerList
    }

    fn sender(&self) -> Option<SocketAddr> {
        Some(self.master)
    }

    fn recipient(&self) -> Option<SocketAddr> {
        None
    }
}

pub struct MasterProtocol;

impl Protocol for MasterProtocol {
    type Kind = MasterKind;
    type Request = MasterServerRequest;
    type Response = MasterServerResponse;

    fn response_mappings() -> Vec<(MasterKind, MasterKind)> {
        vec![(MasterKind::ServerList, MasterKind::ServerList)]
    }

    fn encode(request: &MasterServerRequest) -> Result<Vec<u8>> {
        let mut packet = vec![QUERY_HEADER, request.region.code()];
        packet.extend_from_slice(request.seed.to_string().as_bytes());
        packet.push(0);
        packet.extend_from_slice(request.filter.as_bytes());
        packet.push(0);
        Ok(packet)
    }

    fn decode(frame: &[u8], sender: SocketAddr) -> Result<MasterServerResponse> {
        let Some(entries) = frame.strip_prefix(&REPLY_HEADER[..]) else {
            return Err(Error::MalformedPacket(
                "missing master server reply header".into(),
            ));
        };
        if entries.len() % ENTRY_SIZE != 0 {
            return Err(Error::MalformedPacket(format!(
                "{} trailing bytes after the last address",
                entries.len() % ENTRY_SIZE
            )));
        }

        let servers = entries
            .chunks_exact(ENTRY_SIZE)
            .map(|entry| {
                let ip = Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3]);
                let port = u16::from_be_bytes([entry[4], entry[5]]);
                SocketAddrV4::new(ip, port)
            })
            .collect();

        Ok(MasterServerResponse {
            master: sender,
            servers,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub fn page(servers: &[SocketAddrV4]) -> Vec<u8> {
        let mut frame = REPLY_HEADER.to_vec();
        for server in servers {
            frame.extend_from_slice(&server.ip().octets());
            frame.extend_from_slice(&server.port().to_be_bytes());
        }
        frame
    }

    #[test]
    fn request_layout() {
        let request = MasterServerRequest {
            master: "127.0.0.1:27011".parse().unwrap(),
            region: Region::Europe,
            seed: TERMINATOR,
            filter: "\\appid\\440".into(),
        };

        let mut expected = vec![0x31, 0x03];
        expected.extend_from_slice(b"0.0.0.0:0\0\\appid\\440\0");
        assert_eq!(MasterProtocol::encode(&request).unwrap(), expected);
    }

    #[test]
    fn decodes_big_endian_ports() {
        let master: SocketAddr = "127.0.0.1:27011".parse().unwrap();
        let frame = page(&["1.2.3.4:27015".parse().unwrap(), TERMINATOR]);

        let response = MasterProtocol::decode(&frame, master).unwrap();
        assert_eq!(
            response.servers,
            vec!["1.2.3.4:27015".parse::<SocketAddrV4>().unwrap(), TERMINATOR]
        );
    }

    #[test]
    fn rejects_bad_headers_and_partial_entries() {
        let master: SocketAddr = "127.0.0.1:27011".parse().unwrap();
        assert!(MasterProtocol::decode(&[0xff, 0xff, 0xff, 0xff, 0x49], master).is_err());

        let mut frame = page(&["1.2.3.4:27015".parse().unwrap()]);
        frame.push(7);
        assert!(matches!(
            MasterProtocol::decode(&frame, master),
            Err(Error::MalformedPacket(_))
        ));
    }

    #[test]
    fn region_codes() {
        assert_eq!(Region::UsEastCoast.code(), 0x00);
        assert_eq!(Region::Africa.code(), 0x07);
        assert_eq!("all".parse::<Region>().unwrap().code(), 0xff);
    }
}
