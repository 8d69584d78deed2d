//! A2S packet layouts, see the
//! [Server queries](https://developer.valvesoftware.com/wiki/Server_queries) page.
use std::collections::HashMap;

use crate::error::{Error, Result};

use super::{Player, SourceServer};

pub const SINGLE_PACKET: i32 = -1;
pub const SPLIT_PACKET: i32 = -2;
/// Challenge value asking the server to hand out a real one.
pub const NO_CHALLENGE: i32 = -1;

pub const A2S_INFO: u8 = 0x54;
pub const A2S_PLAYER: u8 = 0x55;
pub const A2S_RULES: u8 = 0x56;

pub const S2C_CHALLENGE: u8 = 0x41;
pub const S2A_INFO: u8 = 0x49;
pub const S2A_PLAYER: u8 = 0x44;
pub const S2A_RULES: u8 = 0x45;

const INFO_PAYLOAD: &[u8] = b"Source Engine Query\0";

// extra data flags trailing an info reply
const EDF_PORT: u8 = 0x80;
const EDF_STEAM_ID: u8 = 0x10;
const EDF_SOURCE_TV: u8 = 0x40;
const EDF_KEYWORDS: u8 = 0x20;
const EDF_GAME_ID: u8 = 0x01;

fn header(kind: u8) -> Vec<u8> {
    let mut packet = SINGLE_PACKET.to_le_bytes().to_vec();
    packet.push(kind);
    packet
}

pub fn info_request() -> Vec<u8> {
    let mut packet = header(A2S_INFO);
    packet.extend_from_slice(INFO_PAYLOAD);
    packet
}

pub fn challenge_request(kind: u8, challenge: i32) -> Vec<u8> {
    let mut packet = header(kind);
    packet.extend_from_slice(&challenge.to_le_bytes());
    packet
}

/// Body of a single-packet reply, split by its type byte.
pub enum Payload {
    Challenge(i32),
    Info(SourceServer),
    Players(Vec<Player>),
    Rules(HashMap<String, String>),
}

pub fn decode(datagram: &[u8]) -> Result<Payload> {
    let mut reader = Reader::new(datagram);

    match reader.i32()? {
        SINGLE_PACKET => {}
        SPLIT_PACKET => return Err(Error::SplitPacket),
        other => {
            return Err(Error::MalformedPacket(format!(
                "unexpected packet header {:#x}",
                other
            )))
        }
    }

    match reader.u8()? {
        S2C_CHALLENGE => Ok(Payload::Challenge(reader.i32()?)),
        S2A_INFO => decode_info(&mut reader).map(Payload::Info),
        S2A_PLAYER => decode_players(&mut reader).map(Payload::Players),
        S2A_RULES => decode_rules(&mut reader).map(Payload::Rules),
        other => Err(Error::UnknownPacketType(i32::from(other))),
    }
}

fn decode_info(reader: &mut Reader<'_>) -> Result<SourceServer> {
    let mut server = SourceServer {
        protocol: reader.u8()?,
        name: reader.string()?,
        map: reader.string()?,
        folder: reader.string()?,
        game: reader.string()?,
        app_id: reader.u16()?,
        players: reader.u8()?,
        max_players: reader.u8()?,
        bots: reader.u8()?,
        server_type: char::from(reader.u8()?),
        environment: char::from(reader.u8()?),
        private: reader.u8()? == 1,
        secure: reader.u8()? == 1,
        version: reader.string()?,
        ..SourceServer::default()
    };

    if reader.is_empty() {
        return Ok(server);
    }

    let flags = reader.u8()?;
    if flags & EDF_PORT != 0 {
        server.port = Some(reader.u16()?);
    }
    if flags & EDF_STEAM_ID != 0 {
        server.steam_id = Some(reader.u64()?);
    }
    if flags & EDF_SOURCE_TV != 0 {
        server.tv_port = Some(reader.u16()?);
        server.tv_name = Some(reader.string()?);
    }
    if flags & EDF_KEYWORDS != 0 {
        server.keywords = Some(reader.string()?);
    }
    if flags & EDF_GAME_ID != 0 {
        server.game_id = Some(reader.u64()?);
    }

    Ok(server)
}

fn decode_players(reader: &mut Reader<'_>) -> Result<Vec<Player>> {
    let count = reader.u8()?;
    let mut players = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        players.push(Player {
            index: reader.u8()?,
            name: reader.string()?,
            score: reader.i32()?,
            duration: reader.f32()?,
        });
    }
    Ok(players)
}

fn decode_rules(reader: &mut Reader<'_>) -> Result<HashMap<String, String>> {
    let count = reader.u16()?;
    let mut rules = HashMap::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = reader.string()?;
        let value = reader.string()?;
        rules.insert(name, value);
    }
    Ok(rules)
}

/// Little-endian cursor over a datagram.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Self {
        Reader { buf }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N]> {
        if self.buf.len() < N {
            return Err(Error::MalformedPacket(format!(
                "needed {} more bytes, only {} left",
                N,
                self.buf.len()
            )));
        }
        let (head, rest) = self.buf.split_at(N);
        self.buf = rest;

        let mut bytes = [0u8; N];
        bytes.copy_from_slice(head);
        Ok(bytes)
    }

    fn u8(&mut self) -> Result<u8> {
        self.take::<1>().map(|[byte]| byte)
    }

    fn u16(&mut self) -> Result<u16> {
        self.take().map(u16::from_le_bytes)
    }

    fn i32(&mut self) -> Result<i32> {
        self.take().map(i32::from_le_bytes)
    }

    fn u64(&mut self) -> Result<u64> {
        self.take().map(u64::from_le_bytes)
    }

    fn f32(&mut self) -> Result<f32> {
        self.take().map(f32::from_le_bytes)
    }

    fn string(&mut self) -> Result<String> {
        let end = self
            .buf
            .iter()
            .position(|&byte| byte == 0)
            .ok_or_else(|| Error::MalformedPacket("unterminated string".into()))?;
        let value = std::str::from_utf8(&self.buf[..end])?.to_owned();
        self.buf = &self.buf[end + 1..];
        Ok(value)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Builds server replies the way a game server lays them out.
    pub struct ReplyBuilder(Vec<u8>);

    impl ReplyBuilder {
        pub fn new(kind: u8) -> Self {
            ReplyBuilder(header(kind))
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

        pub fn u64(mut self, value: u64) -> Self {
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

    pub fn info_reply() -> ReplyBuilder {
        ReplyBuilder::new(S2A_INFO)
            .u8(17)
            .string("My Server")
            .string("de_dust2")
            .string("csgo")
            .string("Counter-Strike: Global Offensive")
            .u16(730)
            .u8(12)
            .u8(24)
            .u8(2)
            .u8(b'd')
            .u8(b'l')
            .u8(0)
            .u8(1)
            .string("1.38.2.2")
    }

    #[test]
    fn info_request_layout() {
        let packet = info_request();
        assert_eq!(&packet[..5], &[0xff, 0xff, 0xff, 0xff, 0x54]);
        assert_eq!(&packet[5..], b"Source Engine Query\0");
    }

    #[test]
    fn challenge_request_carries_the_challenge() {
        assert_eq!(
            challenge_request(A2S_PLAYER, NO_CHALLENGE),
            vec![0xff, 0xff, 0xff, 0xff, 0x55, 0xff, 0xff, 0xff, 0xff]
        );
        assert_eq!(
            challenge_request(A2S_RULES, 0x0403_0201),
            vec![0xff, 0xff, 0xff, 0xff, 0x56, 1, 2, 3, 4]
        );
    }

    #[test]
    fn decodes_info_without_extra_data() {
        let Payload::Info(server) = decode(&info_reply().build()).unwrap() else {
            panic!("expected an info reply");
        };

        assert_eq!(server.name, "My Server");
        assert_eq!(server.map, "de_dust2");
        assert_eq!(server.app_id, 730);
        assert_eq!(server.players, 12);
        assert_eq!(server.max_players, 24);
        assert_eq!(server.server_type, 'd');
        assert_eq!(server.environment, 'l');
        assert!(!server.private);
        assert!(server.secure);
        assert_eq!(server.version, "1.38.2.2");
        assert_eq!(server.port, None);
    }

    #[test]
    fn decodes_extra_data_fields() {
        let reply = info_reply()
            .u8(EDF_PORT | EDF_STEAM_ID | EDF_SOURCE_TV | EDF_KEYWORDS | EDF_GAME_ID)
            .u16(27015)
            .u64(90_000_000_000_000_001)
            .u16(27020)
            .string("SourceTV")
            .string("secure,casual")
            .u64(730)
            .build();

        let Payload::Info(server) = decode(&reply).unwrap() else {
            panic!("expected an info reply");
        };

        assert_eq!(server.port, Some(27015));
        assert_eq!(server.steam_id, Some(90_000_000_000_000_001));
        assert_eq!(server.tv_port, Some(27020));
        assert_eq!(server.tv_name.as_deref(), Some("SourceTV"));
        assert_eq!(server.keywords.as_deref(), Some("secure,casual"));
        assert_eq!(server.game_id, Some(730));
    }

    #[test]
    fn decodes_players_and_rules() {
        let players = ReplyBuilder::new(S2A_PLAYER)
            .u8(2)
            .u8(0)
            .string("alice")
            .i32(10)
            .f32(61.5)
            .u8(1)
            .string("bob")
            .i32(-2)
            .f32(3.0)
            .build();
        let Payload::Players(players) = decode(&players).unwrap() else {
            panic!("expected a player reply");
        };
        assert_eq!(players.len(), 2);
        assert_eq!(players[0].name, "alice");
        assert_eq!(players[0].duration, 61.5);
        assert_eq!(players[1].score, -2);

        let rules = ReplyBuilder::new(S2A_RULES)
            .u16(2)
            .string("mp_timelimit")
            .string("30")
            .string("sv_cheats")
            .string("0")
            .build();
        let Payload::Rules(rules) = decode(&rules).unwrap() else {
            panic!("expected a rules reply");
        };
        assert_eq!(rules["mp_timelimit"], "30");
        assert_eq!(rules["sv_cheats"], "0");
    }

    #[test]
    fn rejects_split_and_unknown_packets() {
        let split = [0xfe, 0xff, 0xff, 0xff, 0x00];
        assert!(matches!(decode(&split), Err(Error::SplitPacket)));

        let unknown = ReplyBuilder::new(0x6a).build();
        assert!(matches!(decode(&unknown), Err(Error::UnknownPacketType(0x6a))));

        let truncated = ReplyBuilder::new(S2A_PLAYER).u8(1).u8(0).build();
        assert!(matches!(decode(&truncated), Err(Error::MalformedPacket(_))));
    }
}
