use std::convert::TryFrom;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketType {
    // SERVERDATA_AUTH
    Auth,
    // SERVERDATA_EXECCOMMAND
    Exec,
    // SERVERDATA_AUTH_RESPONSE
    AuthResponse,
    // SERVERDATA_RESPONSE_VALUE
    Response,
}

impl PacketType {
    pub fn to_le_bytes(self) -> [u8; 4] {
        let type_value: i32 = match self {
            PacketType::Auth => 3,
            PacketType::Exec => 2,
            PacketType::AuthResponse => 2,
            PacketType::Response => 0,
        };
        type_value.to_le_bytes()
    }
}

/// Only valid for packets coming from the server, where 2 means an auth
/// response rather than a command.
impl TryFrom<i32> for PacketType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            3 => Ok(PacketType::Auth),
            2 => Ok(PacketType::AuthResponse),
            0 => Ok(PacketType::Response),
            other => Err(Error::UnknownPacketType(other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    id: i32,
    packet_type: PacketType,
    body: String,
}

impl Packet {
    pub const BASE_PACKET_SIZE: i32 = 10;
    /// Largest packet srcds sends or accepts.
    pub const MAX_PACKET_SIZE: i32 = 4096;

    pub fn new(id: i32, packet_type: PacketType, body: impl Into<String>) -> Self {
        Packet {
            id,
            packet_type,
            body: body.into(),
        }
    }

    /// Parses one whole frame, size field included.
    pub fn unpack(frame: &[u8]) -> Result<Self> {
        let header = (Self::BASE_PACKET_SIZE + 4) as usize;
        if frame.len() < header {
            return Err(Error::MalformedPacket(format!(
                "frame of {} bytes is shorter than the {} byte minimum",
                frame.len(),
                header
            )));
        }

        let size = read_i32(frame, 0);
        if size > Self::MAX_PACKET_SIZE {
            return Err(Error::MalformedPacket(format!(
                "packet of {} bytes exceeds the {} byte limit",
                size,
                Self::MAX_PACKET_SIZE
            )));
        }
        if size < Self::BASE_PACKET_SIZE || size as usize != frame.len() - 4 {
            return Err(Error::MalformedPacket(format!(
                "size field says {} but {} bytes follow it",
                size,
                frame.len() - 4
            )));
        }

        let id = read_i32(frame, 4);
        let packet_type = PacketType::try_from(read_i32(frame, 8))?;

        let (body, terminator) = frame[12..].split_at(frame.len() - 14);
        if terminator != [0, 0] {
            return Err(Error::MalformedPacket("missing null terminators".into()));
        }
        let body = std::str::from_utf8(body)?;

        Ok(Packet::new(id, packet_type, body))
    }

    // Since the only one of these values that can change in length is the body,
    // an easy way to calculate the size of a packet is to find the byte-length
    // of the packet body, then add 10 to it.
    pub fn size(&self) -> i32 {
        self.body.len() as i32 + Self::BASE_PACKET_SIZE
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn body(&self) -> &str {
        self.body.as_ref()
    }

    pub fn pack(&self) -> Vec<u8> {
        // Size, ID, Type, Body, Terminator
        let mut payload = Vec::with_capacity(self.size() as usize + 4);
        payload.extend_from_slice(&self.size().to_le_bytes());
        payload.extend_from_slice(&self.id().to_le_bytes());
        payload.extend_from_slice(&self.packet_type().to_le_bytes());
        payload.extend_from_slice(self.body().as_bytes());
        // null terminate the body, then null terminate the entire packet
        payload.extend_from_slice(&[0, 0]);
        payload
    }
}

fn read_i32(frame: &[u8], at: usize) -> i32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&frame[at..at + 4]);
    i32::from_le_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_lays_out_size_id_type_body_and_terminators() {
        let packet = Packet::new(101, PacketType::Exec, "status");

        assert_eq!(
            packet.pack(),
            vec![
                16, 0, 0, 0, // size
                101, 0, 0, 0, // id
                2, 0, 0, 0, // type
                b's', b't', b'a', b't', b'u', b's', 0, 0,
            ]
        );
    }

    #[test]
    fn unpack_reads_a_server_response() {
        let frame = Packet::new(7, PacketType::Response, "hello").pack();
        let packet = Packet::unpack(&frame).unwrap();

        assert_eq!(packet.id(), 7);
        assert_eq!(packet.packet_type(), PacketType::Response);
        assert_eq!(packet.body(), "hello");
    }

    #[test]
    fn type_two_from_the_server_is_an_auth_response() {
        let frame = Packet::new(-1, PacketType::Exec, "").pack();
        let packet = Packet::unpack(&frame).unwrap();

        assert_eq!(packet.id(), -1);
        assert_eq!(packet.packet_type(), PacketType::AuthResponse);
    }

    #[test]
    fn unpack_rejects_garbage() {
        assert!(matches!(
            Packet::unpack(&[1, 2, 3]),
            Err(Error::MalformedPacket(_))
        ));

        let mut frame = Packet::new(1, PacketType::Response, "x").pack();
        frame[0] = 99;
        assert!(matches!(Packet::unpack(&frame), Err(Error::MalformedPacket(_))));

        let mut frame = Packet::new(1, PacketType::Response, "x").pack();
        frame[8] = 9;
        assert!(matches!(Packet::unpack(&frame), Err(Error::UnknownPacketType(9))));

        let mut frame = Packet::new(1, PacketType::Response, "x").pack();
        frame[12] = 0xff;
        assert!(matches!(
            Packet::unpack(&frame),
            Err(Error::MalformedPacketBody(_))
        ));
    }

    #[test]
    fn unpack_rejects_oversized_packets() {
        let body = "x".repeat(Packet::MAX_PACKET_SIZE as usize);
        let frame = Packet::new(1, PacketType::Response, body).pack();

        match Packet::unpack(&frame) {
            Err(Error::MalformedPacket(reason)) => assert!(reason.contains("exceeds")),
            other => panic!("expected an oversized packet error, got {:?}", other),
        }

        let body = "x".repeat((Packet::MAX_PACKET_SIZE - Packet::BASE_PACKET_SIZE) as usize);
        let frame = Packet::new(1, PacketType::Response, body).pack();
        assert!(Packet::unpack(&frame).is_ok());
    }
}
