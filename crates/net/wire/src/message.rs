//! Protocol messages carried in frame bodies.
//!
//! A frame body is a single RLP list whose first element is the packet type
//! as an unsigned integer; the packet's arguments follow as further list
//! elements. Types `0x00..=0x05` are the built-in packets, everything from
//! [`FIRST_CAPABILITY_OFFSET`] upwards belongs to subprotocol capabilities.

use crate::{disconnect::DisconnectReason, errors::WireError, frame::HEADER_LENGTH};
use alloy_rlp::{Decodable, Encodable, Header, RlpDecodable, RlpEncodable};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Fixed-size identity of a peer.
pub type NodeId = alloy_primitives::B512;

/// The first packet-type id available to capability subprotocols.
///
/// Ids below this value are reserved for the built-in packets; ids from here
/// upwards are routed through the capability id-offset windows negotiated in
/// the Hello exchange.
pub const FIRST_CAPABILITY_OFFSET: u8 = 0x10;

/// Ids of the built-in packets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketType {
    /// The handshake packet, sent once by each side when the connection is
    /// established.
    Hello = 0x00,
    /// Announces an imminent disconnect, with a reason.
    Disconnect = 0x01,
    /// Requests an immediate [`PacketType::Pong`].
    Ping = 0x02,
    /// Answers a [`PacketType::Ping`].
    Pong = 0x03,
    /// Asks the peer for addresses of other nodes it knows.
    GetPeers = 0x04,
    /// Carries node addresses in answer to [`PacketType::GetPeers`].
    Peers = 0x05,
}

impl TryFrom<u8> for PacketType {
    type Error = WireError;

    fn try_from(id: u8) -> Result<Self, Self::Error> {
        match id {
            0x00 => Ok(Self::Hello),
            0x01 => Ok(Self::Disconnect),
            0x02 => Ok(Self::Ping),
            0x03 => Ok(Self::Pong),
            0x04 => Ok(Self::GetPeers),
            0x05 => Ok(Self::Peers),
            _ => Err(WireError::UnknownReservedPacket(id)),
        }
    }
}

/// A capability advertised in a Hello: the subprotocol's name and version.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, RlpEncodable, RlpDecodable)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CapDesc {
    /// Case-sensitive name of the subprotocol.
    pub name: String,
    /// Version of the subprotocol.
    pub version: u32,
}

impl CapDesc {
    /// Creates a new capability descriptor.
    pub fn new(name: impl Into<String>, version: u32) -> Self {
        Self { name: name.into(), version }
    }
}

/// The handshake packet's payload.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct HelloMessage {
    /// The base protocol version the peer speaks.
    pub protocol_version: u32,
    /// Free-form client identifier, e.g. `orbit/v0.1.0/linux`.
    pub client_version: String,
    /// The capabilities the peer supports.
    pub capabilities: Vec<CapDesc>,
    /// The port the peer accepts connections on.
    pub listen_port: u16,
    /// The peer's identity.
    pub id: NodeId,
}

/// One gossiped node in a Peers packet: `[raw address, port, id]`.
///
/// The raw address is 4 bytes for IPv4 and 16 bytes for IPv6; any other
/// length is a protocol violation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PeerEntry {
    /// The node's address.
    pub address: IpAddr,
    /// The node's listening port.
    pub port: u16,
    /// The node's identity.
    pub id: NodeId,
}

impl PeerEntry {
    fn fields_len(&self) -> usize {
        let address_len = match self.address {
            IpAddr::V4(ip) => ip.octets().as_slice().length(),
            IpAddr::V6(ip) => ip.octets().as_slice().length(),
        };
        address_len + self.port.length() + self.id.length()
    }

    fn decode_entry(buf: &mut &[u8]) -> Result<Self, WireError> {
        let header = Header::decode(buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString.into())
        }
        let mut payload = &buf[..header.payload_length];
        buf.advance(header.payload_length);

        let raw = Bytes::decode(&mut payload)?;
        let address = match raw.len() {
            4 => {
                let mut octets = [0u8; 4];
                octets.copy_from_slice(&raw);
                IpAddr::V4(Ipv4Addr::from(octets))
            }
            16 => {
                let mut octets = [0u8; 16];
                octets.copy_from_slice(&raw);
                IpAddr::V6(Ipv6Addr::from(octets))
            }
            other => return Err(WireError::InvalidAddressLength(other)),
        };
        let port = u16::decode(&mut payload)?;
        let id = NodeId::decode(&mut payload)?;
        Ok(Self { address, port, id })
    }
}

impl Encodable for PeerEntry {
    fn encode(&self, out: &mut dyn BufMut) {
        Header { list: true, payload_length: self.fields_len() }.encode(out);
        match self.address {
            IpAddr::V4(ip) => ip.octets().as_slice().encode(out),
            IpAddr::V6(ip) => ip.octets().as_slice().encode(out),
        }
        self.port.encode(out);
        self.id.encode(out);
    }

    fn length(&self) -> usize {
        let payload_length = self.fields_len();
        Header { list: true, payload_length }.length() + payload_length
    }
}

/// A decoded frame body.
///
/// The six built-in packets are fully decoded; anything with a type id at or
/// above [`FIRST_CAPABILITY_OFFSET`] is passed through raw as
/// [`Self::Capability`] for the session's capability handlers, which decode
/// their own argument lists.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProtocolMessage {
    /// The handshake packet.
    Hello(HelloMessage),
    /// An imminent disconnect with its reason.
    Disconnect(DisconnectReason),
    /// A keepalive request.
    Ping,
    /// A keepalive answer.
    Pong,
    /// A request for known peers.
    GetPeers,
    /// Gossiped peer addresses.
    Peers(Vec<PeerEntry>),
    /// A subprotocol packet, body kept verbatim.
    Capability {
        /// The un-rebased packet-type id, `>= FIRST_CAPABILITY_OFFSET`.
        id: u8,
        /// The complete frame body, including the leading type element.
        body: Bytes,
    },
}

impl ProtocolMessage {
    /// The built-in packet type of this message, if it is one.
    pub const fn packet_type(&self) -> Option<PacketType> {
        match self {
            Self::Hello(_) => Some(PacketType::Hello),
            Self::Disconnect(_) => Some(PacketType::Disconnect),
            Self::Ping => Some(PacketType::Ping),
            Self::Pong => Some(PacketType::Pong),
            Self::GetPeers => Some(PacketType::GetPeers),
            Self::Peers(_) => Some(PacketType::Peers),
            Self::Capability { .. } => None,
        }
    }

    /// Encodes the message into a frame with an 8-byte placeholder header.
    ///
    /// The result is not yet a valid frame; the host's seal step writes the
    /// synchronization token and body length over the placeholder.
    pub fn to_frame(&self) -> BytesMut {
        let mut frame = BytesMut::with_capacity(HEADER_LENGTH + self.length());
        frame.put_bytes(0, HEADER_LENGTH);
        self.encode(&mut frame);
        frame
    }

    /// Decodes a validated frame body.
    pub fn decode_body(body: &[u8]) -> Result<Self, WireError> {
        let mut buf = body;
        let header = Header::decode(&mut buf)?;
        if !header.list {
            return Err(alloy_rlp::Error::UnexpectedString.into())
        }
        let mut payload = &buf[..header.payload_length];

        let id = u8::decode(&mut payload)?;
        if id >= FIRST_CAPABILITY_OFFSET {
            return Ok(Self::Capability { id, body: Bytes::copy_from_slice(body) })
        }

        match PacketType::try_from(id)? {
            PacketType::Hello => {
                let protocol_version = u32::decode(&mut payload)?;
                let client_version = String::decode(&mut payload)?;
                let capabilities = Vec::<CapDesc>::decode(&mut payload)?;
                let listen_port = u16::decode(&mut payload)?;
                let id = NodeId::decode(&mut payload)?;
                Ok(Self::Hello(HelloMessage {
                    protocol_version,
                    client_version,
                    capabilities,
                    listen_port,
                    id,
                }))
            }
            PacketType::Disconnect => {
                // a missing or malformed reason field is tolerated
                let reason = if payload.is_empty() {
                    DisconnectReason::Unspecified
                } else {
                    DisconnectReason::decode(&mut payload)
                        .unwrap_or(DisconnectReason::Unspecified)
                };
                Ok(Self::Disconnect(reason))
            }
            PacketType::Ping => Ok(Self::Ping),
            PacketType::Pong => Ok(Self::Pong),
            PacketType::GetPeers => Ok(Self::GetPeers),
            PacketType::Peers => {
                let mut entries = Vec::new();
                while !payload.is_empty() {
                    entries.push(PeerEntry::decode_entry(&mut payload)?);
                }
                Ok(Self::Peers(entries))
            }
        }
    }

    fn payload_length(&self) -> usize {
        let type_len = 1; // every built-in type id encodes as one byte
        match self {
            Self::Hello(hello) => {
                type_len +
                    hello.protocol_version.length() +
                    hello.client_version.length() +
                    hello.capabilities.length() +
                    hello.listen_port.length() +
                    hello.id.length()
            }
            Self::Disconnect(reason) => type_len + reason.length(),
            Self::Ping | Self::Pong | Self::GetPeers => type_len,
            Self::Peers(entries) => {
                type_len + entries.iter().map(Encodable::length).sum::<usize>()
            }
            Self::Capability { .. } => {
                unreachable!("capability messages carry their own envelope")
            }
        }
    }
}

impl Encodable for ProtocolMessage {
    fn encode(&self, out: &mut dyn BufMut) {
        if let Self::Capability { body, .. } = self {
            out.put_slice(body);
            return
        }
        Header { list: true, payload_length: self.payload_length() }.encode(out);
        match self {
            Self::Hello(hello) => {
                (PacketType::Hello as u8).encode(out);
                hello.protocol_version.encode(out);
                hello.client_version.encode(out);
                hello.capabilities.encode(out);
                hello.listen_port.encode(out);
                hello.id.encode(out);
            }
            Self::Disconnect(reason) => {
                (PacketType::Disconnect as u8).encode(out);
                reason.encode(out);
            }
            Self::Ping => (PacketType::Ping as u8).encode(out),
            Self::Pong => (PacketType::Pong as u8).encode(out),
            Self::GetPeers => (PacketType::GetPeers as u8).encode(out),
            Self::Peers(entries) => {
                (PacketType::Peers as u8).encode(out);
                for entry in entries {
                    entry.encode(out);
                }
            }
            Self::Capability { .. } => unreachable!("handled above"),
        }
    }

    fn length(&self) -> usize {
        if let Self::Capability { body, .. } = self {
            return body.len()
        }
        let payload_length = self.payload_length();
        Header { list: true, payload_length }.length() + payload_length
    }
}
