//! Disconnect reasons sent in `Disconnect` packets.

use crate::errors::WireError;
use alloy_rlp::{Decodable, Encodable};
use bytes::BufMut;
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// The reason a peer gives (or is given) for closing the connection.
///
/// Carried as a single unsigned integer in the `Disconnect` packet. A packet
/// without a usable reason field decodes to [`Self::Unspecified`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DisconnectReason {
    /// Disconnect was requested by the local node.
    #[default]
    DisconnectRequested = 0x00,
    /// A low-level TCP error.
    TcpError = 0x01,
    /// A violation of the framing or packet rules.
    BadProtocol = 0x02,
    /// The peer has nothing this node wants.
    UselessPeer = 0x03,
    /// The peer is at its connection limit.
    TooManyPeers = 0x04,
    /// A session with this identity already exists.
    DuplicatePeer = 0x05,
    /// The peer is on a different chain.
    WrongGenesis = 0x06,
    /// The peer speaks a different protocol version.
    IncompatibleProtocol = 0x07,
    /// The peer presented the all-zero identity.
    NullIdentity = 0x08,
    /// The client is shutting down.
    ClientQuit = 0x09,
    /// The peer's identity differs from the one on record.
    UnexpectedIdentity = 0x0a,
    /// The connection turned out to lead back to the local identity.
    LocalIdentity = 0x0b,
    /// The peer failed to answer a ping in time.
    PingTimeout = 0x0c,
    /// A disconnect packet that carried no usable reason.
    Unspecified = 0x10,
}

impl fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::DisconnectRequested => "Disconnect was requested.",
            Self::TcpError => "Low-level TCP communication error.",
            Self::BadProtocol => "Data format error.",
            Self::UselessPeer => "Peer had no use for this node.",
            Self::TooManyPeers => "Peer had too many connections.",
            Self::DuplicatePeer => "Peer was already connected to this node.",
            Self::WrongGenesis => "Peer is on a different chain.",
            Self::IncompatibleProtocol => "Peer protocol version is incompatible.",
            Self::NullIdentity => "Peer gave a null identity.",
            Self::ClientQuit => "Peer client is shutting down.",
            Self::UnexpectedIdentity => "Peer identity differs from the identity on record.",
            Self::LocalIdentity => "Connected to our own identity.",
            Self::PingTimeout => "Peer failed to respond to a ping in time.",
            Self::Unspecified => "Unspecified reason.",
        };
        f.write_str(message)
    }
}

impl TryFrom<u8> for DisconnectReason {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Self::DisconnectRequested),
            0x01 => Ok(Self::TcpError),
            0x02 => Ok(Self::BadProtocol),
            0x03 => Ok(Self::UselessPeer),
            0x04 => Ok(Self::TooManyPeers),
            0x05 => Ok(Self::DuplicatePeer),
            0x06 => Ok(Self::WrongGenesis),
            0x07 => Ok(Self::IncompatibleProtocol),
            0x08 => Ok(Self::NullIdentity),
            0x09 => Ok(Self::ClientQuit),
            0x0a => Ok(Self::UnexpectedIdentity),
            0x0b => Ok(Self::LocalIdentity),
            0x0c => Ok(Self::PingTimeout),
            0x10 => Ok(Self::Unspecified),
            _ => Err(WireError::UnknownDisconnectReason(value)),
        }
    }
}

impl Encodable for DisconnectReason {
    fn encode(&self, out: &mut dyn BufMut) {
        (*self as u8).encode(out);
    }

    fn length(&self) -> usize {
        (*self as u8).length()
    }
}

impl Decodable for DisconnectReason {
    fn decode(buf: &mut &[u8]) -> alloy_rlp::Result<Self> {
        let value = u8::decode(buf)?;
        Self::try_from(value).map_err(|_| alloy_rlp::Error::Custom("invalid disconnect reason"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reason_round_trips_through_u8() {
        for value in (0x00..=0x0c).chain([0x10]) {
            let reason = DisconnectReason::try_from(value).unwrap();
            assert_eq!(reason as u8, value);
        }
        assert!(DisconnectReason::try_from(0x0d).is_err());
        assert!(DisconnectReason::try_from(0xff).is_err());
    }

    #[test]
    fn reason_strings_are_human_readable() {
        assert_eq!(DisconnectReason::BadProtocol.to_string(), "Data format error.");
        assert_eq!(
            DisconnectReason::IncompatibleProtocol.to_string(),
            "Peer protocol version is incompatible."
        );
    }

    #[test]
    fn reason_encodes_as_a_single_uint() {
        let mut out = Vec::new();
        DisconnectReason::DuplicatePeer.encode(&mut out);
        assert_eq!(out, [0x05]);

        let decoded = DisconnectReason::decode(&mut &out[..]).unwrap();
        assert_eq!(decoded, DisconnectReason::DuplicatePeer);
    }
}
