//! Wire protocol for orbit p2p sessions.
//!
//! The unit of exchange is a frame: an 8-byte header carrying the
//! synchronization token `0x22400891` and a big-endian body length, followed
//! by an RLP-encoded list whose first element is the packet type. The
//! [`FrameCodec`] extracts frame bodies from a byte stream and
//! [`ProtocolMessage`] gives the bodies meaning.
//!
//! Packet-type ids `0x00..=0x05` are reserved for the base protocol
//! ([`PacketType`]); everything from [`FIRST_CAPABILITY_OFFSET`] upwards
//! belongs to negotiated subprotocols and is surfaced as
//! [`ProtocolMessage::Capability`] for the session layer to dispatch.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod frame;
pub mod message;

mod disconnect;
mod errors;
mod pinger;

pub use disconnect::DisconnectReason;
pub use errors::{GotExpected, PingerError, WireError};
pub use frame::{check_frame, seal, FrameCodec, HEADER_LENGTH, MAGIC, MAX_PAYLOAD_SIZE};
pub use message::{
    CapDesc, HelloMessage, NodeId, PacketType, PeerEntry, ProtocolMessage,
    FIRST_CAPABILITY_OFFSET,
};
pub use pinger::{PingState, Pinger, PingerEvent};
