//! orbit per-peer session handling.
//!
//! A [`Session`] owns one connection to a remote peer and drives its whole
//! lifecycle: the Hello handshake, framed message exchange, protocol
//! housekeeping (ping/pong, peer-gossip exchange, graceful disconnect) and
//! dispatch of subprotocol packets to pluggable [`Capability`] handlers.
//!
//! ## Bird's Eye View
//!
//! The session sits between a framed byte stream and the enclosing host:
//!
//! ```text
//!  socket -> FrameCodec -> Session::run -> interpret -> { built-in | Capability }
//!                              ^                              |
//!  SessionHandle --commands----+<------ outbound frames ------+
//! ```
//!
//! - The read pump is the `run` task itself: it pulls validated frame bodies
//!   off the stream and interprets them in wire order.
//! - The write pump is the same task draining a FIFO queue; producers reach
//!   it through the [`SessionHandle`] command channel, so outbound frames
//!   hit the socket in submission order with one write in flight.
//! - The [`Host`] supplies identity, configuration and the shared node
//!   table; it is only reached through the trait in [`host`].
//!
//! The session never re-opens a connection. Once a disconnect is initiated,
//! the only frame that still goes out is the Disconnect packet itself, and
//! inbound traffic is ignored for a bounded grace period.

#![warn(missing_docs, unreachable_pub)]
#![deny(unused_must_use, rust_2018_idioms)]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

pub mod capability;
pub mod config;
pub mod error;
pub mod host;
pub mod node;
pub mod peer;
pub mod session;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use capability::{Capabilities, Capability, CapabilityError};
pub use config::SessionConfig;
pub use error::SessionError;
pub use host::Host;
pub use node::{Node, NodeId, NodeRef, Origin};
pub use peer::PeerInfo;
pub use session::{Session, SessionCommand, SessionHandle};

// commonly used wire types, re-exported for convenience
pub use orbit_wire::{CapDesc, DisconnectReason, HelloMessage, ProtocolMessage};
