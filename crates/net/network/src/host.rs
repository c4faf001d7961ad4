//! The interface a session consumes from its enclosing host.
//!
//! The host owns the listening socket, the session table and the known-node
//! table; sessions only ever see it through this trait. Implementations
//! must be thread-safe: `note_node`, `potential_peers` and `register_peer`
//! are called from session tasks while the host serves other sessions.

use crate::{
    capability::Capability,
    node::{NodeId, NodeRef, Origin},
    peer::PeerInfo,
    session::SessionHandle,
};
use bytes::BytesMut;
use orbit_wire::{frame, CapDesc};
use std::{
    collections::BTreeSet,
    fmt,
    net::{IpAddr, SocketAddr},
};

/// Host-side collaborator of a [`Session`](crate::Session).
pub trait Host: fmt::Debug + Send + Sync {
    /// The base protocol version this host speaks.
    fn protocol_version(&self) -> u32;

    /// The client identifier advertised in outbound Hellos.
    fn client_version(&self) -> String;

    /// The capabilities advertised in outbound Hellos.
    fn caps(&self) -> Vec<CapDesc>;

    /// The host's own identity.
    fn id(&self) -> NodeId;

    /// The port the host accepts connections on.
    fn listen_port(&self) -> u16;

    /// Whether gossip about private-range addresses is accepted.
    fn local_networking(&self) -> bool;

    /// Addresses the host considers its own; gossip pointing back at any of
    /// them on the listen port is discarded.
    fn local_addresses(&self) -> Vec<IpAddr>;

    /// Whether a live session with this identity already exists.
    fn have_peer(&self, id: &NodeId) -> bool;

    /// Looks up a known node by identity.
    fn node(&self, id: &NodeId) -> Option<NodeRef>;

    /// Whether any known node already uses this endpoint.
    fn known_endpoint(&self, endpoint: &SocketAddr) -> bool;

    /// Records (or refreshes) a node in the host's table and returns its
    /// record.
    ///
    /// `pending` marks nodes that have not been connected to yet.
    /// `replaces` names the identity this entry supersedes after an accepted
    /// identity change, and is `None` otherwise.
    fn note_node(
        &self,
        id: NodeId,
        endpoint: SocketAddr,
        origin: Origin,
        pending: bool,
        replaces: Option<NodeId>,
    ) -> NodeRef;

    /// Snapshots of candidate peers for a gossip reply, excluding the node
    /// table indices in `exclude`.
    fn potential_peers(&self, exclude: &BTreeSet<usize>) -> Vec<crate::node::Node>;

    /// Registers a session whose peer completed the Hello exchange.
    ///
    /// The host keeps the handle for its session table and instantiates a
    /// handler for every advertised capability it shares; the session
    /// installs the returned handlers and routes subprotocol packets to
    /// them.
    fn register_peer(
        &self,
        handle: SessionHandle,
        info: PeerInfo,
        caps: Vec<CapDesc>,
    ) -> Vec<Box<dyn Capability>>;

    /// Fills in the 8-byte header of an outbound frame in place.
    fn seal(&self, frame: &mut BytesMut) {
        frame::seal(frame);
    }
}
