//! Peer metadata snapshots.

use crate::node::NodeId;
use orbit_wire::CapDesc;
use std::{
    collections::{BTreeSet, HashMap},
    net::IpAddr,
    time::Duration,
};

/// Snapshot of what is known about the peer on the other end of a session.
///
/// Populated from the connection parameters at construction and filled in
/// once the peer's Hello arrives.
#[derive(Clone, Debug)]
pub struct PeerInfo {
    /// The peer's identity, zero until a Hello established it.
    pub id: NodeId,
    /// The client identifier the peer advertised, `"?"` until known.
    pub client_version: String,
    /// The peer's address.
    pub address: IpAddr,
    /// The port the peer listens on.
    pub listen_port: u16,
    /// Round-trip time of the most recent ping/pong exchange.
    pub last_ping: Option<Duration>,
    /// Capabilities the peer advertised.
    pub capabilities: BTreeSet<CapDesc>,
    /// Process-unique id of the session this snapshot belongs to.
    pub session_id: u64,
    /// Extensible string-keyed properties.
    pub notes: HashMap<String, String>,
}
