//! Records for nodes known to the host.

use orbit_wire::DisconnectReason;
use parking_lot::RwLock;
use std::{net::SocketAddr, sync::Arc};

pub use orbit_wire::NodeId;

/// Shared, mutable handle to a [`Node`] in the host's table.
pub type NodeRef = Arc<RwLock<Node>>;

/// Provenance of a node's identity.
///
/// Stronger origins veto weaker ones when resolving identity conflicts: a
/// session only accepts a changed identity from a peer whose recorded origin
/// is no stronger than [`Origin::SelfThird`] (or when forced).
///
/// The variants are ordered weakest to strongest.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Origin {
    /// Nothing is known about where the identity came from.
    Unknown,
    /// Relayed by a third party we learned of ourselves.
    SelfThird,
    /// Relayed by a third party with a perfect record.
    PerfectThird,
    /// Learned directly from the peer in a Hello.
    Direct,
    /// Verified beyond the handshake.
    Perfect,
}

/// Persistent per-peer state, owned by the host's node table.
#[derive(Clone, Debug)]
pub struct Node {
    /// The node's identity.
    pub id: NodeId,
    /// Last known endpoint.
    pub address: SocketAddr,
    /// Advisory rating; useful gossip earns increments.
    pub rating: i64,
    /// Advisory lifetime score.
    pub score: i64,
    /// The reason the last session with this node ended, if any.
    pub last_disconnect: Option<DisconnectReason>,
    /// Where the identity came from.
    pub id_origin: Origin,
    /// Index of this record in the host's table.
    pub index: usize,
}

impl Node {
    /// Creates a fresh record with zeroed ratings.
    pub fn new(id: NodeId, address: SocketAddr, id_origin: Origin, index: usize) -> Self {
        Self { id, address, rating: 0, score: 0, last_disconnect: None, id_origin, index }
    }

    /// Wraps the record into a shared [`NodeRef`].
    pub fn into_shared(self) -> NodeRef {
        Arc::new(RwLock::new(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origin_ordering_matches_trust() {
        assert!(Origin::Unknown < Origin::SelfThird);
        assert!(Origin::SelfThird < Origin::PerfectThird);
        assert!(Origin::PerfectThird < Origin::Direct);
        assert!(Origin::Direct < Origin::Perfect);
    }
}
