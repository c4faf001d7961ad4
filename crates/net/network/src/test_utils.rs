//! Shared helpers for session tests.

use crate::{
    capability::Capability,
    host::Host,
    node::{Node, NodeId, NodeRef, Origin},
    peer::PeerInfo,
    session::SessionHandle,
};
use orbit_wire::CapDesc;
use parking_lot::Mutex;
use std::{
    collections::{BTreeSet, HashMap, HashSet},
    mem,
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

/// One recorded [`Host::note_node`] invocation.
#[derive(Clone, Debug)]
pub struct NoteNodeCall {
    /// The noted identity.
    pub id: NodeId,
    /// The noted endpoint.
    pub endpoint: SocketAddr,
    /// The claimed identity origin.
    pub origin: Origin,
    /// Whether the node was marked pending.
    pub pending: bool,
    /// The identity this entry supersedes, if any.
    pub replaces: Option<NodeId>,
}

/// A scripted [`Host`] that records every interaction, for driving sessions
/// in tests.
#[derive(Debug)]
pub struct MockHost {
    /// The protocol version this host claims to speak.
    pub protocol_version: u32,
    /// The advertised client identifier.
    pub client_version: String,
    /// The host's own identity.
    pub node_id: NodeId,
    /// The advertised listen port.
    pub listen_port: u16,
    /// Whether private-range gossip is accepted.
    pub local_networking: bool,
    /// Addresses the host considers its own.
    pub addresses: Vec<IpAddr>,
    /// The advertised capabilities.
    pub capabilities: Vec<CapDesc>,
    state: Mutex<State>,
}

#[derive(Debug, Default)]
struct State {
    nodes: HashMap<NodeId, NodeRef>,
    next_index: usize,
    connected: HashSet<NodeId>,
    note_node_calls: Vec<NoteNodeCall>,
    handlers: Vec<Box<dyn Capability>>,
    registered: Vec<(PeerInfo, Vec<CapDesc>)>,
}

impl Default for MockHost {
    fn default() -> Self {
        Self::new()
    }
}

impl MockHost {
    /// A host speaking protocol version 5 with an empty node table.
    pub fn new() -> Self {
        Self {
            protocol_version: 5,
            client_version: "orbit/test".to_string(),
            node_id: NodeId::repeat_byte(0x0f),
            listen_port: 30303,
            local_networking: false,
            addresses: Vec::new(),
            capabilities: vec![CapDesc::new("shard", 1)],
            state: Mutex::new(State::default()),
        }
    }

    /// Marks an identity as having a live session already.
    pub fn insert_connected(&self, id: NodeId) {
        self.state.lock().connected.insert(id);
    }

    /// Preloads a node record without recording a `note_node` call.
    pub fn add_node(&self, id: NodeId, endpoint: SocketAddr, origin: Origin) -> NodeRef {
        let mut state = self.state.lock();
        let index = state.next_index;
        state.next_index += 1;
        let node = Node::new(id, endpoint, origin, index).into_shared();
        state.nodes.insert(id, Arc::clone(&node));
        node
    }

    /// Stages capability handlers to be handed out by the next
    /// `register_peer` call.
    pub fn set_handlers(&self, handlers: Vec<Box<dyn Capability>>) {
        self.state.lock().handlers = handlers;
    }

    /// Every `note_node` call observed so far.
    pub fn note_node_calls(&self) -> Vec<NoteNodeCall> {
        self.state.lock().note_node_calls.clone()
    }

    /// Every `register_peer` call observed so far.
    pub fn registered(&self) -> Vec<(PeerInfo, Vec<CapDesc>)> {
        self.state.lock().registered.clone()
    }

    /// Looks up a preloaded or noted node.
    pub fn node_ref(&self, id: &NodeId) -> Option<NodeRef> {
        self.state.lock().nodes.get(id).cloned()
    }
}

impl Host for MockHost {
    fn protocol_version(&self) -> u32 {
        self.protocol_version
    }

    fn client_version(&self) -> String {
        self.client_version.clone()
    }

    fn caps(&self) -> Vec<CapDesc> {
        self.capabilities.clone()
    }

    fn id(&self) -> NodeId {
        self.node_id
    }

    fn listen_port(&self) -> u16 {
        self.listen_port
    }

    fn local_networking(&self) -> bool {
        self.local_networking
    }

    fn local_addresses(&self) -> Vec<IpAddr> {
        self.addresses.clone()
    }

    fn have_peer(&self, id: &NodeId) -> bool {
        self.state.lock().connected.contains(id)
    }

    fn node(&self, id: &NodeId) -> Option<NodeRef> {
        self.state.lock().nodes.get(id).cloned()
    }

    fn known_endpoint(&self, endpoint: &SocketAddr) -> bool {
        self.state.lock().nodes.values().any(|node| node.read().address == *endpoint)
    }

    fn note_node(
        &self,
        id: NodeId,
        endpoint: SocketAddr,
        origin: Origin,
        pending: bool,
        replaces: Option<NodeId>,
    ) -> NodeRef {
        let mut state = self.state.lock();
        state.note_node_calls.push(NoteNodeCall { id, endpoint, origin, pending, replaces });
        if let Some(existing) = state.nodes.get(&id) {
            return Arc::clone(existing)
        }
        let index = state.next_index;
        state.next_index += 1;
        let node = Node::new(id, endpoint, origin, index).into_shared();
        state.nodes.insert(id, Arc::clone(&node));
        node
    }

    fn potential_peers(&self, exclude: &BTreeSet<usize>) -> Vec<Node> {
        let state = self.state.lock();
        let mut peers: Vec<Node> = state
            .nodes
            .values()
            .map(|node| node.read().clone())
            .filter(|node| !exclude.contains(&node.index))
            .collect();
        peers.sort_by_key(|node| node.index);
        peers
    }

    fn register_peer(
        &self,
        _handle: SessionHandle,
        info: PeerInfo,
        caps: Vec<CapDesc>,
    ) -> Vec<Box<dyn Capability>> {
        let mut state = self.state.lock();
        state.registered.push((info, caps));
        mem::take(&mut state.handlers)
    }
}

/// Initializes a compact tracing subscriber for tests, once.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
