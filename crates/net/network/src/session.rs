//! One session per connected peer.
//!
//! The session is spawned onto the runtime as a single task ([`Session::run`])
//! that owns the framed connection and all per-peer state. Inbound frames are
//! interpreted in wire order; outbound frames are queued FIFO and written with
//! at most one write in flight. Other tasks reach the session through its
//! [`SessionHandle`].

use crate::{
    capability::Capabilities,
    config::SessionConfig,
    error::SessionError,
    host::Host,
    node::{NodeId, NodeRef, Origin},
    peer::PeerInfo,
};
use bytes::{Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use metrics::counter;
use orbit_wire::{
    check_frame, DisconnectReason, HelloMessage, PeerEntry, Pinger, PingerEvent, ProtocolMessage,
    WireError,
};
use rand::Rng;
use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    net::{IpAddr, SocketAddr},
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Instant,
};
use tokio::{sync::mpsc, time::Sleep};
use tracing::{debug, trace, warn};

/// Source of process-unique session ids.
static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(0);

/// Instructions other tasks can give a running session.
#[derive(Debug)]
pub enum SessionCommand {
    /// A sealed frame to write out.
    Send(Bytes),
    /// Initiate a graceful disconnect with the given reason.
    Disconnect(DisconnectReason),
}

/// Cheaply cloneable handle to a running [`Session`].
#[derive(Clone, Debug)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<SessionCommand>,
}

impl SessionHandle {
    /// Queues a sealed frame for writing.
    ///
    /// Frames are written to the socket in the order this is called,
    /// across all holders of the handle.
    pub fn send_frame(&self, frame: Bytes) -> Result<(), SessionError> {
        self.commands.send(SessionCommand::Send(frame)).map_err(|_| SessionError::Closed)
    }

    /// Initiates a graceful disconnect. Safe to call from any task.
    pub fn disconnect(&self, reason: DisconnectReason) -> Result<(), SessionError> {
        self.commands.send(SessionCommand::Disconnect(reason)).map_err(|_| SessionError::Closed)
    }
}

/// What the grace wait observed.
enum GraceOutcome {
    /// The peer closed, errored, or the grace period elapsed.
    Closed,
    /// An inbound frame arrived and was ignored.
    Ignored,
}

/// A session with a remote peer over one framed connection.
///
/// Constructed [`inbound`](Self::inbound) from an accepted connection (the
/// peer's identity is unknown until its Hello) or
/// [`outbound`](Self::outbound) towards a node already on record. The
/// connection is never reused: when `run` returns the socket is closed for
/// good.
pub struct Session<S> {
    /// The framed connection.
    conn: S,
    /// The enclosing host.
    host: Arc<dyn Host>,
    config: SessionConfig,
    /// The node record behind this session, populated by a valid Hello or
    /// supplied at construction for outbound connections.
    node: Option<NodeRef>,
    /// Permits an identity change under suspicion of a stale record.
    force_identity: bool,
    /// The endpoint supplied at construction, persisted at teardown.
    manual_endpoint: SocketAddr,
    /// Address of the connected socket's remote end.
    remote_addr: SocketAddr,
    /// Node-table indices this peer has already been told about.
    known_nodes: BTreeSet<usize>,
    /// Subprotocol handlers installed at registration.
    capabilities: Capabilities,
    /// Snapshot of what is known about the peer.
    info: PeerInfo,
    /// The protocol version the peer advertised.
    protocol_version: u32,
    /// When the connection was established.
    connected_at: Instant,
    /// When the most recent ping left, for round-trip measurement.
    ping_sent: Option<Instant>,
    /// Keepalive state machine.
    pinger: Pinger,
    /// Outbound frames awaiting their turn on the socket.
    outgoing: VecDeque<Bytes>,
    /// Armed once a local disconnect was initiated; bounds the wait for the
    /// peer to close.
    grace: Option<Pin<Box<Sleep>>>,
    /// Commands from [`SessionHandle`]s.
    commands: mpsc::UnboundedReceiver<SessionCommand>,
    /// Our own handle, passed on to the host at registration.
    handle: SessionHandle,
}

impl<S> Session<S>
where
    S: Stream<Item = Result<BytesMut, WireError>> + Sink<Bytes, Error = WireError> + Unpin,
{
    fn new(
        conn: S,
        host: Arc<dyn Host>,
        config: SessionConfig,
        remote_addr: SocketAddr,
        manual_endpoint: SocketAddr,
        node: Option<NodeRef>,
        force_identity: bool,
    ) -> (Self, SessionHandle) {
        let (command_tx, commands) = mpsc::unbounded_channel();
        let handle = SessionHandle { commands: command_tx };
        let session_id = NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed);
        let info = PeerInfo {
            id: node.as_ref().map(|node| node.read().id).unwrap_or_default(),
            client_version: "?".to_string(),
            address: manual_endpoint.ip(),
            listen_port: manual_endpoint.port(),
            last_ping: None,
            capabilities: BTreeSet::new(),
            session_id,
            notes: HashMap::new(),
        };
        let pinger = Pinger::new(config.ping_interval, config.ping_timeout);
        let session = Self {
            conn,
            host,
            config,
            node,
            force_identity,
            manual_endpoint,
            remote_addr,
            known_nodes: BTreeSet::new(),
            capabilities: Capabilities::default(),
            info,
            protocol_version: 0,
            connected_at: Instant::now(),
            ping_sent: None,
            pinger,
            outgoing: VecDeque::new(),
            grace: None,
            commands,
            handle: handle.clone(),
        };
        (session, handle)
    }

    /// Creates a session for an accepted connection. The peer's identity is
    /// unknown until its Hello arrives.
    pub fn inbound(
        conn: S,
        remote_addr: SocketAddr,
        host: Arc<dyn Host>,
        config: SessionConfig,
    ) -> (Self, SessionHandle) {
        Self::new(conn, host, config, remote_addr, remote_addr, None, false)
    }

    /// Creates a session for a connection we initiated towards a known node.
    ///
    /// With `force_identity` set, a changed identity in the peer's Hello is
    /// accepted regardless of the recorded origin.
    pub fn outbound(
        conn: S,
        remote_addr: SocketAddr,
        node: NodeRef,
        force_identity: bool,
        host: Arc<dyn Host>,
        config: SessionConfig,
    ) -> (Self, SessionHandle) {
        let manual_endpoint = node.read().address;
        Self::new(conn, host, config, remote_addr, manual_endpoint, Some(node), force_identity)
    }

    /// The peer's identity, if a node is associated.
    pub fn id(&self) -> Option<NodeId> {
        self.node.as_ref().map(|node| node.read().id)
    }

    /// The associated node's rating.
    pub fn rating(&self) -> Option<i64> {
        self.node.as_ref().map(|node| node.read().rating)
    }

    /// Snapshot of what is known about the peer.
    pub fn peer_info(&self) -> &PeerInfo {
        &self.info
    }

    /// When the connection was established.
    pub fn connected_at(&self) -> Instant {
        self.connected_at
    }

    /// The best known endpoint for the peer: the live remote address with
    /// the node's advertised port, falling back to the endpoint supplied at
    /// construction.
    pub fn endpoint(&self) -> SocketAddr {
        if let Some(node) = &self.node {
            return SocketAddr::new(self.remote_addr.ip(), node.read().address.port())
        }
        self.manual_endpoint
    }

    /// Queues the opening packets: Hello, a first ping and a request for
    /// peers. Call once, before [`run`](Self::run).
    pub fn start(&mut self) {
        let hello = ProtocolMessage::Hello(HelloMessage {
            protocol_version: self.host.protocol_version(),
            client_version: self.host.client_version(),
            capabilities: self.host.caps(),
            listen_port: self.host.listen_port(),
            id: self.host.id(),
        });
        self.seal_and_send(hello);
        self.ping();
        self.seal_and_send(ProtocolMessage::GetPeers);
    }

    /// Drives the session to completion.
    ///
    /// Returns when the peer closes or errors, when a fatal protocol
    /// violation was answered with a Disconnect, or when a locally initiated
    /// disconnect ran its course. The connection is closed on return.
    pub async fn run(mut self) {
        loop {
            // drain the write queue first, one frame in flight at a time
            while let Some(frame) = self.outgoing.pop_front() {
                if let Err(err) = self.conn.send(frame).await {
                    debug!(
                        target: "net::session",
                        session = self.info.session_id, %err, "error sending frame"
                    );
                    return self.dropped().await
                }
            }

            if self.grace.is_some() {
                // the disconnect frame is flushed; wait for the peer to
                // close, ignoring whatever else it sends
                match self.await_grace().await {
                    GraceOutcome::Closed => return self.dropped().await,
                    GraceOutcome::Ignored => continue,
                }
            }

            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::Send(frame)) => self.queue_frame(frame),
                    Some(SessionCommand::Disconnect(reason)) => {
                        if self.start_disconnect(reason) {
                            return self.dropped().await
                        }
                    }
                    None => {}
                },
                event = self.pinger.next() => match event {
                    Some(Ok(PingerEvent::Ping)) => self.ping(),
                    Some(Ok(PingerEvent::Timeout)) => {
                        debug!(
                            target: "net::session",
                            session = self.info.session_id, "ping timed out"
                        );
                        self.start_disconnect(DisconnectReason::PingTimeout);
                    }
                    Some(Err(err)) => {
                        trace!(target: "net::session", session = self.info.session_id, %err, "pinger")
                    }
                    None => {}
                },
                frame = self.conn.next() => match frame {
                    None => {
                        // EOF is a benign end condition
                        trace!(
                            target: "net::session",
                            session = self.info.session_id, "connection closed by peer"
                        );
                        return self.dropped().await
                    }
                    Some(Err(WireError::Io(err))) => {
                        debug!(
                            target: "net::session",
                            session = self.info.session_id, %err, "error reading"
                        );
                        return self.dropped().await
                    }
                    Some(Err(err)) => {
                        warn!(
                            target: "net::session",
                            session = self.info.session_id, %err, "invalid frame"
                        );
                        self.start_disconnect(DisconnectReason::BadProtocol);
                    }
                    Some(Ok(body)) => match self.interpret(&body) {
                        Ok(true) => {}
                        Ok(false) => return self.dropped().await,
                        Err(err) => {
                            warn!(
                                target: "net::session",
                                session = self.info.session_id, %err, "failed to interpret packet"
                            );
                            self.start_disconnect(DisconnectReason::BadProtocol);
                        }
                    },
                },
            }
        }
    }

    /// Waits out the disconnect grace window.
    ///
    /// Inbound frames and further send commands are discarded; a second
    /// disconnect hard-drops the connection.
    async fn await_grace(&mut self) -> GraceOutcome {
        let Some(grace) = self.grace.as_mut() else { return GraceOutcome::Closed };
        tokio::select! {
            _ = grace.as_mut() => {
                debug!(target: "net::session", "disconnect grace period elapsed");
                GraceOutcome::Closed
            }
            command = self.commands.recv() => match command {
                Some(SessionCommand::Disconnect(_)) => GraceOutcome::Closed,
                _ => GraceOutcome::Ignored,
            },
            inbound = self.conn.next() => match inbound {
                Some(Ok(_)) => GraceOutcome::Ignored,
                Some(Err(_)) | None => GraceOutcome::Closed,
            }
        }
    }

    /// Executes one inbound packet.
    ///
    /// `Ok(false)` terminates the session without anything further going out:
    /// either a Disconnect is already on its way out, or the peer asked to
    /// close. Decode failures bubble up as errors and are answered with
    /// `Disconnect(BadProtocol)` by the caller.
    fn interpret(&mut self, body: &[u8]) -> Result<bool, WireError> {
        let message = ProtocolMessage::decode_body(body)?;
        trace!(
            target: "net::session",
            session = self.info.session_id, ?message, "received packet"
        );
        match message {
            ProtocolMessage::Hello(hello) => self.on_hello(hello),
            ProtocolMessage::Disconnect(reason) => {
                debug!(
                    target: "net::session",
                    session = self.info.session_id, %reason, "disconnect requested by peer"
                );
                Ok(false)
            }
            ProtocolMessage::Ping => {
                self.seal_and_send(ProtocolMessage::Pong);
                Ok(true)
            }
            ProtocolMessage::Pong => {
                self.on_pong();
                Ok(true)
            }
            ProtocolMessage::GetPeers => self.on_get_peers(),
            ProtocolMessage::Peers(entries) => self.on_peers(entries),
            ProtocolMessage::Capability { id, body } => self.capabilities.interpret(id, &body),
        }
    }

    fn on_hello(&mut self, hello: HelloMessage) -> Result<bool, WireError> {
        if let Some(node) = &self.node {
            // the previous session's fate no longer matters
            node.write().last_disconnect = None;
        }

        self.protocol_version = hello.protocol_version;
        debug!(
            target: "net::session",
            session = self.info.session_id,
            client = %hello.client_version,
            version = hello.protocol_version,
            id = %hello.id,
            port = hello.listen_port,
            caps = ?hello.capabilities,
            "hello"
        );

        if self.host.have_peer(&hello.id) {
            warn!(
                target: "net::session",
                session = self.info.session_id, id = %hello.id, "already connected to this peer"
            );
            self.start_disconnect(DisconnectReason::DuplicatePeer);
            return Ok(true)
        }

        let prior = self.node.as_ref().map(|node| {
            let node = node.read();
            (node.id, node.id_origin)
        });
        if let Some((prior_id, prior_origin)) = prior {
            if prior_id != hello.id {
                if self.force_identity || prior_origin <= Origin::SelfThird {
                    warn!(
                        target: "net::session",
                        session = self.info.session_id,
                        "peer identity changed since last contact, allowing anyway"
                    );
                } else {
                    warn!(
                        target: "net::session",
                        session = self.info.session_id,
                        "peer identity changed since last contact, disconnecting"
                    );
                    self.start_disconnect(DisconnectReason::UnexpectedIdentity);
                    return Ok(true)
                }
            }
        }

        if hello.id == NodeId::ZERO {
            self.start_disconnect(DisconnectReason::NullIdentity);
            return Ok(true)
        }

        let replaces = prior.map(|(id, _)| id).filter(|prior_id| *prior_id != hello.id);
        let endpoint = SocketAddr::new(self.remote_addr.ip(), hello.listen_port);
        let node = self.host.note_node(hello.id, endpoint, Origin::Direct, false, replaces);
        self.known_nodes.insert(node.read().index);
        self.node = Some(node);

        if self.protocol_version != self.host.protocol_version() {
            self.start_disconnect(DisconnectReason::IncompatibleProtocol);
            return Ok(true)
        }

        self.info = PeerInfo {
            id: hello.id,
            client_version: hello.client_version,
            address: self.remote_addr.ip(),
            listen_port: hello.listen_port,
            last_ping: None,
            capabilities: hello.capabilities.iter().cloned().collect(),
            session_id: self.info.session_id,
            notes: HashMap::new(),
        };

        let handlers =
            self.host.register_peer(self.handle.clone(), self.info.clone(), hello.capabilities);
        if let Err(err) = self.capabilities.install(handlers) {
            warn!(
                target: "net::session",
                session = self.info.session_id, %err, "rejecting capability handlers"
            );
            self.start_disconnect(DisconnectReason::Unspecified);
        }
        Ok(true)
    }

    fn on_pong(&mut self) {
        if let Some(sent) = self.ping_sent.take() {
            let last_ping = sent.elapsed();
            self.info.last_ping = Some(last_ping);
            trace!(
                target: "net::session",
                session = self.info.session_id,
                latency_ms = last_ping.as_millis() as u64,
                "pong"
            );
        }
        if let Err(err) = self.pinger.on_pong() {
            trace!(target: "net::session", session = self.info.session_id, %err, "pinger");
        }
    }

    fn on_get_peers(&mut self) -> Result<bool, WireError> {
        let peers = self.host.potential_peers(&self.known_nodes);
        if peers.is_empty() {
            return Ok(true)
        }
        let sampled = random_selection(peers, self.config.max_peers_per_packet);
        let mut entries = Vec::with_capacity(sampled.len());
        for peer in sampled {
            trace!(
                target: "net::session",
                session = self.info.session_id, id = %peer.id, address = %peer.address,
                "sending peer"
            );
            entries.push(PeerEntry {
                address: peer.address.ip(),
                port: peer.address.port(),
                id: peer.id,
            });
            self.known_nodes.insert(peer.index);
        }
        self.seal_and_send(ProtocolMessage::Peers(entries));
        Ok(true)
    }

    fn on_peers(&mut self, entries: Vec<PeerEntry>) -> Result<bool, WireError> {
        let my_id = self.node.as_ref().map(|node| node.read().id);
        let my_origin =
            self.node.as_ref().map(|node| node.read().id_origin).unwrap_or(Origin::SelfThird);
        let own_addresses = self.host.local_addresses();
        let listen_port = self.host.listen_port();

        for entry in entries {
            let endpoint = SocketAddr::new(entry.address, entry.port);
            trace!(
                target: "net::session",
                session = self.info.session_id, %endpoint, id = %entry.id, "checking gossiped peer"
            );

            if is_private_address(&entry.address) && !self.host.local_networking() {
                continue // private address
            }
            if entry.id == NodeId::ZERO {
                continue // null identity
            }
            if entry.id == self.host.id() {
                continue // our own info
            }
            if Some(entry.id) == my_id {
                continue // the sender's own info
            }
            if let Some(known) = self.host.node(&entry.id) {
                // known already; possibly learn its public address
                let mut known = known.write();
                if is_private_address(&known.address.ip()) && !is_private_address(&entry.address) {
                    known.address = endpoint;
                }
                continue
            }
            if entry.port == 0 {
                continue // zero port
            }
            if entry.port == listen_port && own_addresses.contains(&entry.address) {
                continue // one of our own addresses
            }
            if self.host.known_endpoint(&endpoint) {
                continue // endpoint already taken by another node
            }

            // passed all checks, assume it is good
            self.add_rating(1000);
            let origin = if my_origin == Origin::Perfect {
                Origin::PerfectThird
            } else {
                Origin::SelfThird
            };
            self.host.note_node(entry.id, endpoint, origin, true, None);
            trace!(
                target: "net::session",
                session = self.info.session_id, %endpoint, id = %entry.id, "new peer"
            );
        }
        Ok(true)
    }

    /// Queues a ping and records its departure for round-trip measurement.
    fn ping(&mut self) {
        self.seal_and_send(ProtocolMessage::Ping);
        self.ping_sent = Some(Instant::now());
    }

    /// Builds, seals and queues a built-in packet.
    fn seal_and_send(&mut self, message: ProtocolMessage) {
        let mut frame = message.to_frame();
        self.host.seal(&mut frame);
        self.queue_frame(frame.freeze());
    }

    /// Appends a sealed frame to the write queue.
    fn queue_frame(&mut self, frame: Bytes) {
        if let Err(err) = check_frame(&frame) {
            warn!(
                target: "net::session",
                session = self.info.session_id, %err, "queueing invalid frame"
            );
        }
        self.outgoing.push_back(frame);
    }

    /// Initiates a graceful disconnect.
    ///
    /// Abandons anything still queued, queues the Disconnect frame and arms
    /// the grace timer. Returns `true` if a disconnect was already under way
    /// and the connection should be dropped on the spot instead.
    fn start_disconnect(&mut self, reason: DisconnectReason) -> bool {
        if self.grace.is_some() {
            return true
        }
        debug!(
            target: "net::session",
            session = self.info.session_id, %reason, "disconnecting"
        );
        counter!("network.session_disconnects").increment(1);
        if let Some(node) = &self.node {
            node.write().last_disconnect = Some(reason);
        }
        self.outgoing.clear();
        self.seal_and_send(ProtocolMessage::Disconnect(reason));
        self.grace = Some(Box::pin(tokio::time::sleep(self.config.disconnect_grace)));
        false
    }

    /// Closes the connection. Idempotent.
    async fn dropped(&mut self) {
        trace!(
            target: "net::session",
            session = self.info.session_id, "closing connection"
        );
        counter!("network.sessions_closed").increment(1);
        let _ = self.conn.close().await;
    }

    /// Bumps the associated node's rating and score.
    fn add_rating(&self, amount: i64) {
        if let Some(node) = &self.node {
            let mut node = node.write();
            node.rating += amount;
            node.score += amount;
        }
    }
}

impl<S> Drop for Session<S> {
    fn drop(&mut self) {
        // persist the last-known endpoint for an established identity
        if let Some(id) = self.node.as_ref().map(|node| node.read().id) {
            self.host.note_node(id, self.manual_endpoint, Origin::Unknown, true, None);
        }
        self.capabilities.reset();
    }
}

/// Uniform sample of up to `n` elements, without replacement.
///
/// Sequences of `n` or fewer elements are returned unchanged.
fn random_selection<T>(mut items: Vec<T>, n: usize) -> Vec<T> {
    if items.len() <= n {
        return items
    }
    let mut rng = rand::thread_rng();
    while items.len() > n {
        let victim = rng.gen_range(0..items.len());
        items.swap_remove(victim);
    }
    items
}

/// Whether an address lies in a private, loopback, link-local or unspecified
/// range.
fn is_private_address(address: &IpAddr) -> bool {
    match address {
        IpAddr::V4(ip) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        IpAddr::V6(ip) => {
            ip.is_loopback() ||
                ip.is_unspecified() ||
                (ip.segments()[0] & 0xfe00) == 0xfc00 ||
                (ip.segments()[0] & 0xffc0) == 0xfe80
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{capability::Capability, test_utils::MockHost};
    use orbit_wire::{frame, CapDesc, FrameCodec, HEADER_LENGTH};
    use parking_lot::Mutex;
    use std::{net::Ipv4Addr, time::Duration};
    use tokio::{
        io::{AsyncReadExt, AsyncWriteExt, DuplexStream},
        time::timeout,
    };
    use tokio_util::codec::Framed;

    type TestConn = Framed<DuplexStream, FrameCodec>;

    const WAIT: Duration = Duration::from_secs(5);

    fn remote_addr() -> SocketAddr {
        "203.0.113.9:40404".parse().unwrap()
    }

    fn test_session(host: Arc<MockHost>) -> (Session<TestConn>, SessionHandle, TestConn) {
        let (local, remote) = tokio::io::duplex(1 << 16);
        let (session, handle) = Session::inbound(
            Framed::new(local, FrameCodec::default()),
            remote_addr(),
            host,
            SessionConfig::default(),
        );
        (session, handle, Framed::new(remote, FrameCodec::default()))
    }

    fn body_of(message: &ProtocolMessage) -> BytesMut {
        let mut frame = message.to_frame();
        let _ = frame.split_to(HEADER_LENGTH);
        frame
    }

    fn sealed(message: &ProtocolMessage) -> Bytes {
        let mut frame = message.to_frame();
        frame::seal(&mut frame);
        frame.freeze()
    }

    fn queued(session: &Session<TestConn>) -> Vec<ProtocolMessage> {
        session
            .outgoing
            .iter()
            .map(|frame| {
                check_frame(frame).unwrap();
                ProtocolMessage::decode_body(&frame[HEADER_LENGTH..]).unwrap()
            })
            .collect()
    }

    fn hello_from(id: NodeId, protocol_version: u32) -> ProtocolMessage {
        ProtocolMessage::Hello(HelloMessage {
            protocol_version,
            client_version: "peer/v1".to_string(),
            capabilities: vec![CapDesc::new("shard", 1)],
            listen_port: 30303,
            id,
        })
    }

    async fn next_message(conn: &mut TestConn) -> ProtocolMessage {
        let body = timeout(WAIT, conn.next()).await.unwrap().unwrap().unwrap();
        ProtocolMessage::decode_body(&body).unwrap()
    }

    #[derive(Debug)]
    struct RecordingCapability {
        offset: u8,
        seen: Arc<Mutex<Vec<u8>>>,
    }

    impl Capability for RecordingCapability {
        fn enabled(&self) -> bool {
            true
        }

        fn id_offset(&self) -> u8 {
            self.offset
        }

        fn message_count(&self) -> u8 {
            4
        }

        fn interpret(&mut self, id: u8, _body: &[u8]) -> Result<bool, WireError> {
            self.seen.lock().push(id);
            Ok(true)
        }

        fn reset(&mut self) {
            self.seen.lock().clear();
        }
    }

    #[tokio::test]
    async fn ping_elicits_exactly_one_pong() {
        let (mut session, _handle, _remote) = test_session(Arc::new(MockHost::new()));
        assert!(session.interpret(&body_of(&ProtocolMessage::Ping)).unwrap());
        assert_eq!(queued(&session), vec![ProtocolMessage::Pong]);
    }

    #[tokio::test]
    async fn pong_records_round_trip() {
        let (mut session, _handle, _remote) = test_session(Arc::new(MockHost::new()));
        session.ping_sent = Some(Instant::now() - Duration::from_millis(25));
        assert!(session.interpret(&body_of(&ProtocolMessage::Pong)).unwrap());
        let last_ping = session.info.last_ping.unwrap();
        assert!(last_ping >= Duration::from_millis(25));
        assert!(session.ping_sent.is_none());
    }

    #[tokio::test]
    async fn hello_registers_the_peer() {
        let host = Arc::new(MockHost::new());
        let (mut session, _handle, _remote) = test_session(host.clone());

        let id = NodeId::repeat_byte(0x42);
        assert!(session.interpret(&body_of(&hello_from(id, 5))).unwrap());

        assert!(queued(&session).is_empty());
        assert_eq!(session.id(), Some(id));
        assert_eq!(session.info.client_version, "peer/v1");
        assert_eq!(session.info.listen_port, 30303);
        assert!(session.known_nodes.contains(&0));

        let calls = host.note_node_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, id);
        assert_eq!(calls[0].endpoint, "203.0.113.9:30303".parse().unwrap());
        assert_eq!(calls[0].origin, Origin::Direct);
        assert!(!calls[0].pending);
        assert_eq!(calls[0].replaces, None);

        let registered = host.registered();
        assert_eq!(registered.len(), 1);
        assert_eq!(registered[0].0.id, id);
    }

    #[tokio::test]
    async fn hello_with_mismatched_version_disconnects() {
        let host = Arc::new(MockHost::new());
        let (mut session, _handle, _remote) = test_session(host.clone());

        let id = NodeId::repeat_byte(0x42);
        assert!(session.interpret(&body_of(&hello_from(id, 4))).unwrap());

        assert_eq!(
            queued(&session),
            vec![ProtocolMessage::Disconnect(DisconnectReason::IncompatibleProtocol)]
        );
        assert!(session.grace.is_some());
        // the identity was still noted before the version check
        assert_eq!(host.note_node_calls().len(), 1);
        assert_eq!(
            host.node_ref(&id).unwrap().read().last_disconnect,
            Some(DisconnectReason::IncompatibleProtocol)
        );
    }

    #[tokio::test]
    async fn hello_with_known_identity_disconnects_as_duplicate() {
        let host = Arc::new(MockHost::new());
        let id = NodeId::repeat_byte(0xaa);
        host.insert_connected(id);
        let (mut session, _handle, _remote) = test_session(host.clone());

        assert!(session.interpret(&body_of(&hello_from(id, 5))).unwrap());

        assert_eq!(
            queued(&session),
            vec![ProtocolMessage::Disconnect(DisconnectReason::DuplicatePeer)]
        );
        assert!(host.note_node_calls().is_empty());
    }

    #[tokio::test]
    async fn hello_with_null_identity_disconnects() {
        let host = Arc::new(MockHost::new());
        let (mut session, _handle, _remote) = test_session(host.clone());

        assert!(session.interpret(&body_of(&hello_from(NodeId::ZERO, 5))).unwrap());

        assert_eq!(
            queued(&session),
            vec![ProtocolMessage::Disconnect(DisconnectReason::NullIdentity)]
        );
        assert!(host.note_node_calls().is_empty());
    }

    #[tokio::test]
    async fn changed_identity_is_rejected_for_strong_origins() {
        let host = Arc::new(MockHost::new());
        let prior_id = NodeId::repeat_byte(0x0a);
        let node = host.add_node(prior_id, "198.51.100.3:30303".parse().unwrap(), Origin::Direct);

        let (local, _remote) = tokio::io::duplex(1 << 16);
        let (mut session, _handle) = Session::outbound(
            Framed::new(local, FrameCodec::default()),
            remote_addr(),
            node,
            false,
            host.clone(),
            SessionConfig::default(),
        );

        assert!(session.interpret(&body_of(&hello_from(NodeId::repeat_byte(0x0b), 5))).unwrap());
        assert_eq!(
            queued(&session),
            vec![ProtocolMessage::Disconnect(DisconnectReason::UnexpectedIdentity)]
        );
    }

    #[tokio::test]
    async fn changed_identity_is_accepted_for_weak_origins() {
        let host = Arc::new(MockHost::new());
        let prior_id = NodeId::repeat_byte(0x0a);
        let new_id = NodeId::repeat_byte(0x0b);
        let node = host.add_node(prior_id, "198.51.100.3:30303".parse().unwrap(), Origin::SelfThird);

        let (local, _remote) = tokio::io::duplex(1 << 16);
        let (mut session, _handle) = Session::outbound(
            Framed::new(local, FrameCodec::default()),
            remote_addr(),
            node,
            false,
            host.clone(),
            SessionConfig::default(),
        );

        assert!(session.interpret(&body_of(&hello_from(new_id, 5))).unwrap());
        assert!(queued(&session).is_empty());
        assert_eq!(session.id(), Some(new_id));

        let calls = host.note_node_calls();
        let hello_call = calls.iter().find(|call| call.id == new_id).unwrap();
        assert_eq!(hello_call.replaces, Some(prior_id));
    }

    #[tokio::test]
    async fn gossip_is_filtered_and_survivors_promoted() {
        let host = Arc::new(MockHost::new());
        let (mut session, _handle, _remote) = test_session(host.clone());

        let peer_id = NodeId::repeat_byte(0x42);
        assert!(session.interpret(&body_of(&hello_from(peer_id, 5))).unwrap());

        let id_x = NodeId::repeat_byte(0x01);
        let id_y = NodeId::repeat_byte(0x02);
        let id_z = NodeId::repeat_byte(0x03);
        let peers = ProtocolMessage::Peers(vec![
            // private range, host not in local-networking mode
            PeerEntry { address: IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), port: 30303, id: id_x },
            // zero port
            PeerEntry { address: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 5)), port: 0, id: id_y },
            // clean
            PeerEntry { address: IpAddr::V4(Ipv4Addr::new(203, 0, 113, 6)), port: 30303, id: id_z },
        ]);
        assert!(session.interpret(&body_of(&peers)).unwrap());

        let calls = host.note_node_calls();
        assert_eq!(calls.len(), 2, "only the hello and the surviving entry may be noted");
        assert_eq!(calls[1].id, id_z);
        assert_eq!(calls[1].endpoint, "203.0.113.6:30303".parse().unwrap());
        assert_eq!(calls[1].origin, Origin::SelfThird);
        assert!(calls[1].pending);

        // a single rating bump for a single useful entry
        let sender = host.node_ref(&peer_id).unwrap();
        assert_eq!(sender.read().rating, 1000);
        assert_eq!(sender.read().score, 1000);
    }

    #[tokio::test]
    async fn gossip_updates_private_address_of_known_node() {
        let host = Arc::new(MockHost::new());
        let known_id = NodeId::repeat_byte(0x77);
        host.add_node(known_id, "10.0.0.5:30303".parse().unwrap(), Origin::SelfThird);
        let (mut session, _handle, _remote) = test_session(host.clone());

        let peers = ProtocolMessage::Peers(vec![PeerEntry {
            address: IpAddr::V4(Ipv4Addr::new(198, 51, 100, 7)),
            port: 30303,
            id: known_id,
        }]);
        assert!(session.interpret(&body_of(&peers)).unwrap());

        assert_eq!(
            host.node_ref(&known_id).unwrap().read().address,
            "198.51.100.7:30303".parse::<SocketAddr>().unwrap()
        );
        // not re-noted, not promoted
        assert!(host.note_node_calls().is_empty());
    }

    #[tokio::test]
    async fn get_peers_replies_with_known_nodes() {
        let host = Arc::new(MockHost::new());
        let first = NodeId::repeat_byte(0x05);
        let second = NodeId::repeat_byte(0x06);
        host.add_node(first, "192.0.2.1:30303".parse().unwrap(), Origin::SelfThird);
        host.add_node(second, "192.0.2.2:30304".parse().unwrap(), Origin::SelfThird);
        let (mut session, _handle, _remote) = test_session(host.clone());

        assert!(session.interpret(&body_of(&ProtocolMessage::GetPeers)).unwrap());

        match &queued(&session)[..] {
            [ProtocolMessage::Peers(entries)] => {
                assert_eq!(entries.len(), 2);
                assert_eq!(entries[0].id, first);
                assert_eq!(entries[0].port, 30303);
                assert_eq!(entries[1].id, second);
            }
            other => panic!("expected one peers packet, got {other:?}"),
        }
        // the peer will not be told about these again
        assert!(session.known_nodes.contains(&0));
        assert!(session.known_nodes.contains(&1));
    }

    #[tokio::test]
    async fn get_peers_with_nothing_to_share_sends_nothing() {
        let (mut session, _handle, _remote) = test_session(Arc::new(MockHost::new()));
        assert!(session.interpret(&body_of(&ProtocolMessage::GetPeers)).unwrap());
        assert!(queued(&session).is_empty());
    }

    #[tokio::test]
    async fn capability_packets_are_dispatched_rebased() {
        let host = Arc::new(MockHost::new());
        let seen = Arc::new(Mutex::new(Vec::new()));
        host.set_handlers(vec![Box::new(RecordingCapability {
            offset: 0x10,
            seen: Arc::clone(&seen),
        })]);
        let (mut session, _handle, _remote) = test_session(host.clone());
        assert!(session.interpret(&body_of(&hello_from(NodeId::repeat_byte(0x42), 5))).unwrap());

        // list [0x12, 7]
        let body = [0xc2, 0x12, 0x07];
        assert!(session.interpret(&body).unwrap());
        assert_eq!(*seen.lock(), vec![0x02]);
    }

    #[tokio::test]
    async fn unclaimed_packet_terminates_the_session() {
        let host = Arc::new(MockHost::new());
        let (mut session, _handle, _remote) = test_session(host);
        // list [0x30], no capability installed
        let body = [0xc1, 0x30];
        assert!(!session.interpret(&body).unwrap());
        assert!(queued(&session).is_empty());
    }

    #[tokio::test]
    async fn start_sends_hello_ping_getpeers_in_order() {
        let host = Arc::new(MockHost::new());
        let (mut session, _handle, mut remote) = test_session(host.clone());
        session.start();
        let task = tokio::spawn(session.run());

        match next_message(&mut remote).await {
            ProtocolMessage::Hello(hello) => {
                assert_eq!(hello.protocol_version, host.protocol_version);
                assert_eq!(hello.client_version, host.client_version);
                assert_eq!(hello.listen_port, host.listen_port);
                assert_eq!(hello.id, host.node_id);
            }
            other => panic!("expected hello first, got {other:?}"),
        }
        assert_eq!(next_message(&mut remote).await, ProtocolMessage::Ping);
        assert_eq!(next_message(&mut remote).await, ProtocolMessage::GetPeers);

        drop(remote);
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn bad_magic_yields_exactly_one_bad_protocol_disconnect() {
        let host = Arc::new(MockHost::new());
        let (local, mut remote) = tokio::io::duplex(1 << 16);
        let (session, _handle) = Session::inbound(
            Framed::new(local, FrameCodec::default()),
            remote_addr(),
            host,
            SessionConfig::default().with_disconnect_grace(Duration::from_millis(100)),
        );
        let task = tokio::spawn(session.run());

        remote.write_all(&[0xde, 0xad, 0xbe, 0xef, 0x00, 0x00, 0x00, 0x01, 0x00]).await.unwrap();

        // the one and only frame out is Disconnect(BadProtocol)
        let mut out = [0u8; 11];
        timeout(WAIT, remote.read_exact(&mut out)).await.unwrap().unwrap();
        assert_eq!(
            out,
            [0x22, 0x40, 0x08, 0x91, 0x00, 0x00, 0x00, 0x03, 0xc2, 0x01, 0x02]
        );

        // nothing further, the session closes after the grace window
        let trailing = timeout(WAIT, remote.read(&mut out)).await.unwrap().unwrap();
        assert_eq!(trailing, 0);
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn frames_are_written_in_submission_order() {
        let host = Arc::new(MockHost::new());
        let (session, handle, mut remote) = test_session(host);
        let task = tokio::spawn(session.run());

        handle.send_frame(sealed(&ProtocolMessage::Ping)).unwrap();
        handle.send_frame(sealed(&ProtocolMessage::Pong)).unwrap();

        assert_eq!(next_message(&mut remote).await, ProtocolMessage::Ping);
        assert_eq!(next_message(&mut remote).await, ProtocolMessage::Pong);

        drop(remote);
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn handle_disconnect_emits_the_reason_and_nothing_else() {
        let host = Arc::new(MockHost::new());
        let (session, handle, mut remote) = test_session(host);
        let task = tokio::spawn(session.run());

        handle.disconnect(DisconnectReason::ClientQuit).unwrap();
        assert_eq!(
            next_message(&mut remote).await,
            ProtocolMessage::Disconnect(DisconnectReason::ClientQuit)
        );

        // frames queued after the disconnect never make it out
        handle.send_frame(sealed(&ProtocolMessage::Ping)).unwrap();
        drop(remote);
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn remote_disconnect_closes_the_session() {
        let host = Arc::new(MockHost::new());
        let (session, _handle, mut remote) = test_session(host);
        let task = tokio::spawn(session.run());

        remote.send(sealed(&ProtocolMessage::Disconnect(DisconnectReason::TooManyPeers)))
            .await
            .unwrap();
        timeout(WAIT, task).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn missed_pong_disconnects_with_ping_timeout() {
        let host = Arc::new(MockHost::new());
        let (local, remote) = tokio::io::duplex(1 << 16);
        let config = SessionConfig::default()
            .with_ping_interval(Duration::from_millis(50))
            .with_ping_timeout(Duration::from_millis(25));
        let (session, _handle) = Session::inbound(
            Framed::new(local, FrameCodec::default()),
            remote_addr(),
            host,
            config,
        );
        let _task = tokio::spawn(session.run());
        let mut remote = Framed::new(remote, FrameCodec::default());

        assert_eq!(next_message(&mut remote).await, ProtocolMessage::Ping);
        // never answer
        assert_eq!(
            next_message(&mut remote).await,
            ProtocolMessage::Disconnect(DisconnectReason::PingTimeout)
        );
    }

    #[test]
    fn random_selection_returns_short_inputs_unchanged() {
        let items = vec![1, 2, 3];
        assert_eq!(random_selection(items.clone(), 3), items);
        assert_eq!(random_selection(items.clone(), 10), items);
    }

    #[test]
    fn random_selection_samples_without_replacement() {
        let items: Vec<u32> = (0..100).collect();
        let mut sampled = random_selection(items, 10);
        assert_eq!(sampled.len(), 10);
        sampled.sort_unstable();
        sampled.dedup();
        assert_eq!(sampled.len(), 10);
        assert!(sampled.iter().all(|item| *item < 100));
    }

    #[test]
    fn private_ranges_are_recognized() {
        let private = ["10.0.0.1", "192.168.1.9", "172.16.3.4", "127.0.0.1", "169.254.0.7"];
        for address in private {
            assert!(is_private_address(&address.parse().unwrap()), "{address}");
        }
        let public = ["203.0.113.6", "8.8.8.8", "2001:db8::1"];
        for address in public {
            assert!(!is_private_address(&address.parse().unwrap()), "{address}");
        }
        assert!(is_private_address(&"::1".parse().unwrap()));
        assert!(is_private_address(&"fe80::1".parse().unwrap()));
        assert!(is_private_address(&"fc00::1".parse().unwrap()));
    }
}
