//! Session config support

use std::time::Duration;

/// Default interval between keepalive pings.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(60);

/// Default time to wait for a pong before the peer is timed out.
const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on the disconnect grace window.
///
/// After the Disconnect frame has been flushed the session waits at most
/// this long for the peer to close before dropping the connection itself.
const DEFAULT_DISCONNECT_GRACE: Duration = Duration::from_secs(2);

/// Default cap on the number of entries in one gossip reply.
const DEFAULT_MAX_PEERS_PER_PACKET: usize = 10;

/// Configuration for a single session.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    /// Interval between keepalive pings.
    pub ping_interval: Duration,
    /// Time to wait for a pong before disconnecting with a ping timeout.
    pub ping_timeout: Duration,
    /// Upper bound on the disconnect grace window.
    pub disconnect_grace: Duration,
    /// Maximum number of peers gossiped in one Peers packet.
    pub max_peers_per_packet: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ping_interval: DEFAULT_PING_INTERVAL,
            ping_timeout: DEFAULT_PING_TIMEOUT,
            disconnect_grace: DEFAULT_DISCONNECT_GRACE,
            max_peers_per_packet: DEFAULT_MAX_PEERS_PER_PACKET,
        }
    }
}

impl SessionConfig {
    /// Sets the keepalive ping interval.
    pub const fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = interval;
        self
    }

    /// Sets the pong timeout.
    pub const fn with_ping_timeout(mut self, timeout: Duration) -> Self {
        self.ping_timeout = timeout;
        self
    }

    /// Sets the bound on the disconnect grace window.
    pub const fn with_disconnect_grace(mut self, grace: Duration) -> Self {
        self.disconnect_grace = grace;
        self
    }
}
