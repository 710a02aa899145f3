use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rand::Rng as _;
use tokio::sync::Notify;

use super::error::DhtError;

/// A 160-bit Kademlia node identifier.
///
/// Treated as an unsigned big-endian integer for XOR distance and as an
/// MSB-first bit string for routing-trie descent.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub [u8; 20]);

impl NodeId {
    pub const BITS: usize = 160;

    pub fn random() -> Self {
        let mut id = [0u8; 20];
        rand::rng().fill(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, DhtError> {
        if bytes.len() != 20 {
            return Err(DhtError::InvalidNodeId);
        }
        let mut id = [0u8; 20];
        id.copy_from_slice(bytes);
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 20]
    }

    /// Bit `i` counted from the most significant end.
    pub fn bit(&self, i: usize) -> usize {
        ((self.0[i / 8] >> (7 - i % 8)) & 1) as usize
    }

    pub fn distance(&self, other: &NodeId) -> [u8; 20] {
        let mut dist = [0u8; 20];
        for (i, d) in dist.iter_mut().enumerate() {
            *d = self.0[i] ^ other.0[i];
        }
        dist
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

/// A node as it appears on the wire: id plus IPv4 endpoint.
///
/// This is the unit of the compact 26-byte encoding in `find_node` and
/// `get_peers` replies; the routing table's [`Node`] records are built
/// from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeInfo {
    pub id: NodeId,
    pub addr: SocketAddr,
}

impl NodeInfo {
    pub const COMPACT_LEN: usize = 26;

    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self { id, addr }
    }

    /// Parses one compact entry: 20-byte id, 4-byte IPv4, 2-byte
    /// big-endian port.
    pub fn from_compact(data: &[u8]) -> Option<Self> {
        if data.len() != Self::COMPACT_LEN {
            return None;
        }
        let id = NodeId::from_bytes(&data[..20]).ok()?;
        let ip = Ipv4Addr::new(data[20], data[21], data[22], data[23]);
        let port = u16::from_be_bytes([data[24], data[25]]);
        Some(Self::new(id, SocketAddr::new(IpAddr::V4(ip), port)))
    }

    /// Compact form; `None` for IPv6 endpoints, which BEP-5's `nodes`
    /// field cannot carry.
    pub fn to_compact(&self) -> Option<[u8; Self::COMPACT_LEN]> {
        let SocketAddr::V4(v4) = self.addr else {
            return None;
        };
        let mut out = [0u8; Self::COMPACT_LEN];
        out[..20].copy_from_slice(&self.id.0);
        out[20..24].copy_from_slice(&v4.ip().octets());
        out[24..26].copy_from_slice(&v4.port().to_be_bytes());
        Some(out)
    }
}

/// A live DHT node tracked by the routing table.
///
/// The table owns the record; everything else holds `Arc` handles and
/// revalidates through the table before acting on one. Bootstrap
/// records carry a placeholder id and are exempt from liveness
/// eviction.
pub struct Node {
    pub id: NodeId,
    pub addr: SocketAddr,
    pub is_bootstrap: bool,
    last_seen: Mutex<Instant>,
    pong: Notify,
}

impl Node {
    pub fn new(id: NodeId, addr: SocketAddr) -> Self {
        Self {
            id,
            addr,
            is_bootstrap: false,
            last_seen: Mutex::new(Instant::now()),
            pong: Notify::new(),
        }
    }

    /// A bootstrap seed: the real id is unknown until it answers, so a
    /// random placeholder keeps it routable in the trie.
    pub fn bootstrap(addr: SocketAddr) -> Self {
        Self {
            id: NodeId::random(),
            addr,
            is_bootstrap: true,
            last_seen: Mutex::new(Instant::now()),
            pong: Notify::new(),
        }
    }

    pub fn info(&self) -> NodeInfo {
        NodeInfo::new(self.id, self.addr)
    }

    /// Marks the node as heard from.
    pub fn touch(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    pub fn idle(&self, now: Instant) -> Duration {
        now.saturating_duration_since(*self.last_seen.lock())
    }

    /// Signals a received pong. Single-slot: at most one notification
    /// is stored for the next waiter.
    pub fn notify_pong(&self) {
        self.pong.notify_one();
    }

    /// Resolves on the next pong from this node.
    pub async fn pong(&self) {
        self.pong.notified().await;
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("addr", &self.addr)
            .field("is_bootstrap", &self.is_bootstrap)
            .finish_non_exhaustive()
    }
}
