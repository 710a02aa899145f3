use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use super::node::NodeId;

/// Well-known routers used to join the overlay.
pub const BOOTSTRAP_NODES: &[&str] = &[
    "router.bittorrent.com:6881",
    "dht.transmissionbt.com:6881",
    "router.utorrent.com:6881",
];

/// Override for the source id sent in outbound `find_node` queries.
pub type GenId = Arc<dyn Fn() -> NodeId + Send + Sync>;

/// Veto hook for non-bootstrap table insertions; `true` rejects.
pub type NodeFilter = Arc<dyn Fn(IpAddr, &NodeId) -> bool + Send + Sync>;

/// Crawler configuration.
///
/// `Config::default()` matches the constants of a typical crawl
/// deployment; most fields only need touching for tests or for fleets
/// biased by `node_filter`/`gen_id`.
#[derive(Clone)]
pub struct Config {
    /// UDP port to bind.
    pub listen_port: u16,
    /// Below this table size, discovery runs every tick.
    pub min_nodes: usize,
    /// Hard cap on routing-table size.
    pub max_nodes: usize,
    /// Nodes per bucket (Kademlia k).
    pub bucket_size: usize,
    /// Lifetime of a pending transaction.
    pub tx_timeout: Duration,
    /// Pending-transaction cap; the oldest entry is evicted beyond it.
    pub max_transactions: usize,
    /// Idle time after which a non-bootstrap node is evicted.
    pub node_timeout: Duration,
    /// Idle time after which a node gets pinged.
    pub ping_threshold: Duration,
    /// Leaf-node budget per discovery sweep.
    pub max_discovery: usize,
    /// Dispatch worker tasks draining the ingress channel.
    pub dispatch_workers: usize,
    /// Ingress channel capacity; overflow drops packets.
    pub packet_queue: usize,
    /// Fetcher queue capacity; also the fetch parallelism cap.
    pub fetch_queue: usize,
    /// Total get_peers queries the accelerator may spend per info-hash.
    pub max_fanout: usize,
    /// Distinct info-hashes the fan-out budget remembers.
    pub fanout_cache: usize,
    /// Bootstrap endpoints, `host:port`.
    pub bootstrap: Vec<String>,
    /// Optional override for the id in outbound `find_node`.
    pub gen_id: Option<GenId>,
    /// Optional veto on non-bootstrap insertions.
    pub node_filter: Option<NodeFilter>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_port: 6881,
            min_nodes: 10_000,
            max_nodes: 1_000_000,
            bucket_size: 8,
            tx_timeout: Duration::from_secs(30),
            max_transactions: 30_000,
            node_timeout: Duration::from_secs(60),
            ping_threshold: Duration::from_secs(10),
            max_discovery: 32,
            dispatch_workers: 30,
            packet_queue: 1024,
            fetch_queue: 100,
            max_fanout: 64,
            fanout_cache: 4096,
            bootstrap: BOOTSTRAP_NODES.iter().map(|s| s.to_string()).collect(),
            gen_id: None,
            node_filter: None,
        }
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("listen_port", &self.listen_port)
            .field("min_nodes", &self.min_nodes)
            .field("max_nodes", &self.max_nodes)
            .field("bucket_size", &self.bucket_size)
            .field("tx_timeout", &self.tx_timeout)
            .field("gen_id", &self.gen_id.is_some())
            .field("node_filter", &self.node_filter.is_some())
            .finish_non_exhaustive()
    }
}
