use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::trace;

use super::config::NodeFilter;
use super::node::{Node, NodeId};

/// A trie bucket: either an internal node with two children or a leaf
/// holding up to k records whose ids share the bucket's prefix.
struct Bucket {
    prefix: NodeId,
    prefix_len: usize,
    nodes: Vec<Arc<Node>>,
    children: Option<Box<[Bucket; 2]>>,
}

impl Bucket {
    fn new(prefix: NodeId, prefix_len: usize) -> Self {
        Self {
            prefix,
            prefix_len,
            nodes: Vec::new(),
            children: None,
        }
    }

    fn insert(&mut self, node: Arc<Node>, k: usize, max_prefix: usize) -> bool {
        if let Some(children) = self.children.as_mut() {
            let bit = node.id.bit(self.prefix_len);
            return children[bit].insert(node, k, max_prefix);
        }
        if self.nodes.iter().any(|n| n.id == node.id) {
            return false;
        }
        if self.nodes.len() < k {
            self.nodes.push(node);
            return true;
        }
        if self.prefix_len >= max_prefix {
            // Bucket can no longer split; the newcomer loses.
            return false;
        }
        self.nodes.push(node.clone());
        self.split_overfull(k, max_prefix);
        self.confirm(&node, k)
    }

    /// Splits this leaf one bit deeper and redistributes its records.
    fn split(&mut self) {
        let zero = Bucket::new(self.prefix, self.prefix_len + 1);
        let mut one_prefix = self.prefix;
        one_prefix.0[self.prefix_len / 8] |= 1 << (7 - self.prefix_len % 8);
        let one = Bucket::new(one_prefix, self.prefix_len + 1);

        let mut children = Box::new([zero, one]);
        for node in self.nodes.drain(..) {
            let bit = node.id.bit(self.prefix_len);
            children[bit].nodes.push(node);
        }
        self.children = Some(children);
    }

    /// Splits until no leaf is over capacity or the prefix cap stops
    /// the recursion (adversarially aligned ids).
    fn split_overfull(&mut self, k: usize, max_prefix: usize) {
        if self.nodes.len() <= k || self.prefix_len >= max_prefix {
            return;
        }
        self.split();
        if let Some(children) = self.children.as_mut() {
            children[0].split_overfull(k, max_prefix);
            children[1].split_overfull(k, max_prefix);
        }
    }

    /// After a speculative insert + split, checks whether `node`'s leaf
    /// ended up over capacity at the prefix cap; if so, backs the
    /// newcomer out and keeps the existing records.
    fn confirm(&mut self, node: &Arc<Node>, k: usize) -> bool {
        if let Some(children) = self.children.as_mut() {
            let bit = node.id.bit(self.prefix_len);
            return children[bit].confirm(node, k);
        }
        if self.nodes.len() > k {
            self.nodes.retain(|n| !Arc::ptr_eq(n, node));
            return false;
        }
        true
    }

    fn find(&self, id: &NodeId) -> Option<Arc<Node>> {
        match self.children.as_ref() {
            Some(children) => children[id.bit(self.prefix_len)].find(id),
            None => self.nodes.iter().find(|n| n.id == *id).cloned(),
        }
    }

    fn remove(&mut self, node: &Arc<Node>) -> bool {
        if let Some(children) = self.children.as_mut() {
            let bit = node.id.bit(self.prefix_len);
            return children[bit].remove(node);
        }
        let before = self.nodes.len();
        self.nodes.retain(|n| !Arc::ptr_eq(n, node));
        self.nodes.len() != before
    }

    /// Evicts timed-out records from this leaf and flags quiet ones for
    /// a ping.
    fn sweep(&mut self, pass: &mut SweepPass<'_>) {
        self.nodes.retain(|n| {
            let idle = n.idle(pass.now);
            if !n.is_bootstrap && idle >= pass.node_timeout {
                pass.evicted.push(n.clone());
                return false;
            }
            if idle >= pass.ping_threshold {
                pass.to_ping.push(n.clone());
            }
            true
        });
    }

    /// Descends to `id`'s leaf, sweeps it, and returns the survivors.
    fn leaf_swept(&mut self, id: &NodeId, pass: &mut SweepPass<'_>) -> Vec<Arc<Node>> {
        if let Some(children) = self.children.as_mut() {
            let bit = id.bit(self.prefix_len);
            return children[bit].leaf_swept(id, pass);
        }
        self.sweep(pass);
        self.nodes.clone()
    }

    /// Bounded in-order leaf visit: queries every record in each leaf
    /// it reaches, sweeps the leaf, and stops once `budget` leaves have
    /// been seen. `left_first` flips the traversal order so alternating
    /// sweeps cover the whole id space.
    fn walk(
        &mut self,
        budget: &mut usize,
        left_first: bool,
        to_query: &mut Vec<Arc<Node>>,
        pass: &mut SweepPass<'_>,
    ) {
        if *budget == 0 {
            return;
        }
        if let Some(children) = self.children.as_mut() {
            let order: [usize; 2] = if left_first { [0, 1] } else { [1, 0] };
            for i in order {
                children[i].walk(budget, left_first, to_query, pass);
            }
            return;
        }
        *budget -= 1;
        to_query.extend(self.nodes.iter().cloned());
        self.sweep(pass);
    }

    #[cfg(test)]
    fn leaves<'a>(&'a self, out: &mut Vec<&'a Bucket>) {
        match self.children.as_ref() {
            Some(children) => {
                children[0].leaves(out);
                children[1].leaves(out);
            }
            None => out.push(self),
        }
    }
}

struct SweepPass<'a> {
    now: Instant,
    node_timeout: Duration,
    ping_threshold: Duration,
    evicted: &'a mut Vec<Arc<Node>>,
    to_ping: &'a mut Vec<Arc<Node>>,
}

/// Work produced under the table lock, acted on after it is released:
/// records to query or ping, and how many were evicted.
#[derive(Default)]
pub struct TableSweep {
    pub nodes: Vec<Arc<Node>>,
    pub to_ping: Vec<Arc<Node>>,
    pub evicted: usize,
}

/// The routing table: a bucket trie over node ids plus an address index
/// for O(1) ingress routing.
///
/// The engine wraps it in one `RwLock`; every mutating operation
/// returns owned `Arc<Node>` lists so no guard is held across sends.
pub struct RoutingTable {
    root: Bucket,
    index: HashMap<SocketAddr, Arc<Node>>,
    k: usize,
    max_prefix: usize,
    max_size: usize,
    node_timeout: Duration,
    ping_threshold: Duration,
    filter: Option<NodeFilter>,
}

impl RoutingTable {
    pub fn new(
        k: usize,
        max_size: usize,
        node_timeout: Duration,
        ping_threshold: Duration,
        filter: Option<NodeFilter>,
    ) -> Self {
        let k = k.max(1);
        // Cap so a split is always definable one bit deeper.
        let max_prefix = NodeId::BITS - k.next_power_of_two().trailing_zeros() as usize;
        Self {
            root: Bucket::new(NodeId([0u8; 20]), 0),
            index: HashMap::new(),
            k,
            max_prefix,
            max_size,
            node_timeout,
            ping_threshold,
            filter,
        }
    }

    /// Attempts to insert a record. Refused on duplicates (id or
    /// address), a vetoing filter (bootstrap records bypass it), a full
    /// table, or an unsplittable full bucket.
    pub fn add(&mut self, node: Arc<Node>) -> bool {
        if self.index.len() >= self.max_size {
            return false;
        }
        if self.index.contains_key(&node.addr) {
            return false;
        }
        if !node.is_bootstrap {
            if let Some(filter) = &self.filter {
                if filter(node.addr.ip(), &node.id) {
                    trace!(id = %node.id, addr = %node.addr, "node rejected by filter");
                    return false;
                }
            }
        }
        if !self.root.insert(node.clone(), self.k, self.max_prefix) {
            return false;
        }
        self.index.insert(node.addr, node);
        true
    }

    /// Removes a record by identity and drops its index entry.
    pub fn remove(&mut self, node: &Arc<Node>) {
        if self.root.remove(node) {
            self.index.remove(&node.addr);
        }
    }

    pub fn find_by_addr(&self, addr: &SocketAddr) -> Option<Arc<Node>> {
        self.index.get(addr).cloned()
    }

    pub fn find_by_id(&self, id: &NodeId) -> Option<Arc<Node>> {
        self.root.find(id)
    }

    pub fn contains_id(&self, id: &NodeId) -> bool {
        self.find_by_id(id).is_some()
    }

    /// Up to k records from the leaf that would hold `id` — the closest
    /// we track under XOR distance among nodes sharing its longest
    /// common prefix. Sweeps the leaf on the way.
    pub fn neighbours(&mut self, id: &NodeId, now: Instant) -> TableSweep {
        let mut evicted = Vec::new();
        let mut to_ping = Vec::new();
        let mut pass = SweepPass {
            now,
            node_timeout: self.node_timeout,
            ping_threshold: self.ping_threshold,
            evicted: &mut evicted,
            to_ping: &mut to_ping,
        };
        let mut nodes = self.root.leaf_swept(id, &mut pass);
        nodes.truncate(self.k);
        for gone in &evicted {
            self.index.remove(&gone.addr);
        }
        TableSweep {
            nodes,
            to_ping,
            evicted: evicted.len(),
        }
    }

    /// One discovery sweep: visits up to `leaf_budget` leaves in trie
    /// order (direction alternates via `left_first`), collecting every
    /// resident for a `find_node` and sweeping each visited leaf.
    pub fn discovery_plan(
        &mut self,
        leaf_budget: usize,
        left_first: bool,
        now: Instant,
    ) -> TableSweep {
        let mut evicted = Vec::new();
        let mut to_ping = Vec::new();
        let mut to_query = Vec::new();
        let mut pass = SweepPass {
            now,
            node_timeout: self.node_timeout,
            ping_threshold: self.ping_threshold,
            evicted: &mut evicted,
            to_ping: &mut to_ping,
        };
        let mut budget = leaf_budget;
        self.root.walk(&mut budget, left_first, &mut to_query, &mut pass);
        for gone in &evicted {
            self.index.remove(&gone.addr);
        }
        TableSweep {
            nodes: to_query,
            to_ping,
            evicted: evicted.len(),
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
