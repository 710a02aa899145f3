use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::message::TransactionId;
use super::node::Node;

/// Holding pen for nodes we have queried but which are not (yet) in the
/// routing table.
///
/// Keyed by the transaction id of the request we sent them, so a reply
/// from an unknown address can be matched to its record, the node
/// marked live, and a table insertion attempted. Bounded and
/// time-indexed: entries fall out after `ttl` or when capacity forces
/// the oldest one out.
pub struct InitQueue {
    inner: Mutex<Store>,
    capacity: usize,
    ttl: Duration,
}

struct Store {
    map: HashMap<TransactionId, (Arc<Node>, Instant)>,
    arrivals: VecDeque<TransactionId>,
}

impl InitQueue {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            inner: Mutex::new(Store {
                map: HashMap::new(),
                arrivals: VecDeque::new(),
            }),
            capacity: capacity.max(1),
            ttl,
        }
    }

    pub fn push(&self, tx: TransactionId, node: Arc<Node>, now: Instant) {
        let mut store = self.inner.lock();
        while store.map.len() >= self.capacity {
            match store.arrivals.pop_front() {
                Some(oldest) => {
                    store.map.remove(&oldest);
                }
                None => break,
            }
        }
        store.map.insert(tx.clone(), (node, now));
        store.arrivals.push_back(tx);
    }

    /// Resolves a reply's transaction id to its parked node, removing
    /// the entry. Expired entries resolve to `None`.
    pub fn take(&self, tx: &[u8], now: Instant) -> Option<Arc<Node>> {
        let (node, parked_at) = self.inner.lock().map.remove(tx)?;
        if now.saturating_duration_since(parked_at) >= self.ttl {
            return None;
        }
        Some(node)
    }

    /// Drops entries past their ttl; called from the maintenance tick.
    pub fn prune(&self, now: Instant) {
        let mut store = self.inner.lock();
        while let Some(tx) = store.arrivals.front().cloned() {
            match store.map.get(&tx) {
                Some((_, parked_at))
                    if now.saturating_duration_since(*parked_at) >= self.ttl =>
                {
                    store.arrivals.pop_front();
                    store.map.remove(&tx);
                }
                Some(_) => break,
                None => {
                    store.arrivals.pop_front();
                }
            }
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }
}
