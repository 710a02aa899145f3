use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng as _;

use super::message::TransactionId;
use super::node::NodeId;

/// What a pending transaction was asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxKind {
    Ping,
    FindNode,
    GetPeers,
    AnnouncePeer,
}

/// One outstanding request, kept until the reply arrives or the entry
/// ages out.
#[derive(Debug, Clone)]
pub struct Transaction {
    pub id: TransactionId,
    pub kind: TxKind,
    /// Meaningful for `get_peers`: the hash being looked up.
    pub info_hash: Option<[u8; 20]>,
    /// Meaningful for `find_node`: the lookup target.
    pub target: Option<NodeId>,
    pub created_at: Instant,
}

/// Correlates replies with requests.
///
/// Bounded: past `capacity`, the oldest entry (by arrival) is evicted
/// to admit a new one. Expiring: entries older than `timeout` are never
/// returned by [`take`](Self::take). Id collisions overwrite the older
/// entry, which is fine for 16 random bytes.
pub struct TransactionManager {
    inner: Mutex<Store>,
    capacity: usize,
    timeout: Duration,
}

struct Store {
    map: HashMap<TransactionId, Transaction>,
    arrivals: VecDeque<TransactionId>,
}

impl TransactionManager {
    pub fn new(capacity: usize, timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(Store {
                map: HashMap::with_capacity(capacity.min(4096)),
                arrivals: VecDeque::with_capacity(capacity.min(4096)),
            }),
            capacity: capacity.max(1),
            timeout,
        }
    }

    /// A fresh random 16-byte transaction id.
    pub fn generate_id() -> TransactionId {
        let mut id = [0u8; 16];
        rand::rng().fill(&mut id);
        Bytes::copy_from_slice(&id)
    }

    /// Registers a transaction sent at `now`.
    pub fn add(
        &self,
        id: TransactionId,
        kind: TxKind,
        info_hash: Option<[u8; 20]>,
        target: Option<NodeId>,
        now: Instant,
    ) {
        let mut store = self.inner.lock();
        store.prune_expired(now, self.timeout);
        while store.map.len() >= self.capacity {
            if !store.evict_oldest() {
                break;
            }
        }
        store.map.insert(
            id.clone(),
            Transaction {
                id: id.clone(),
                kind,
                info_hash,
                target,
                created_at: now,
            },
        );
        store.arrivals.push_back(id);
    }

    /// Removes and returns the transaction for `id`, unless it has
    /// expired. Each entry is handed out at most once.
    pub fn take(&self, id: &[u8], now: Instant) -> Option<Transaction> {
        let tx = self.inner.lock().map.remove(id)?;
        if now.saturating_duration_since(tx.created_at) >= self.timeout {
            return None;
        }
        Some(tx)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Store {
    /// Pops arrival entries until one actually evicts a live
    /// transaction. Stale arrival ids (already taken or overwritten)
    /// are skipped.
    fn evict_oldest(&mut self) -> bool {
        while let Some(id) = self.arrivals.pop_front() {
            if self.map.remove(&id).is_some() {
                return true;
            }
        }
        false
    }

    fn prune_expired(&mut self, now: Instant, timeout: Duration) {
        while let Some(id) = self.arrivals.front().cloned() {
            match self.map.get(&id) {
                Some(tx) if now.saturating_duration_since(tx.created_at) >= timeout => {
                    self.arrivals.pop_front();
                    self.map.remove(&id);
                }
                Some(_) => break,
                None => {
                    self.arrivals.pop_front();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mgr(capacity: usize, timeout_secs: u64) -> TransactionManager {
        TransactionManager::new(capacity, Duration::from_secs(timeout_secs))
    }

    fn tid(b: &[u8]) -> TransactionId {
        Bytes::copy_from_slice(b)
    }

    #[test]
    fn take_consumes_exactly_once() {
        let txs = mgr(10, 30);
        let now = Instant::now();
        txs.add(tid(b"aa"), TxKind::Ping, None, None, now);

        assert!(txs.take(b"aa", now).is_some());
        assert!(txs.take(b"aa", now).is_none());
    }

    #[test]
    fn expired_entries_are_never_returned() {
        let txs = mgr(10, 1);
        let t0 = Instant::now();
        txs.add(tid(b"aa"), TxKind::Ping, None, None, t0);

        let half = t0 + Duration::from_millis(500);
        assert!(txs.take(b"aa", half).is_some());

        txs.add(tid(b"aa"), TxKind::Ping, None, None, t0);
        let late = t0 + Duration::from_millis(1500);
        assert!(txs.take(b"aa", late).is_none());
    }

    #[test]
    fn oldest_is_evicted_when_full() {
        let txs = mgr(2, 30);
        let now = Instant::now();
        txs.add(tid(b"t1"), TxKind::Ping, None, None, now);
        txs.add(tid(b"t2"), TxKind::FindNode, None, None, now);
        txs.add(tid(b"t3"), TxKind::GetPeers, Some([1u8; 20]), None, now);

        assert_eq!(txs.len(), 2);
        assert!(txs.take(b"t1", now).is_none());
        assert!(txs.take(b"t2", now).is_some());
        assert!(txs.take(b"t3", now).is_some());
    }

    #[test]
    fn collision_overwrites_older_entry() {
        let txs = mgr(10, 30);
        let now = Instant::now();
        txs.add(tid(b"aa"), TxKind::Ping, None, None, now);
        txs.add(tid(b"aa"), TxKind::FindNode, None, Some(NodeId([5u8; 20])), now);

        assert_eq!(txs.len(), 1);
        let tx = txs.take(b"aa", now).unwrap();
        assert_eq!(tx.kind, TxKind::FindNode);
    }

    #[test]
    fn kind_payload_round_trips() {
        let txs = mgr(10, 30);
        let now = Instant::now();
        let hash = [9u8; 20];
        txs.add(tid(b"gp"), TxKind::GetPeers, Some(hash), None, now);

        let tx = txs.take(b"gp", now).unwrap();
        assert_eq!(tx.kind, TxKind::GetPeers);
        assert_eq!(tx.info_hash, Some(hash));
        assert_eq!(tx.target, None);
    }

    #[test]
    fn generated_ids_are_sixteen_bytes() {
        let a = TransactionManager::generate_id();
        let b = TransactionManager::generate_id();
        assert_eq!(a.len(), 16);
        assert_ne!(a, b);
    }
}
