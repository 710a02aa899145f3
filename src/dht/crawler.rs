use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use super::config::Config;
use super::fanout::FanoutBudget;
use super::init_queue::InitQueue;
use super::message::{Body, KrpcMessage, Query, Reply, TransactionId};
use super::node::{Node, NodeId, NodeInfo};
use super::routing::RoutingTable;
use super::token::TokenSecrets;
use super::transactions::{TransactionManager, TxKind};
use super::DhtError;
use crate::metainfo::{InfoHash, MetaInfo};
use crate::peer::{FetchRequest, MetadataFetcher};

const MAX_DATAGRAM: usize = 65_535;
const TICK_INTERVAL: Duration = Duration::from_secs(1);
const TOKEN_ROTATION_INTERVAL: Duration = Duration::from_secs(5 * 60);
const INIT_QUEUE_SIZE: usize = 4096;
const INIT_QUEUE_TTL: Duration = Duration::from_secs(10);
const BOOTSTRAP_PONG_TIMEOUT: Duration = Duration::from_secs(10);
const OUTPUT_QUEUE: usize = 256;

/// The DHT crawler engine.
///
/// Owns the UDP socket, the routing table, the transaction manager and
/// the fetcher queue for its whole lifetime. [`bind`](Self::bind)
/// creates it; [`run`](Self::run) drives it until
/// [`shutdown`](Self::shutdown).
pub struct Crawler {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    our_id: NodeId,
    config: Config,
    pub(crate) table: RwLock<RoutingTable>,
    pub(crate) transactions: TransactionManager,
    pub(crate) init_queue: InitQueue,
    tokens: RwLock<TokenSecrets>,
    fanout: Mutex<FanoutBudget>,
    /// Tick/invocation parity driving traversal direction and the
    /// get_peers accelerator's every-other-call gate.
    even: AtomicU64,
    fetch_tx: mpsc::Sender<FetchRequest>,
    fetcher: Mutex<Option<MetadataFetcher>>,
    node_count: watch::Sender<usize>,
    shutdown: watch::Sender<bool>,
}

impl Crawler {
    /// Binds the UDP endpoint and assembles the engine.
    ///
    /// Returns the engine and the stream of harvested [`MetaInfo`]
    /// records. Nothing runs until [`run`](Self::run).
    pub async fn bind(config: Config) -> Result<(Arc<Self>, mpsc::Receiver<MetaInfo>), DhtError> {
        let socket = UdpSocket::bind(("0.0.0.0", config.listen_port)).await?;

        let (fetch_tx, fetch_rx) = mpsc::channel(config.fetch_queue.max(1));
        let (out_tx, out_rx) = mpsc::channel(OUTPUT_QUEUE);
        let fetcher = MetadataFetcher::new(fetch_rx, out_tx, config.fetch_queue.max(1));

        let crawler = Self::with_parts(config, socket, fetch_tx)?;
        *crawler.fetcher.lock() = Some(fetcher);
        Ok((crawler, out_rx))
    }

    /// Engine without a wired fetcher; the caller keeps the queue's
    /// receiving end. Shared by [`bind`](Self::bind) and the tests.
    pub(crate) fn with_parts(
        config: Config,
        socket: UdpSocket,
        fetch_tx: mpsc::Sender<FetchRequest>,
    ) -> Result<Arc<Self>, DhtError> {
        let local_addr = socket.local_addr()?;
        let our_id = NodeId::random();
        info!(addr = %local_addr, id = %our_id, "dht crawler bound");

        let table = RoutingTable::new(
            config.bucket_size,
            config.max_nodes,
            config.node_timeout,
            config.ping_threshold,
            config.node_filter.clone(),
        );

        let (node_count, _) = watch::channel(0);
        let (shutdown, _) = watch::channel(false);

        Ok(Arc::new(Self {
            socket: Arc::new(socket),
            local_addr,
            our_id,
            transactions: TransactionManager::new(config.max_transactions, config.tx_timeout),
            init_queue: InitQueue::new(INIT_QUEUE_SIZE, INIT_QUEUE_TTL),
            tokens: RwLock::new(TokenSecrets::new()),
            fanout: Mutex::new(FanoutBudget::new(config.fanout_cache, config.max_fanout)),
            even: AtomicU64::new(0),
            table: RwLock::new(table),
            fetch_tx,
            fetcher: Mutex::new(None),
            node_count,
            shutdown,
            config,
        }))
    }

    pub fn our_id(&self) -> &NodeId {
        &self.our_id
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Telemetry: routing-table size, refreshed once per second.
    pub fn node_count(&self) -> watch::Receiver<usize> {
        self.node_count.subscribe()
    }

    /// Signals every loop to exit; they do so within one tick.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(true);
    }

    /// Runs the engine: seeds the table, then drives the receive loop,
    /// the dispatch workers, the maintenance ticker and the metadata
    /// fetcher until shutdown.
    pub async fn run(self: &Arc<Self>) -> Result<(), DhtError> {
        if self.bootstrap().await == 0 {
            warn!("no bootstrap node usable; relying on inbound traffic");
        }

        let (pkt_tx, pkt_rx) = mpsc::channel::<(SocketAddr, Vec<u8>)>(self.config.packet_queue);
        let pkt_rx = Arc::new(AsyncMutex::new(pkt_rx));
        let mut tasks: Vec<JoinHandle<()>> = Vec::new();

        {
            let engine = self.clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                engine.receive_loop(pkt_tx, shutdown).await;
            }));
        }

        for _ in 0..self.config.dispatch_workers.max(1) {
            let engine = self.clone();
            let rx = pkt_rx.clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                engine.dispatch_loop(rx, shutdown).await;
            }));
        }

        {
            let engine = self.clone();
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(async move {
                engine.maintenance_loop(shutdown).await;
            }));
        }

        if let Some(fetcher) = self.fetcher.lock().take() {
            let shutdown = self.shutdown.subscribe();
            tasks.push(tokio::spawn(fetcher.run(shutdown)));
        }

        for task in tasks {
            let _ = task.await;
        }
        Ok(())
    }

    async fn receive_loop(
        &self,
        pkt_tx: mpsc::Sender<(SocketAddr, Vec<u8>)>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                received = self.socket.recv_from(&mut buf) => match received {
                    Ok((len, addr)) => {
                        if pkt_tx.try_send((addr, buf[..len].to_vec())).is_err() {
                            debug!(%addr, "ingress queue full, packet dropped");
                        }
                    }
                    Err(err) => debug!(%err, "udp receive failed"),
                },
            }
        }
    }

    async fn dispatch_loop(
        &self,
        rx: Arc<AsyncMutex<mpsc::Receiver<(SocketAddr, Vec<u8>)>>>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        loop {
            let packet = {
                let mut rx = rx.lock().await;
                tokio::select! {
                    _ = shutdown.changed() => None,
                    packet = rx.recv() => packet,
                }
            };
            match packet {
                Some((addr, buf)) => self.dispatch(addr, &buf).await,
                None => return,
            }
        }
    }

    async fn maintenance_loop(&self, mut shutdown: watch::Receiver<bool>) {
        let mut tick = tokio::time::interval(TICK_INTERVAL);
        let mut rotation = tokio::time::interval(TOKEN_ROTATION_INTERVAL);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        rotation.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        tick.tick().await;
        rotation.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                }
                _ = tick.tick() => self.on_tick().await,
                _ = rotation.tick() => {
                    self.tokens.write().rotate();
                    debug!("announce token secret rotated");
                }
            }
        }
    }

    /// One maintenance tick: telemetry, init-queue pruning, and — when
    /// the table is small or the engine idle — a discovery sweep.
    async fn on_tick(&self) {
        let tick = self.even.fetch_add(1, Ordering::Relaxed);
        let now = Instant::now();
        self.init_queue.prune(now);

        let table_len = self.table.read().len();
        self.node_count.send_replace(table_len);
        trace!(
            nodes = table_len,
            pending = self.transactions.len(),
            parked = self.init_queue.len(),
            "tick"
        );

        if table_len == 0 {
            // Lost everyone (or never joined); try the routers again.
            self.bootstrap().await;
            return;
        }

        if table_len >= self.config.min_nodes && !self.transactions.is_empty() {
            return;
        }

        let sweep = self
            .table
            .write()
            .discovery_plan(self.config.max_discovery, tick % 2 == 0, now);
        if sweep.evicted > 0 {
            trace!(evicted = sweep.evicted, "stale nodes dropped");
        }
        for node in &sweep.nodes {
            self.send_find_node(node).await;
        }
        for node in &sweep.to_ping {
            self.send_ping(node).await;
        }
    }

    /// Seeds the table from the configured routers and waits briefly
    /// for one of them to answer. Returns how many seeds were planted.
    pub async fn bootstrap(&self) -> usize {
        let mut seeds = Vec::new();
        for host in &self.config.bootstrap {
            match tokio::net::lookup_host(host.as_str()).await {
                Ok(mut addrs) => {
                    if let Some(addr) = addrs.find(|a| a.is_ipv4()) {
                        let node = Arc::new(Node::bootstrap(addr));
                        if self.table.write().add(node.clone()) {
                            debug!(%host, %addr, "bootstrap node seeded");
                            seeds.push(node);
                        }
                    }
                }
                Err(err) => warn!(%host, %err, "bootstrap node did not resolve"),
            }
        }

        for node in &seeds {
            self.send_ping(node).await;
            self.send_find_node(node).await;
        }

        if !seeds.is_empty() {
            let pongs: Vec<_> = seeds.iter().map(|n| Box::pin(n.pong())).collect();
            match tokio::time::timeout(
                BOOTSTRAP_PONG_TIMEOUT,
                futures::future::select_all(pongs),
            )
            .await
            {
                Ok(_) => info!("joined the overlay"),
                Err(_) => warn!("no bootstrap node answered"),
            }
        }
        seeds.len()
    }

    /// Routes one datagram: known senders go straight to their record;
    /// unknown responders resolve through the init queue; unknown
    /// queriers become candidate table entries.
    pub(crate) async fn dispatch(&self, addr: SocketAddr, buf: &[u8]) {
        let msg = match KrpcMessage::parse(buf) {
            Ok(msg) => msg,
            Err(err) => {
                trace!(%addr, %err, "undecodable packet dropped");
                return;
            }
        };
        let now = Instant::now();
        let known = self.table.read().find_by_addr(&addr);

        match (known, msg.body) {
            (Some(node), Body::Query(query)) => {
                node.touch();
                if *query.sender_id() != node.id && !node.is_bootstrap {
                    debug!(addr = %addr, asserted = %query.sender_id(), recorded = %node.id,
                        "sender id mismatch, evicting");
                    self.table.write().remove(&node);
                    return;
                }
                self.handle_query(addr, msg.transaction_id, query).await;
            }
            (Some(node), Body::Reply(reply)) => {
                node.touch();
                self.handle_reply(Some(&node), msg.transaction_id, reply, now)
                    .await;
            }
            (Some(node), Body::Error { code, message }) => {
                node.touch();
                let _ = self.transactions.take(&msg.transaction_id, now);
                trace!(addr = %addr, code, message = %message, "krpc error reply");
            }
            (None, Body::Reply(reply)) => {
                // A response from an address we never admitted: only
                // meaningful if we queried it while it sat outside the
                // table.
                let Some(node) = self.init_queue.take(&msg.transaction_id, now) else {
                    return;
                };
                node.touch();
                node.notify_pong();
                if self.table.write().add(node.clone()) {
                    trace!(addr = %node.addr, id = %node.id, "init-queue node admitted");
                }
                self.handle_reply(Some(&node), msg.transaction_id, reply, now)
                    .await;
            }
            (None, Body::Query(query)) => {
                let id = *query.sender_id();
                if id.is_zero() {
                    return;
                }
                let node = Arc::new(Node::new(id, addr));
                self.table.write().add(node);
                self.handle_query(addr, msg.transaction_id, query).await;
            }
            (None, Body::Error { .. }) => {}
        }
    }

    async fn handle_query(&self, addr: SocketAddr, tid: TransactionId, query: Query) {
        let now = Instant::now();
        match query {
            Query::Ping { .. } => {
                self.send(addr, &KrpcMessage::id_reply(tid, self.our_id)).await;
            }
            Query::FindNode { target, .. } => {
                let sweep = self.table.write().neighbours(&target, now);
                let nodes = sweep.nodes.iter().map(|n| n.info()).collect();
                self.send(addr, &KrpcMessage::nodes_reply(tid, self.our_id, nodes))
                    .await;
                self.ping_all(&sweep.to_ping).await;
            }
            Query::GetPeers { info_hash, .. } => {
                let token = self.tokens.read().generate(&addr);
                let sweep = self.table.write().neighbours(&NodeId(info_hash), now);
                let nodes = sweep.nodes.iter().map(|n| n.info()).collect();
                self.send(
                    addr,
                    &KrpcMessage::peers_not_found_reply(tid, self.our_id, token, nodes),
                )
                .await;
                self.ping_all(&sweep.to_ping).await;
                self.accelerate(&info_hash, &sweep.nodes).await;
            }
            Query::AnnouncePeer {
                info_hash,
                port,
                implied_port,
                token,
                ..
            } => {
                let token_ok = self.tokens.read().validate(&addr, &token);
                self.send(addr, &KrpcMessage::id_reply(tid, self.our_id)).await;

                let peer = if implied_port {
                    addr
                } else {
                    SocketAddr::new(addr.ip(), port)
                };
                if peer.port() == 0 {
                    return;
                }
                debug!(hash = %InfoHash(info_hash), %peer, token_ok, "announce harvested");
                if self
                    .fetch_tx
                    .try_send(FetchRequest { info_hash, addr: peer })
                    .is_err()
                {
                    debug!(%peer, "fetch queue full, announce dropped");
                }
            }
        }
    }

    /// Forwards `get_peers(info_hash)` to its neighbourhood on every
    /// other invocation, within the per-hash budget. Peers that hold
    /// the torrent end up answering us with `values`.
    async fn accelerate(&self, info_hash: &[u8; 20], nodes: &[Arc<Node>]) {
        if *info_hash == [0u8; 20] || nodes.is_empty() {
            return;
        }
        if self.even.fetch_add(1, Ordering::Relaxed) % 2 != 0 {
            return;
        }
        {
            let mut budget = self.fanout.lock();
            if !budget.allows(info_hash, nodes.len()) {
                return;
            }
            budget.charge(info_hash, nodes.len());
        }
        for node in nodes {
            self.send_get_peers(node, *info_hash).await;
        }
    }

    async fn handle_reply(
        &self,
        node: Option<&Arc<Node>>,
        tid: TransactionId,
        reply: Reply,
        now: Instant,
    ) {
        let Some(tx) = self.transactions.take(&tid, now) else {
            // Unknown or expired transaction; BEP-5 says ignore.
            return;
        };
        match tx.kind {
            TxKind::Ping => {
                if let Some(node) = node {
                    node.notify_pong();
                }
            }
            TxKind::FindNode => {
                self.absorb_nodes(&reply.nodes, None).await;
            }
            TxKind::GetPeers => {
                if !reply.nodes.is_empty() {
                    self.absorb_nodes(&reply.nodes, tx.info_hash).await;
                }
                if let Some(info_hash) = tx.info_hash {
                    for peer in &reply.values {
                        if peer.port() == 0 {
                            continue;
                        }
                        debug!(hash = %InfoHash(info_hash), %peer, "swarm peer learned");
                        if self
                            .fetch_tx
                            .try_send(FetchRequest {
                                info_hash,
                                addr: *peer,
                            })
                            .is_err()
                        {
                            debug!(%peer, "fetch queue full, peer dropped");
                        }
                    }
                }
            }
            TxKind::AnnouncePeer => {}
        }
    }

    /// Feeds compact-reply nodes into the table. With `follow_up` set
    /// (an iterative get_peers lookup), each newcomer is also queried
    /// for the hash; newcomers the table refused are parked in the init
    /// queue so their replies still resolve.
    async fn absorb_nodes(&self, infos: &[NodeInfo], follow_up: Option<[u8; 20]>) {
        for info in infos {
            if info.addr.port() == 0 {
                continue;
            }
            if info.id == self.our_id {
                continue;
            }
            if self.table.read().contains_id(&info.id) {
                continue;
            }
            let node = Arc::new(Node::new(info.id, info.addr));
            let admitted = self.table.write().add(node.clone());
            if let Some(info_hash) = follow_up {
                let tid = self.send_get_peers(&node, info_hash).await;
                if !admitted {
                    self.init_queue.push(tid, node, Instant::now());
                }
            }
        }
    }

    async fn ping_all(&self, nodes: &[Arc<Node>]) {
        for node in nodes {
            self.send_ping(node).await;
        }
    }

    async fn send_ping(&self, node: &Arc<Node>) {
        let tid = TransactionManager::generate_id();
        self.transactions
            .add(tid.clone(), TxKind::Ping, None, None, Instant::now());
        self.send(node.addr, &KrpcMessage::ping(tid, self.our_id)).await;
    }

    /// Asks `node` for neighbours of a random target; random targets
    /// keep surfacing strangers from all over the id space. The
    /// `gen_id` hook may substitute the id we claim as ours.
    async fn send_find_node(&self, node: &Arc<Node>) {
        let target = NodeId::random();
        let local = match &self.config.gen_id {
            Some(gen) => gen(),
            None => self.our_id,
        };
        let tid = TransactionManager::generate_id();
        self.transactions.add(
            tid.clone(),
            TxKind::FindNode,
            None,
            Some(target),
            Instant::now(),
        );
        self.send(node.addr, &KrpcMessage::find_node(tid, local, target))
            .await;
    }

    async fn send_get_peers(&self, node: &Arc<Node>, info_hash: [u8; 20]) -> TransactionId {
        let tid = TransactionManager::generate_id();
        self.transactions.add(
            tid.clone(),
            TxKind::GetPeers,
            Some(info_hash),
            None,
            Instant::now(),
        );
        self.send(node.addr, &KrpcMessage::get_peers(tid.clone(), self.our_id, info_hash))
            .await;
        tid
    }

    async fn send(&self, addr: SocketAddr, msg: &KrpcMessage) {
        if let Err(err) = self.socket.send_to(&msg.encode(), addr).await {
            trace!(%addr, %err, "udp send failed");
        }
    }
}
