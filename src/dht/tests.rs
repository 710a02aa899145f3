use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use super::message::Reply;
use super::*;
use crate::bencode::{decode, Value};
use crate::peer::FetchRequest;

fn test_config() -> Config {
    Config {
        listen_port: 0,
        bootstrap: Vec::new(),
        dispatch_workers: 2,
        ..Config::default()
    }
}

async fn test_crawler() -> (Arc<Crawler>, mpsc::Receiver<FetchRequest>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (fetch_tx, fetch_rx) = mpsc::channel(16);
    let crawler = Crawler::with_parts(test_config(), socket, fetch_tx).unwrap();
    (crawler, fetch_rx)
}

fn addr(a: u8, b: u8, c: u8, d: u8, port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(a, b, c, d)), port)
}

fn compact(id: &[u8; 20], ip: [u8; 4], port: u16) -> Vec<u8> {
    let mut out = Vec::with_capacity(26);
    out.extend_from_slice(id);
    out.extend_from_slice(&ip);
    out.extend_from_slice(&port.to_be_bytes());
    out
}

#[test]
fn node_id_bits_are_msb_first() {
    let mut raw = [0u8; 20];
    raw[0] = 0b1010_0000;
    raw[19] = 0b0000_0001;
    let id = NodeId(raw);

    assert_eq!(id.bit(0), 1);
    assert_eq!(id.bit(1), 0);
    assert_eq!(id.bit(2), 1);
    assert_eq!(id.bit(159), 1);
    assert_eq!(id.bit(158), 0);
}

#[test]
fn node_id_distance_is_xor() {
    let a = NodeId([0b1100_0000; 20]);
    let b = NodeId([0b1010_0000; 20]);
    assert_eq!(a.distance(&b), [0b0110_0000; 20]);
    assert_eq!(a.distance(&a), [0u8; 20]);
}

#[test]
fn compact_node_round_trips() {
    let info = NodeInfo::new(NodeId([7u8; 20]), addr(1, 2, 3, 4, 6881));
    let compact = info.to_compact().unwrap();
    assert_eq!(compact.len(), 26);
    assert_eq!(NodeInfo::from_compact(&compact).unwrap(), info);
}

#[test]
fn canonical_ping_query_bytes_parse() {
    // The canonical BEP-5 ping example.
    let raw: &[u8] = b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe";
    let msg = KrpcMessage::parse(raw).unwrap();
    assert_eq!(msg.transaction_id, Bytes::from_static(b"aa"));
    match msg.body {
        Body::Query(Query::Ping { id }) => {
            assert_eq!(id.as_bytes(), b"abcdefghij0123456789");
        }
        other => panic!("unexpected body: {:?}", other),
    }

    // Encoding the parsed message reproduces the original bytes.
    assert_eq!(KrpcMessage::parse(raw).unwrap().encode(), raw);
}

#[test]
fn krpc_query_round_trips() {
    let id = NodeId::random();
    let target = NodeId::random();
    let tid = Bytes::from_static(b"tx");

    let msg = KrpcMessage::find_node(tid.clone(), id, target);
    let parsed = KrpcMessage::parse(&msg.encode()).unwrap();
    assert_eq!(parsed.transaction_id, tid);
    match parsed.body {
        Body::Query(Query::FindNode { id: pid, target: ptarget }) => {
            assert_eq!(pid, id);
            assert_eq!(ptarget, target);
        }
        other => panic!("unexpected body: {:?}", other),
    }
}

#[test]
fn krpc_get_peers_reply_round_trips() {
    let id = NodeId::random();
    let nodes = vec![
        NodeInfo::new(NodeId([1u8; 20]), addr(1, 2, 3, 4, 6881)),
        NodeInfo::new(NodeId([2u8; 20]), addr(5, 6, 7, 8, 6882)),
    ];
    let msg = KrpcMessage::peers_not_found_reply(
        Bytes::from_static(b"tx"),
        id,
        Bytes::from_static(b"secret-token"),
        nodes.clone(),
    );

    let parsed = KrpcMessage::parse(&msg.encode()).unwrap();
    let Body::Reply(reply) = parsed.body else {
        panic!("expected reply");
    };
    assert_eq!(reply.id, Some(id));
    assert_eq!(reply.token.as_deref(), Some(b"secret-token".as_slice()));
    assert_eq!(reply.nodes, nodes);
    assert!(reply.values.is_empty());
}

#[test]
fn reply_with_misaligned_nodes_is_rejected() {
    // 27 bytes of "nodes" is not a whole number of compact entries.
    let raw = b"d1:rd2:id20:abcdefghij01234567895:nodes27:aaaaaaaaaaaaaaaaaaaaaaaaaaae1:t2:aa1:y1:re";
    assert!(KrpcMessage::parse(raw).is_err());
}

#[tokio::test]
async fn ping_round_trip_over_udp() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (fetch_tx, _fetch_rx) = mpsc::channel(16);
    let crawler = Crawler::with_parts(test_config(), socket, fetch_tx).unwrap();
    let server_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), crawler.local_addr().port());

    let engine = crawler.clone();
    let running = tokio::spawn(async move { engine.run().await });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    client
        .send_to(
            b"d1:ad2:id20:abcdefghij0123456789e1:q4:ping1:t2:aa1:y1:qe",
            server_addr,
        )
        .await
        .unwrap();

    let mut buf = [0u8; 1500];
    let (len, from) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .expect("ping reply")
        .unwrap();
    assert_eq!(from, server_addr);

    let reply = decode(&buf[..len]).unwrap();
    assert_eq!(reply.get(b"t").and_then(Value::as_bytes).unwrap().as_ref(), b"aa");
    assert_eq!(reply.get(b"y").and_then(Value::as_str), Some("r"));
    let id = reply
        .get(b"r")
        .and_then(|r| r.get(b"id"))
        .and_then(Value::as_bytes)
        .expect("r.id");
    assert_eq!(id.len(), 20);

    // The anonymous querier was admitted to the table.
    let client_addr = client.local_addr().unwrap();
    assert!(crawler.table.read().find_by_addr(&client_addr).is_some());

    crawler.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), running).await;
}

#[tokio::test]
async fn get_peers_is_answered_not_found() {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let (fetch_tx, _fetch_rx) = mpsc::channel(16);
    let crawler = Crawler::with_parts(test_config(), socket, fetch_tx).unwrap();
    let server_addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), crawler.local_addr().port());

    let engine = crawler.clone();
    let running = tokio::spawn(async move { engine.run().await });

    let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let query = KrpcMessage::get_peers(Bytes::from_static(b"gp"), NodeId::random(), [9u8; 20]);
    client.send_to(&query.encode(), server_addr).await.unwrap();

    let mut buf = [0u8; 1500];
    let (len, _) = tokio::time::timeout(Duration::from_secs(5), client.recv_from(&mut buf))
        .await
        .expect("get_peers reply")
        .unwrap();

    let reply = decode(&buf[..len]).unwrap();
    let r = reply.get(b"r").expect("r dict");
    assert!(r.get(b"token").is_some());
    assert!(r.get(b"nodes").is_some());
    assert!(r.get(b"values").is_none());

    crawler.shutdown();
    let _ = tokio::time::timeout(Duration::from_secs(5), running).await;
}

#[tokio::test]
async fn find_node_reply_inserts_nodes_but_skips_port_zero() {
    let (crawler, _fetch_rx) = test_crawler().await;

    // The responder has to be someone we know.
    let responder = Arc::new(Node::new(NodeId([0xEE; 20]), addr(9, 9, 9, 9, 6881)));
    assert!(crawler.table.write().add(responder.clone()));

    let tid = TransactionManager::generate_id();
    crawler.transactions.add(
        tid.clone(),
        TxKind::FindNode,
        None,
        Some(NodeId::random()),
        Instant::now(),
    );

    let mut nodes = compact(&[b'A'; 20], [1, 2, 3, 4], 6881);
    nodes.extend(compact(&[b'B'; 20], [5, 6, 7, 8], 0));
    let reply = KrpcMessage {
        transaction_id: tid,
        body: Body::Reply(Reply {
            id: Some(responder.id),
            nodes: nodes
                .chunks_exact(26)
                .filter_map(NodeInfo::from_compact)
                .collect(),
            ..Reply::default()
        }),
    };

    crawler.dispatch(responder.addr, &reply.encode()).await;

    let inserted = crawler.table.read().find_by_id(&NodeId([b'A'; 20]));
    let inserted = inserted.expect("node A inserted");
    assert_eq!(inserted.addr, addr(1, 2, 3, 4, 6881));
    assert!(crawler.table.read().find_by_id(&NodeId([b'B'; 20])).is_none());
}

#[tokio::test]
async fn announce_with_implied_port_uses_source_endpoint() {
    let (crawler, mut fetch_rx) = test_crawler().await;
    let source = addr(10, 0, 0, 1, 54321);
    let hash = [0xABu8; 20];

    let query = KrpcMessage {
        transaction_id: Bytes::from_static(b"an"),
        body: Body::Query(Query::AnnouncePeer {
            id: NodeId([3u8; 20]),
            info_hash: hash,
            port: 0,
            implied_port: true,
            token: Bytes::new(),
        }),
    };
    crawler.dispatch(source, &query.encode()).await;

    let request = fetch_rx.try_recv().expect("announce enqueued a fetch");
    assert_eq!(
        request,
        FetchRequest {
            info_hash: hash,
            addr: source,
        }
    );
    assert!(fetch_rx.try_recv().is_err(), "exactly one fetch enqueued");
}

#[tokio::test]
async fn announce_without_implied_port_uses_advertised_port() {
    let (crawler, mut fetch_rx) = test_crawler().await;
    let source = addr(10, 0, 0, 2, 40000);

    let query = KrpcMessage {
        transaction_id: Bytes::from_static(b"an"),
        body: Body::Query(Query::AnnouncePeer {
            id: NodeId([3u8; 20]),
            info_hash: [0xCDu8; 20],
            port: 9999,
            implied_port: false,
            token: Bytes::new(),
        }),
    };
    crawler.dispatch(source, &query.encode()).await;

    let request = fetch_rx.try_recv().expect("announce enqueued a fetch");
    assert_eq!(request.addr, addr(10, 0, 0, 2, 9999));
}

#[tokio::test]
async fn asserted_id_mismatch_evicts_the_sender() {
    let (crawler, _fetch_rx) = test_crawler().await;
    let node = Arc::new(Node::new(NodeId([0x11; 20]), addr(8, 8, 8, 8, 6881)));
    assert!(crawler.table.write().add(node.clone()));

    let query = KrpcMessage::ping(Bytes::from_static(b"pi"), NodeId([0x22; 20]));
    crawler.dispatch(node.addr, &query.encode()).await;

    assert!(crawler.table.read().find_by_addr(&node.addr).is_none());
    assert!(crawler.table.read().find_by_id(&node.id).is_none());
}

#[tokio::test]
async fn init_queue_reply_admits_the_node() {
    let (crawler, _fetch_rx) = test_crawler().await;
    let stranger = Arc::new(Node::new(NodeId([0x77; 20]), addr(7, 7, 7, 7, 6881)));

    let tid = TransactionManager::generate_id();
    crawler
        .transactions
        .add(tid.clone(), TxKind::Ping, None, None, Instant::now());
    crawler
        .init_queue
        .push(tid.clone(), stranger.clone(), Instant::now());

    let reply = KrpcMessage::id_reply(tid, stranger.id);
    crawler.dispatch(stranger.addr, &reply.encode()).await;

    assert!(crawler.table.read().find_by_addr(&stranger.addr).is_some());
}

#[tokio::test]
async fn get_peers_reply_values_feed_the_fetcher() {
    let (crawler, mut fetch_rx) = test_crawler().await;
    let responder = Arc::new(Node::new(NodeId([0x44; 20]), addr(4, 4, 4, 4, 6881)));
    assert!(crawler.table.write().add(responder.clone()));

    let hash = [0x5Au8; 20];
    let tid = TransactionManager::generate_id();
    crawler.transactions.add(
        tid.clone(),
        TxKind::GetPeers,
        Some(hash),
        None,
        Instant::now(),
    );

    let reply = KrpcMessage {
        transaction_id: tid,
        body: Body::Reply(Reply {
            id: Some(responder.id),
            values: vec![addr(10, 0, 0, 9, 7000), addr(10, 0, 0, 10, 0)],
            token: Some(Bytes::from_static(b"tk")),
            ..Reply::default()
        }),
    };
    crawler.dispatch(responder.addr, &reply.encode()).await;

    let request = fetch_rx.try_recv().expect("peer value enqueued");
    assert_eq!(request.info_hash, hash);
    assert_eq!(request.addr, addr(10, 0, 0, 9, 7000));
    // The port-0 value was dropped.
    assert!(fetch_rx.try_recv().is_err());
}

#[tokio::test]
async fn get_peers_reply_nodes_continue_the_lookup() {
    let (crawler, _fetch_rx) = test_crawler().await;
    let responder = Arc::new(Node::new(NodeId([0x66; 20]), addr(6, 6, 6, 6, 6881)));
    assert!(crawler.table.write().add(responder.clone()));

    let hash = [0x5Bu8; 20];
    let tid = TransactionManager::generate_id();
    crawler.transactions.add(
        tid.clone(),
        TxKind::GetPeers,
        Some(hash),
        None,
        Instant::now(),
    );
    let before = crawler.transactions.len();

    let fresh = NodeInfo::new(NodeId([0x67; 20]), addr(6, 6, 6, 7, 6881));
    let reply = KrpcMessage {
        transaction_id: tid,
        body: Body::Reply(Reply {
            id: Some(responder.id),
            nodes: vec![fresh],
            token: Some(Bytes::from_static(b"tk")),
            ..Reply::default()
        }),
    };
    crawler.dispatch(responder.addr, &reply.encode()).await;

    // The fresh node was admitted and immediately asked for the hash.
    assert!(crawler.table.read().find_by_id(&fresh.id).is_some());
    assert_eq!(crawler.transactions.len(), before); // -1 taken, +1 re-issued
}

#[tokio::test]
async fn replies_from_strangers_are_ignored() {
    let (crawler, mut fetch_rx) = test_crawler().await;

    let tid = TransactionManager::generate_id();
    crawler.transactions.add(
        tid.clone(),
        TxKind::GetPeers,
        Some([1u8; 20]),
        None,
        Instant::now(),
    );

    // Valid transaction id, but the source is neither in the table nor
    // in the init queue.
    let reply = KrpcMessage {
        transaction_id: tid.clone(),
        body: Body::Reply(Reply {
            id: Some(NodeId::random()),
            values: vec![addr(10, 0, 0, 3, 7000)],
            ..Reply::default()
        }),
    };
    crawler.dispatch(addr(66, 66, 66, 66, 6881), &reply.encode()).await;

    assert!(fetch_rx.try_recv().is_err());
    // The transaction was not consumed by the stranger.
    assert!(crawler.transactions.take(&tid, Instant::now()).is_some());
}
