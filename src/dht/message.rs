use std::collections::BTreeMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use bytes::Bytes;

use super::error::DhtError;
use super::node::{NodeId, NodeInfo};
use crate::bencode::{decode, encode, Value};

/// KRPC transaction id: a short opaque byte string echoed by the peer.
pub type TransactionId = Bytes;

/// A query received from or sent to another node.
///
/// Every variant carries the sender's asserted id (`a.id` in BEP-5).
#[derive(Debug, Clone)]
pub enum Query {
    Ping {
        id: NodeId,
    },
    FindNode {
        id: NodeId,
        target: NodeId,
    },
    GetPeers {
        id: NodeId,
        info_hash: [u8; 20],
    },
    AnnouncePeer {
        id: NodeId,
        info_hash: [u8; 20],
        port: u16,
        implied_port: bool,
        /// Optional on decode: crawl traffic routinely omits it.
        token: Bytes,
    },
}

impl Query {
    /// The sender's asserted node id.
    pub fn sender_id(&self) -> &NodeId {
        match self {
            Query::Ping { id }
            | Query::FindNode { id, .. }
            | Query::GetPeers { id, .. }
            | Query::AnnouncePeer { id, .. } => id,
        }
    }

    fn method(&self) -> &'static str {
        match self {
            Query::Ping { .. } => "ping",
            Query::FindNode { .. } => "find_node",
            Query::GetPeers { .. } => "get_peers",
            Query::AnnouncePeer { .. } => "announce_peer",
        }
    }
}

/// The `r` dictionary of a response.
///
/// The wire does not say which query a response answers; that comes
/// from the transaction record. All recognised fields are decoded and
/// the handler picks what it needs. `values` and `nodes` are mutually
/// exclusive per BEP-5 but both are accepted defensively.
#[derive(Debug, Clone, Default)]
pub struct Reply {
    pub id: Option<NodeId>,
    pub nodes: Vec<NodeInfo>,
    pub values: Vec<SocketAddr>,
    pub token: Option<Bytes>,
}

/// Message payload, one of the three BEP-5 `y` kinds.
#[derive(Debug, Clone)]
pub enum Body {
    Query(Query),
    Reply(Reply),
    Error { code: i64, message: String },
}

/// One KRPC datagram.
#[derive(Debug, Clone)]
pub struct KrpcMessage {
    pub transaction_id: TransactionId,
    pub body: Body,
}

impl KrpcMessage {
    pub fn ping(transaction_id: TransactionId, id: NodeId) -> Self {
        Self {
            transaction_id,
            body: Body::Query(Query::Ping { id }),
        }
    }

    pub fn find_node(transaction_id: TransactionId, id: NodeId, target: NodeId) -> Self {
        Self {
            transaction_id,
            body: Body::Query(Query::FindNode { id, target }),
        }
    }

    pub fn get_peers(transaction_id: TransactionId, id: NodeId, info_hash: [u8; 20]) -> Self {
        Self {
            transaction_id,
            body: Body::Query(Query::GetPeers { id, info_hash }),
        }
    }

    /// The `{r: {id}}` reply shared by `ping` and `announce_peer`.
    pub fn id_reply(transaction_id: TransactionId, id: NodeId) -> Self {
        Self {
            transaction_id,
            body: Body::Reply(Reply {
                id: Some(id),
                ..Reply::default()
            }),
        }
    }

    pub fn nodes_reply(transaction_id: TransactionId, id: NodeId, nodes: Vec<NodeInfo>) -> Self {
        Self {
            transaction_id,
            body: Body::Reply(Reply {
                id: Some(id),
                nodes,
                ..Reply::default()
            }),
        }
    }

    /// The not-found `get_peers` reply: always both `token` and `nodes`.
    pub fn peers_not_found_reply(
        transaction_id: TransactionId,
        id: NodeId,
        token: Bytes,
        nodes: Vec<NodeInfo>,
    ) -> Self {
        Self {
            transaction_id,
            body: Body::Reply(Reply {
                id: Some(id),
                nodes,
                token: Some(token),
                ..Reply::default()
            }),
        }
    }

    /// Decodes one datagram.
    pub fn parse(data: &[u8]) -> Result<Self, DhtError> {
        let value = decode(data)?;
        let dict = value
            .as_dict()
            .ok_or_else(|| DhtError::InvalidMessage("not a dict"))?;

        let transaction_id = dict
            .get(b"t".as_slice())
            .and_then(|v| v.as_bytes())
            .cloned()
            .ok_or(DhtError::InvalidMessage("missing t"))?;

        let body = match dict
            .get(b"y".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|b| b.as_ref())
        {
            Some(b"q") => Body::Query(parse_query(dict)?),
            Some(b"r") => Body::Reply(parse_reply(dict)?),
            Some(b"e") => parse_error(dict)?,
            _ => return Err(DhtError::InvalidMessage("bad y")),
        };

        Ok(Self {
            transaction_id,
            body,
        })
    }

    /// Encodes to the wire form. Dictionary keys come out sorted.
    pub fn encode(&self) -> Vec<u8> {
        let mut dict = BTreeMap::new();
        dict.insert(
            Bytes::from_static(b"t"),
            Value::Bytes(self.transaction_id.clone()),
        );

        match &self.body {
            Body::Query(query) => {
                dict.insert(Bytes::from_static(b"y"), Value::text("q"));
                dict.insert(Bytes::from_static(b"q"), Value::text(query.method()));
                dict.insert(Bytes::from_static(b"a"), encode_args(query));
            }
            Body::Reply(reply) => {
                dict.insert(Bytes::from_static(b"y"), Value::text("r"));
                dict.insert(Bytes::from_static(b"r"), encode_reply(reply));
            }
            Body::Error { code, message } => {
                dict.insert(Bytes::from_static(b"y"), Value::text("e"));
                dict.insert(
                    Bytes::from_static(b"e"),
                    Value::List(vec![Value::Int(*code), Value::text(message)]),
                );
            }
        }

        encode(&Value::Dict(dict))
    }
}

fn encode_args(query: &Query) -> Value {
    let mut args = BTreeMap::new();
    args.insert(
        Bytes::from_static(b"id"),
        Value::bytes(query.sender_id().as_bytes()),
    );

    match query {
        Query::Ping { .. } => {}
        Query::FindNode { target, .. } => {
            args.insert(Bytes::from_static(b"target"), Value::bytes(target.as_bytes()));
        }
        Query::GetPeers { info_hash, .. } => {
            args.insert(Bytes::from_static(b"info_hash"), Value::bytes(info_hash));
        }
        Query::AnnouncePeer {
            info_hash,
            port,
            implied_port,
            token,
            ..
        } => {
            args.insert(Bytes::from_static(b"info_hash"), Value::bytes(info_hash));
            args.insert(Bytes::from_static(b"port"), Value::Int(*port as i64));
            args.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
            if *implied_port {
                args.insert(Bytes::from_static(b"implied_port"), Value::Int(1));
            }
        }
    }

    Value::Dict(args)
}

fn encode_reply(reply: &Reply) -> Value {
    let mut r = BTreeMap::new();
    if let Some(id) = &reply.id {
        r.insert(Bytes::from_static(b"id"), Value::bytes(id.as_bytes()));
    }
    if let Some(token) = &reply.token {
        r.insert(Bytes::from_static(b"token"), Value::Bytes(token.clone()));
    }
    if !reply.nodes.is_empty() || reply.token.is_some() {
        // get_peers not-found always carries nodes, even when empty.
        let compact: Vec<u8> = reply
            .nodes
            .iter()
            .filter_map(NodeInfo::to_compact)
            .flatten()
            .collect();
        r.insert(Bytes::from_static(b"nodes"), Value::Bytes(Bytes::from(compact)));
    }
    if !reply.values.is_empty() {
        let values = reply
            .values
            .iter()
            .filter_map(|addr| {
                let SocketAddr::V4(v4) = addr else { return None };
                let mut peer = [0u8; 6];
                peer[..4].copy_from_slice(&v4.ip().octets());
                peer[4..].copy_from_slice(&v4.port().to_be_bytes());
                Some(Value::bytes(&peer))
            })
            .collect();
        r.insert(Bytes::from_static(b"values"), Value::List(values));
    }
    Value::Dict(r)
}

fn parse_query(dict: &BTreeMap<Bytes, Value>) -> Result<Query, DhtError> {
    let args = dict
        .get(b"a".as_slice())
        .and_then(|v| v.as_dict())
        .ok_or(DhtError::InvalidMessage("missing a"))?;

    let id = args
        .get(b"id".as_slice())
        .and_then(|v| v.as_bytes())
        .and_then(|b| NodeId::from_bytes(b).ok())
        .ok_or(DhtError::InvalidMessage("missing a.id"))?;

    let method = dict
        .get(b"q".as_slice())
        .and_then(|v| v.as_str())
        .ok_or(DhtError::InvalidMessage("missing q"))?;

    match method {
        "ping" => Ok(Query::Ping { id }),
        "find_node" => {
            let target = args
                .get(b"target".as_slice())
                .and_then(|v| v.as_bytes())
                .and_then(|b| NodeId::from_bytes(b).ok())
                .ok_or(DhtError::InvalidMessage("missing target"))?;
            Ok(Query::FindNode { id, target })
        }
        "get_peers" => Ok(Query::GetPeers {
            id,
            info_hash: parse_info_hash(args)?,
        }),
        "announce_peer" => {
            let port = args
                .get(b"port".as_slice())
                .and_then(Value::as_int)
                .ok_or(DhtError::InvalidMessage("missing port"))? as u16;
            let implied_port = args
                .get(b"implied_port".as_slice())
                .and_then(Value::as_int)
                .is_some_and(|v| v != 0);
            let token = args
                .get(b"token".as_slice())
                .and_then(|v| v.as_bytes())
                .cloned()
                .unwrap_or_default();
            Ok(Query::AnnouncePeer {
                id,
                info_hash: parse_info_hash(args)?,
                port,
                implied_port,
                token,
            })
        }
        _ => Err(DhtError::InvalidMessage("unknown query")),
    }
}

fn parse_info_hash(args: &BTreeMap<Bytes, Value>) -> Result<[u8; 20], DhtError> {
    args.get(b"info_hash".as_slice())
        .and_then(|v| v.as_bytes())
        .filter(|b| b.len() == 20)
        .map(|b| {
            let mut hash = [0u8; 20];
            hash.copy_from_slice(b);
            hash
        })
        .ok_or(DhtError::InvalidMessage("missing info_hash"))
}

fn parse_reply(dict: &BTreeMap<Bytes, Value>) -> Result<Reply, DhtError> {
    let r = dict
        .get(b"r".as_slice())
        .and_then(|v| v.as_dict())
        .ok_or(DhtError::InvalidMessage("missing r"))?;

    let id = r
        .get(b"id".as_slice())
        .and_then(|v| v.as_bytes())
        .and_then(|b| NodeId::from_bytes(b).ok());

    let nodes = match r.get(b"nodes".as_slice()).and_then(|v| v.as_bytes()) {
        Some(data) if data.len() % NodeInfo::COMPACT_LEN != 0 => {
            return Err(DhtError::InvalidMessage("nodes length"));
        }
        Some(data) => data
            .chunks_exact(NodeInfo::COMPACT_LEN)
            .filter_map(NodeInfo::from_compact)
            .collect(),
        None => Vec::new(),
    };

    let values = r
        .get(b"values".as_slice())
        .and_then(|v| v.as_list())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_bytes())
                .filter(|b| b.len() == 6)
                .map(|b| {
                    let ip = Ipv4Addr::new(b[0], b[1], b[2], b[3]);
                    let port = u16::from_be_bytes([b[4], b[5]]);
                    SocketAddr::new(IpAddr::V4(ip), port)
                })
                .collect()
        })
        .unwrap_or_default();

    let token = r
        .get(b"token".as_slice())
        .and_then(|v| v.as_bytes())
        .cloned();

    Ok(Reply {
        id,
        nodes,
        values,
        token,
    })
}

fn parse_error(dict: &BTreeMap<Bytes, Value>) -> Result<Body, DhtError> {
    let list = dict
        .get(b"e".as_slice())
        .and_then(|v| v.as_list())
        .ok_or(DhtError::InvalidMessage("missing e"))?;

    let code = list.first().and_then(Value::as_int).unwrap_or(0);
    let message = list
        .get(1)
        .and_then(|v| v.as_str())
        .unwrap_or("unknown error")
        .to_string();

    Ok(Body::Error { code, message })
}
