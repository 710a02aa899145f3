use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use rand::Rng as _;
use sha1::{Digest, Sha1};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::time::timeout;
use tracing::{debug, info, trace};

use super::error::PeerError;
use super::extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, UT_METADATA};
use super::message::{Handshake, WireMessage};
use super::metadata::{piece_count, MetadataMessage, METADATA_PIECE_SIZE};
use super::transport::PeerTransport;
use crate::metainfo::{InfoHash, MetaInfo};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const SESSION_TIMEOUT: Duration = Duration::from_secs(60);
/// The extension id we assign to ut_metadata in our handshake.
const LOCAL_UT_METADATA: u8 = 1;
/// Refuse blobs past this; real info dictionaries are far smaller.
const MAX_METADATA_SIZE: usize = METADATA_PIECE_SIZE * 1024;

/// One announced `(info_hash, peer)` to try fetching metadata from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub info_hash: [u8; 20],
    pub addr: SocketAddr,
}

/// Drains the fetch queue, driving one independent TCP session per
/// request under a whole-session deadline.
///
/// Parallelism is capped by a semaphore sized to the queue capacity;
/// duplicate `(info_hash, peer)` pairs already in flight are skipped so
/// an announce storm cannot multiply into identical sessions. Failures
/// of any kind drop the request silently.
pub struct MetadataFetcher {
    queue: mpsc::Receiver<FetchRequest>,
    output: mpsc::Sender<MetaInfo>,
    permits: Arc<Semaphore>,
    in_flight: Arc<DashMap<([u8; 20], SocketAddr), ()>>,
}

impl MetadataFetcher {
    pub fn new(
        queue: mpsc::Receiver<FetchRequest>,
        output: mpsc::Sender<MetaInfo>,
        parallelism: usize,
    ) -> Self {
        Self {
            queue,
            output,
            permits: Arc::new(Semaphore::new(parallelism.max(1))),
            in_flight: Arc::new(DashMap::new()),
        }
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            let request = tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        return;
                    }
                    continue;
                }
                request = self.queue.recv() => match request {
                    Some(request) => request,
                    None => return,
                },
            };

            let key = (request.info_hash, request.addr);
            if self.in_flight.contains_key(&key) {
                trace!(peer = %request.addr, "fetch already in flight");
                continue;
            }
            self.in_flight.insert(key, ());

            let Ok(permit) = self.permits.clone().acquire_owned().await else {
                return;
            };
            let output = self.output.clone();
            let in_flight = self.in_flight.clone();
            tokio::spawn(async move {
                let _permit = permit;
                match timeout(SESSION_TIMEOUT, fetch(&request)).await {
                    Ok(Ok(meta)) => {
                        info!(hash = %meta.info_hash, name = %meta.name, peer = %meta.peer,
                            "metadata fetched");
                        let _ = output.send(meta).await;
                    }
                    Ok(Err(err)) => {
                        trace!(peer = %request.addr, %err, "fetch failed");
                    }
                    Err(_) => {
                        trace!(peer = %request.addr, "fetch session timed out");
                    }
                }
                in_flight.remove(&key);
            });
        }
    }
}

/// One complete BEP-3 + BEP-10 + BEP-9 session against a single peer.
pub(crate) async fn fetch(request: &FetchRequest) -> Result<MetaInfo, PeerError> {
    let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(request.addr))
        .await
        .map_err(|_| PeerError::Timeout)??;
    let mut transport = PeerTransport::new(stream);

    let mut peer_id = [0u8; 20];
    rand::rng().fill(&mut peer_id);
    transport
        .send_handshake(&Handshake::new(request.info_hash, peer_id))
        .await?;
    let theirs = transport.receive_handshake().await?;
    if !theirs.supports_extension_protocol() {
        return Err(PeerError::ExtensionUnsupported);
    }

    transport
        .send_message(&WireMessage::Extended {
            id: EXTENSION_HANDSHAKE_ID,
            payload: ExtensionHandshake::offering_metadata(LOCAL_UT_METADATA).encode(),
        })
        .await?;

    let (their_ut, metadata_size) = await_extension_handshake(&mut transport).await?;
    let pieces = piece_count(metadata_size);
    debug!(peer = %request.addr, metadata_size, pieces, "requesting metadata");

    for piece in 0..pieces {
        transport
            .send_message(&WireMessage::Extended {
                id: their_ut,
                payload: MetadataMessage::Request {
                    piece: piece as u32,
                }
                .encode(),
            })
            .await?;
    }

    let blob = collect_pieces(&mut transport, pieces, metadata_size).await?;

    let digest = Sha1::digest(&blob);
    if digest[..] != request.info_hash[..] {
        return Err(PeerError::HashMismatch);
    }

    let info = MetaInfo::from_info_dict(InfoHash(request.info_hash), request.addr, &blob)?;
    Ok(info)
}

/// Waits out non-extended chatter (bitfield, have…) until the peer's
/// extended handshake arrives, then extracts its ut_metadata id and
/// metadata size.
async fn await_extension_handshake(
    transport: &mut PeerTransport,
) -> Result<(u8, usize), PeerError> {
    loop {
        let WireMessage::Extended { id, payload } = transport.receive_message().await? else {
            continue;
        };
        if id != EXTENSION_HANDSHAKE_ID {
            continue;
        }
        let hs = ExtensionHandshake::decode(&payload)?;
        let their_ut = hs
            .extension_id(UT_METADATA)
            .ok_or(PeerError::Extension("peer lacks ut_metadata"))?;
        let size = hs
            .metadata_size
            .filter(|size| *size > 0)
            .ok_or(PeerError::Extension("missing metadata_size"))? as usize;
        if size > MAX_METADATA_SIZE {
            return Err(PeerError::MetadataTooLarge(size));
        }
        return Ok((their_ut, size));
    }
}

/// Reassembles `pieces` slots until their combined length reaches
/// `metadata_size`. Data arrives on our assigned extension id.
async fn collect_pieces(
    transport: &mut PeerTransport,
    pieces: usize,
    metadata_size: usize,
) -> Result<Vec<u8>, PeerError> {
    let mut slots: Vec<Option<Bytes>> = vec![None; pieces];
    let mut collected = 0usize;

    loop {
        let WireMessage::Extended { id, payload } = transport.receive_message().await? else {
            continue;
        };
        if id != LOCAL_UT_METADATA {
            continue;
        }
        match MetadataMessage::decode(&payload)? {
            MetadataMessage::Data { piece, payload, .. } => {
                let slot = slots
                    .get_mut(piece as usize)
                    .ok_or(PeerError::Extension("piece index out of range"))?;
                if slot.is_none() {
                    collected += payload.len();
                    *slot = Some(payload);
                }
                if collected >= metadata_size {
                    let mut blob = Vec::with_capacity(collected);
                    for slot in slots.iter().flatten() {
                        blob.extend_from_slice(slot);
                    }
                    return Ok(blob);
                }
            }
            MetadataMessage::Reject { .. } => {
                return Err(PeerError::Extension("piece rejected"));
            }
            MetadataMessage::Request { .. } => {
                // We serve nothing; ignore.
            }
        }
    }
}
