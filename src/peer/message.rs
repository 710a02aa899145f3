use bytes::{BufMut, Bytes, BytesMut};

use super::error::PeerError;

/// The BitTorrent protocol identifier.
pub const PROTOCOL: &[u8] = b"BitTorrent protocol";
/// Length of the fixed handshake message.
pub const HANDSHAKE_LEN: usize = 68;
/// Message id of the extension protocol (BEP-10).
pub const EXTENDED_ID: u8 = 20;

/// The 68-byte BitTorrent handshake.
///
/// Reserved byte 5, bit `0x10` advertises the extension protocol; a
/// fetch is pointless against a peer that leaves it clear. Byte 7, bit
/// `0x01` advertises DHT support, which we set truthfully.
#[derive(Debug, Clone)]
pub struct Handshake {
    pub info_hash: [u8; 20],
    pub peer_id: [u8; 20],
    pub reserved: [u8; 8],
}

impl Handshake {
    pub fn new(info_hash: [u8; 20], peer_id: [u8; 20]) -> Self {
        let mut reserved = [0u8; 8];
        reserved[5] |= 0x10; // extension protocol (BEP-10)
        reserved[7] |= 0x01; // DHT (BEP-5)
        Self {
            info_hash,
            peer_id,
            reserved,
        }
    }

    pub fn supports_extension_protocol(&self) -> bool {
        (self.reserved[5] & 0x10) != 0
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HANDSHAKE_LEN);
        buf.put_u8(PROTOCOL.len() as u8);
        buf.put_slice(PROTOCOL);
        buf.put_slice(&self.reserved);
        buf.put_slice(&self.info_hash);
        buf.put_slice(&self.peer_id);
        buf.freeze()
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        if data.len() < HANDSHAKE_LEN || data[0] as usize != PROTOCOL.len() {
            return Err(PeerError::InvalidHandshake);
        }
        if &data[1..20] != PROTOCOL {
            return Err(PeerError::InvalidHandshake);
        }
        let mut reserved = [0u8; 8];
        reserved.copy_from_slice(&data[20..28]);
        let mut info_hash = [0u8; 20];
        info_hash.copy_from_slice(&data[28..48]);
        let mut peer_id = [0u8; 20];
        peer_id.copy_from_slice(&data[48..68]);
        Ok(Self {
            info_hash,
            peer_id,
            reserved,
        })
    }
}

/// A post-handshake frame, seen from a crawler's narrow viewpoint.
///
/// The wire form is `u32-be length ‖ payload`; length 0 is a
/// keep-alive. Only extended messages (id 20) matter here — anything
/// else a peer sends (bitfield, have, choke…) is noted and skipped.
#[derive(Debug, Clone)]
pub enum WireMessage {
    KeepAlive,
    Extended { id: u8, payload: Bytes },
    /// Any non-extended message; the id is kept for tracing.
    Other { id: u8 },
}

impl WireMessage {
    /// Encodes the frame including its length prefix.
    pub fn encode(&self) -> Bytes {
        match self {
            WireMessage::KeepAlive => Bytes::from_static(&[0, 0, 0, 0]),
            WireMessage::Extended { id, payload } => {
                let mut buf = BytesMut::with_capacity(4 + 2 + payload.len());
                buf.put_u32(payload.len() as u32 + 2);
                buf.put_u8(EXTENDED_ID);
                buf.put_u8(*id);
                buf.put_slice(payload);
                buf.freeze()
            }
            WireMessage::Other { id } => {
                let mut buf = BytesMut::with_capacity(5);
                buf.put_u32(1);
                buf.put_u8(*id);
                buf.freeze()
            }
        }
    }

    /// Interprets one frame body (length prefix already stripped).
    pub fn decode(frame: Bytes) -> Result<Self, PeerError> {
        match frame.len() {
            0 => Ok(WireMessage::KeepAlive),
            1 => Ok(WireMessage::Other { id: frame[0] }),
            _ if frame[0] == EXTENDED_ID => Ok(WireMessage::Extended {
                id: frame[1],
                payload: frame.slice(2..),
            }),
            _ => Ok(WireMessage::Other { id: frame[0] }),
        }
    }
}
