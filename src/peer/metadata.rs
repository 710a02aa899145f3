use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode_prefix, encode, Value};

/// Metadata is transferred in 16 KiB pieces (BEP-9).
pub const METADATA_PIECE_SIZE: usize = 16_384;

const MSG_REQUEST: i64 = 0;
const MSG_DATA: i64 = 1;
const MSG_REJECT: i64 = 2;

/// How many pieces a metadata blob of `size` bytes occupies. At least
/// one: a peer advertising a tiny size still serves piece 0.
pub fn piece_count(size: usize) -> usize {
    size.div_ceil(METADATA_PIECE_SIZE).max(1)
}

/// One ut_metadata message (BEP-9).
///
/// On the wire this is a bencoded header dict; for `Data` the raw piece
/// bytes follow immediately after the dict's closing `e`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataMessage {
    /// Ask for one piece.
    Request { piece: u32 },
    /// One piece of metadata, with the blob's total size.
    Data {
        piece: u32,
        total_size: u32,
        payload: Bytes,
    },
    /// The peer refuses to serve the piece.
    Reject { piece: u32 },
}

impl MetadataMessage {
    pub fn encode(&self) -> Bytes {
        let (msg_type, piece, total_size, payload) = match self {
            MetadataMessage::Request { piece } => (MSG_REQUEST, *piece, None, None),
            MetadataMessage::Data {
                piece,
                total_size,
                payload,
            } => (MSG_DATA, *piece, Some(*total_size), Some(payload)),
            MetadataMessage::Reject { piece } => (MSG_REJECT, *piece, None, None),
        };

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"msg_type"), Value::Int(msg_type));
        dict.insert(Bytes::from_static(b"piece"), Value::Int(piece as i64));
        if let Some(size) = total_size {
            dict.insert(Bytes::from_static(b"total_size"), Value::Int(size as i64));
        }

        let mut out = encode(&Value::Dict(dict));
        if let Some(payload) = payload {
            out.extend_from_slice(payload);
        }
        Bytes::from(out)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, PeerError> {
        let (header, consumed) = decode_prefix(raw)?;
        let dict = header.as_dict().ok_or(PeerError::Extension("not a dict"))?;

        let msg_type = dict
            .get(b"msg_type".as_slice())
            .and_then(Value::as_int)
            .ok_or(PeerError::Extension("missing msg_type"))?;
        let piece = dict
            .get(b"piece".as_slice())
            .and_then(Value::as_int)
            .ok_or(PeerError::Extension("missing piece"))? as u32;

        match msg_type {
            MSG_REQUEST => Ok(MetadataMessage::Request { piece }),
            MSG_DATA => {
                let total_size = dict
                    .get(b"total_size".as_slice())
                    .and_then(Value::as_int)
                    .ok_or(PeerError::Extension("missing total_size"))?
                    as u32;
                Ok(MetadataMessage::Data {
                    piece,
                    total_size,
                    payload: Bytes::copy_from_slice(&raw[consumed..]),
                })
            }
            MSG_REJECT => Ok(MetadataMessage::Reject { piece }),
            _ => Err(PeerError::Extension("unknown msg_type")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let msg = MetadataMessage::Request { piece: 5 };
        assert_eq!(MetadataMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn data_keeps_trailing_payload() {
        let msg = MetadataMessage::Data {
            piece: 2,
            total_size: 40_000,
            payload: Bytes::from_static(&[0xDE, 0xAD, 0xBE, 0xEF]),
        };
        let decoded = MetadataMessage::decode(&msg.encode()).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn reject_round_trips() {
        let msg = MetadataMessage::Reject { piece: 9 };
        assert_eq!(MetadataMessage::decode(&msg.encode()).unwrap(), msg);
    }

    #[test]
    fn piece_count_is_ceiling_with_floor_one() {
        assert_eq!(piece_count(0), 1);
        assert_eq!(piece_count(1), 1);
        assert_eq!(piece_count(16_384), 1);
        assert_eq!(piece_count(16_385), 2);
        assert_eq!(piece_count(32_768), 2);
        assert_eq!(piece_count(50_000), 4);
    }
}
