use std::collections::BTreeMap;

use bytes::Bytes;

use super::error::PeerError;
use crate::bencode::{decode, encode, Value};

/// Sub-id of the extension handshake itself.
pub const EXTENSION_HANDSHAKE_ID: u8 = 0;
/// Name of the metadata exchange extension (BEP-9).
pub const UT_METADATA: &str = "ut_metadata";

/// The BEP-10 extended handshake.
///
/// Carries the `m` dictionary mapping extension names to the ids the
/// sender assigned them, plus whatever optional keys matter here:
/// `metadata_size` (BEP-9) and the `v` client string for logs.
#[derive(Debug, Clone, Default)]
pub struct ExtensionHandshake {
    pub extensions: BTreeMap<String, u8>,
    pub metadata_size: Option<i64>,
    pub client: Option<String>,
}

impl ExtensionHandshake {
    /// The handshake a crawler sends: ut_metadata under `local_id`.
    pub fn offering_metadata(local_id: u8) -> Self {
        let mut hs = Self::default();
        hs.extensions.insert(UT_METADATA.to_string(), local_id);
        hs
    }

    /// The id this peer assigned to `name`, if advertised.
    pub fn extension_id(&self, name: &str) -> Option<u8> {
        self.extensions.get(name).copied()
    }

    pub fn encode(&self) -> Bytes {
        let mut m = BTreeMap::new();
        for (name, id) in &self.extensions {
            m.insert(
                Bytes::copy_from_slice(name.as_bytes()),
                Value::Int(*id as i64),
            );
        }

        let mut dict = BTreeMap::new();
        dict.insert(Bytes::from_static(b"m"), Value::Dict(m));
        if let Some(size) = self.metadata_size {
            dict.insert(Bytes::from_static(b"metadata_size"), Value::Int(size));
        }
        if let Some(client) = &self.client {
            dict.insert(Bytes::from_static(b"v"), Value::text(client));
        }
        Bytes::from(encode(&Value::Dict(dict)))
    }

    pub fn decode(data: &[u8]) -> Result<Self, PeerError> {
        let value = decode(data)?;
        let dict = value.as_dict().ok_or(PeerError::Extension("not a dict"))?;

        let mut hs = Self::default();
        if let Some(m) = dict.get(b"m".as_slice()).and_then(|v| v.as_dict()) {
            for (key, val) in m {
                let (Ok(name), Some(id)) = (std::str::from_utf8(key), val.as_int()) else {
                    continue;
                };
                // id 0 disables an extension (BEP-10).
                if (1..=255).contains(&id) {
                    hs.extensions.insert(name.to_string(), id as u8);
                }
            }
        }
        hs.metadata_size = dict
            .get(b"metadata_size".as_slice())
            .and_then(Value::as_int);
        hs.client = dict
            .get(b"v".as_slice())
            .and_then(|v| v.as_str())
            .map(String::from);
        Ok(hs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offering_round_trips() {
        let hs = ExtensionHandshake::offering_metadata(1);
        let decoded = ExtensionHandshake::decode(&hs.encode()).unwrap();
        assert_eq!(decoded.extension_id(UT_METADATA), Some(1));
        assert_eq!(decoded.metadata_size, None);
    }

    #[test]
    fn decodes_peer_handshake_with_size() {
        let raw = b"d1:md11:ut_metadatai3ee13:metadata_sizei32768e1:v7:dredge0e";
        let hs = ExtensionHandshake::decode(raw).unwrap();
        assert_eq!(hs.extension_id(UT_METADATA), Some(3));
        assert_eq!(hs.metadata_size, Some(32_768));
        assert_eq!(hs.client.as_deref(), Some("dredge0"));
    }

    #[test]
    fn zero_extension_id_means_disabled() {
        let raw = b"d1:md11:ut_metadatai0eee";
        let hs = ExtensionHandshake::decode(raw).unwrap();
        assert_eq!(hs.extension_id(UT_METADATA), None);
    }
}
