//! Torrent metadata records produced by the fetcher.
//!
//! A successful ut_metadata exchange yields the raw info dictionary of a
//! torrent; [`MetaInfo::from_info_dict`] extracts the fields a crawler
//! cares about (name, sizes, file list) without touching pieces or any
//! other transfer-related keys.

use std::fmt;
use std::net::SocketAddr;

use thiserror::Error;

use crate::bencode::{decode, Value};

/// Errors raised while interpreting a fetched info dictionary.
#[derive(Debug, Error)]
pub enum MetainfoError {
    /// The blob is not valid bencode.
    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// The blob decoded, but not to an info dictionary.
    #[error("not an info dictionary")]
    NotADict,

    /// A required key (`name`) is missing.
    #[error("missing field: {0}")]
    MissingField(&'static str),
}

/// A 20-byte torrent info-hash.
///
/// Displays as 40 lowercase hex digits.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct InfoHash(pub [u8; 20]);

impl InfoHash {
    pub fn as_bytes(&self) -> &[u8; 20] {
        &self.0
    }
}

impl fmt::Display for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for InfoHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "InfoHash({:02x}{:02x}..)", self.0[0], self.0[1])
    }
}

/// One file inside a multi-file torrent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaFile {
    /// Path segments, top directory first.
    pub path: Vec<String>,
    /// File size in bytes.
    pub length: u64,
}

/// Metadata harvested for one torrent from one peer.
///
/// Emitted at most once per successful fetch. `length` is the value of
/// the info dictionary's `length` key and stays 0 for multi-file
/// torrents, whose sizes live in `files`.
#[derive(Debug, Clone)]
pub struct MetaInfo {
    pub info_hash: InfoHash,
    /// The peer the metadata was fetched from.
    pub peer: SocketAddr,
    /// Torrent name (lossily decoded; announces carry arbitrary bytes).
    pub name: String,
    pub length: u64,
    /// Size of the raw info dictionary in bytes.
    pub meta_length: u32,
    pub files: Vec<MetaFile>,
}

impl MetaInfo {
    /// Interprets a raw info dictionary fetched from `peer`.
    pub fn from_info_dict(
        info_hash: InfoHash,
        peer: SocketAddr,
        raw: &[u8],
    ) -> Result<Self, MetainfoError> {
        let value = decode(raw)?;
        let dict = value.as_dict().ok_or(MetainfoError::NotADict)?;

        let name = dict
            .get(b"name".as_slice())
            .and_then(|v| v.as_bytes())
            .map(|b| String::from_utf8_lossy(b).into_owned())
            .ok_or(MetainfoError::MissingField("name"))?;

        let length = dict
            .get(b"length".as_slice())
            .and_then(Value::as_int)
            .unwrap_or(0)
            .max(0) as u64;

        let files = dict
            .get(b"files".as_slice())
            .and_then(Value::as_list)
            .map(parse_files)
            .unwrap_or_default();

        Ok(Self {
            info_hash,
            peer,
            name,
            length,
            meta_length: raw.len() as u32,
            files,
        })
    }
}

fn parse_files(list: &[Value]) -> Vec<MetaFile> {
    list.iter()
        .filter_map(|entry| {
            let length = entry.get(b"length").and_then(Value::as_int)?.max(0) as u64;
            let path = entry
                .get(b"path")
                .and_then(Value::as_list)?
                .iter()
                .filter_map(|seg| seg.as_bytes())
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect();
            Some(MetaFile { path, length })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn peer() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 51413)
    }

    #[test]
    fn info_hash_displays_as_hex() {
        let mut raw = [0u8; 20];
        raw[0] = 0xab;
        raw[19] = 0x01;
        let hex = InfoHash(raw).to_string();
        assert_eq!(hex.len(), 40);
        assert!(hex.starts_with("ab"));
        assert!(hex.ends_with("01"));
    }

    #[test]
    fn parses_single_file_torrent() {
        let raw = b"d6:lengthi1048576e4:name8:test.iso12:piece lengthi16384ee";
        let info = MetaInfo::from_info_dict(InfoHash([7u8; 20]), peer(), raw).unwrap();
        assert_eq!(info.name, "test.iso");
        assert_eq!(info.length, 1_048_576);
        assert_eq!(info.meta_length as usize, raw.len());
        assert!(info.files.is_empty());
    }

    #[test]
    fn parses_multi_file_torrent() {
        let raw = b"d5:filesld6:lengthi100e4:pathl3:dir5:a.txteed6:lengthi200e4:pathl5:b.txteee4:name3:two12:piece lengthi16384ee";
        let info = MetaInfo::from_info_dict(InfoHash([7u8; 20]), peer(), raw).unwrap();
        assert_eq!(info.name, "two");
        assert_eq!(info.length, 0);
        assert_eq!(
            info.files,
            vec![
                MetaFile {
                    path: vec!["dir".into(), "a.txt".into()],
                    length: 100
                },
                MetaFile {
                    path: vec!["b.txt".into()],
                    length: 200
                },
            ]
        );
    }

    #[test]
    fn rejects_dict_without_name() {
        let raw = b"d6:lengthi5ee";
        assert!(matches!(
            MetaInfo::from_info_dict(InfoHash([0u8; 20]), peer(), raw),
            Err(MetainfoError::MissingField("name"))
        ));
    }

    #[test]
    fn rejects_non_dict_blob() {
        assert!(matches!(
            MetaInfo::from_info_dict(InfoHash([0u8; 20]), peer(), b"i42e"),
            Err(MetainfoError::NotADict)
        ));
    }
}
