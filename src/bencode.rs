//! Bencode encoding and decoding (BEP-3).
//!
//! Bencode is the serialization used by KRPC messages, the extension
//! protocol handshake, and torrent info dictionaries. Four types exist:
//! integers, byte strings, lists, and dictionaries with byte-string keys.
//!
//! [`decode`] expects the input to be exactly one value. [`decode_prefix`]
//! stops after the first complete value and reports how many bytes it
//! consumed; the ut_metadata `data` message needs this because its piece
//! payload trails the bencoded header.

mod decode;
mod encode;
mod error;
mod value;

pub use decode::{decode, decode_prefix};
pub use encode::encode;
pub use error::BencodeError;
pub use value::Value;

#[cfg(test)]
mod tests;
