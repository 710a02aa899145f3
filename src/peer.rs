//! Peer wire protocol, reduced to what a metadata crawler needs.
//!
//! A crawler never transfers pieces; it connects to a peer that
//! announced an info-hash, performs the BEP-3 handshake and the BEP-10
//! extension handshake, and pulls the torrent's info dictionary over
//! ut_metadata ([BEP-9]). Everything else in the peer protocol is
//! ignored on receive and never sent.
//!
//! - [`Handshake`] / [`WireMessage`] — the fixed 68-byte handshake and
//!   length-prefixed framing.
//! - [`ExtensionHandshake`] — the BEP-10 `m` dictionary.
//! - [`MetadataMessage`] — ut_metadata request/data/reject.
//! - [`MetadataFetcher`] — the queue consumer driving one TCP session
//!   per announced `(info_hash, peer)`.
//!
//! [BEP-9]: http://bittorrent.org/beps/bep_0009.html

mod error;
mod extension;
mod fetcher;
mod message;
mod metadata;
mod transport;

pub use error::PeerError;
pub use extension::{ExtensionHandshake, EXTENSION_HANDSHAKE_ID, UT_METADATA};
pub use fetcher::{FetchRequest, MetadataFetcher};
pub use message::{Handshake, WireMessage};
pub use metadata::{piece_count, MetadataMessage, METADATA_PIECE_SIZE};
pub use transport::PeerTransport;
