use thiserror::Error;

/// Errors ending a metadata fetch session.
///
/// All of them are terminal for the session and silent for the engine:
/// the announce that triggered the fetch is simply dropped.
#[derive(Debug, Error)]
pub enum PeerError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer's handshake is not "BitTorrent protocol".
    #[error("invalid handshake")]
    InvalidHandshake,

    /// The peer did not set the extension-protocol reserved bit.
    #[error("peer does not support the extension protocol")]
    ExtensionUnsupported,

    /// The peer closed the connection mid-exchange.
    #[error("connection closed")]
    ConnectionClosed,

    /// A read, write or whole-session deadline elapsed.
    #[error("timeout")]
    Timeout,

    /// A frame exceeded the sanity cap.
    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    /// The advertised metadata size is absurd.
    #[error("metadata too large: {0} bytes")]
    MetadataTooLarge(usize),

    /// ut_metadata protocol violation.
    #[error("extension error: {0}")]
    Extension(&'static str),

    /// The assembled metadata does not hash to the announced info-hash.
    #[error("metadata hash mismatch")]
    HashMismatch,

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    #[error("metainfo error: {0}")]
    Metainfo(#[from] crate::metainfo::MetainfoError),
}
