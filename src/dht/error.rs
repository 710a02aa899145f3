use thiserror::Error;

/// Errors surfaced by the DHT engine.
///
/// Per-packet problems (malformed input, unknown transactions, full
/// queues) never become errors; they are dropped where they occur.
#[derive(Debug, Error)]
pub enum DhtError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("bencode error: {0}")]
    Bencode(#[from] crate::bencode::BencodeError),

    /// A decoded packet is missing a required field or has a
    /// wrong-sized binary field.
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),

    #[error("invalid node id length")]
    InvalidNodeId,
}
