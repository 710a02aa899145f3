use thiserror::Error;

/// Errors raised while decoding bencode.
///
/// Encoding cannot fail; only [`decode`](super::decode) and
/// [`decode_prefix`](super::decode_prefix) return these.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BencodeError {
    /// Input ended inside a value.
    #[error("unexpected end of input")]
    UnexpectedEof,

    /// Malformed integer (empty, leading zeros, negative zero, overflow).
    #[error("invalid integer")]
    InvalidInteger,

    /// Byte-string length prefix is not a number.
    #[error("invalid string length")]
    InvalidLength,

    /// Dictionary key is not a byte string.
    #[error("dictionary key is not a byte string")]
    InvalidKey,

    /// A byte that starts no bencode type.
    #[error("unexpected character: {0:?}")]
    UnexpectedChar(char),

    /// Bytes left over after the value.
    #[error("trailing data after value")]
    TrailingData,

    /// More than 32 nested lists/dictionaries.
    #[error("nesting too deep")]
    NestingTooDeep,
}
