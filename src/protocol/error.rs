//! Protocol codec error types.

use thiserror::Error;

/// Errors from encoding or decoding protocol messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("input truncated")]
    Truncated,

    #[error("trailing bytes after value: used {used} of {total}")]
    TrailingBytes { used: usize, total: usize },

    #[error("unexpected byte: 0x{0:02x}")]
    UnexpectedByte(u8),

    #[error("invalid integer encoding")]
    InvalidInteger,

    #[error("nesting deeper than {0} levels")]
    DepthExceeded(usize),

    #[error("missing field '{0}'")]
    MissingField(&'static str),

    #[error("wrong type for field '{0}'")]
    WrongFieldType(&'static str),

    #[error("wrong length for field '{field}': expected {expected}, got {got}")]
    WrongFieldLength {
        field: &'static str,
        expected: usize,
        got: usize,
    },

    #[error("body too large: max {max}, got {got}")]
    BodyTooLarge { max: usize, got: usize },

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(i64),

    #[error("wrong message type")]
    WrongMessageType,
}
