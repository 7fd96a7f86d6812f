//! Errors raised while framing or decoding wire messages.

use crate::types::MsgType;

/// Failure to interpret a frame received from (or built for) a client.
#[derive(Debug, thiserror::Error)]
pub enum PosbusError {
    /// Frame shorter than the two type tags
    #[error("frame too short: {0} bytes")]
    FrameTooShort(usize),

    /// Leading and trailing tags are not complements of each other
    #[error("frame tag mismatch: header {header:#010X}, footer {footer:#010X}")]
    TagMismatch { header: u32, footer: u32 },

    /// A specific message type was required but a different one arrived
    #[error("unexpected message type: expected {expected}, got {actual}")]
    UnexpectedType { expected: MsgType, actual: MsgType },

    /// The tag is valid but this side does not accept it
    #[error("unsupported message type: {0}")]
    Unsupported(MsgType),

    /// Body ended before the named field could be read
    #[error("truncated body while reading {0}")]
    Truncated(&'static str),

    /// Body has bytes left over after the last field
    #[error("{0} trailing bytes after message body")]
    TrailingBytes(usize),

    #[error("invalid UTF-8 in field {0}")]
    InvalidUtf8(&'static str),

    #[error("invalid JSON in field {field}: {source}")]
    Json {
        field: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, PosbusError>;
