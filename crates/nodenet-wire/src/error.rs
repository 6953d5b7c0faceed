//! Wire encoding and decoding errors

use thiserror::Error;

/// A message cannot be framed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("command {0:?} is not 1 to 12 printable ASCII characters")]
    InvalidCommand(String),

    #[error("payload of {size} bytes exceeds maximum of {max}")]
    OversizedPayload { size: usize, max: usize },
}

/// A frame could not be decoded
///
/// Any of these is terminal for the stream it came from: framing cannot be
/// resynchronised once a header or payload is known to be bad.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("bad network magic: expected {expected}, found {found}")]
    BadMagic { expected: String, found: String },

    #[error("invalid command field: {0:?}")]
    InvalidCommand(Vec<u8>),

    #[error("payload of {size} bytes exceeds maximum of {max}")]
    OversizedPayload { size: usize, max: usize },

    #[error("checksum mismatch for '{command}': header {expected}, computed {computed}")]
    Checksum {
        command: String,
        expected: String,
        computed: String,
    },

    #[error("malformed '{command}' payload: {source}")]
    Payload {
        command: String,
        #[source]
        source: PayloadError,
    },
}

/// A payload body failed to parse
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PayloadError {
    #[error("unexpected end of data reading {field}")]
    UnexpectedEnd { field: &'static str },

    #[error("too many {field}: {count} (max {max})")]
    TooMany {
        field: &'static str,
        count: u64,
        max: u64,
    },

    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },

    #[error("invalid hex encoding")]
    InvalidHex,

    #[error("{count} trailing bytes after payload")]
    TrailingBytes { count: usize },
}
