//! Message framing
//!
//! Frames are `[magic][command][length][checksum][payload]`. Decoding runs
//! against whatever bytes have arrived so far: a short buffer yields
//! [`DecodeStatus::NeedMoreData`] and consumes nothing, so the caller can
//! append more bytes and simply decode again.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{DecodeError, EncodeError};
use crate::hash::double_sha256;
use crate::message::Message;

/// Length of the fixed frame header
pub const HEADER_LEN: usize = 24;
/// Width of the NUL-padded command field
pub const COMMAND_LEN: usize = 12;
/// Largest payload a frame may announce (32 MiB)
pub const MAX_PAYLOAD_SIZE: usize = 0x0200_0000;

/// Four bytes identifying the network a frame belongs to
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Magic(pub [u8; 4]);

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Magic({})", self)
    }
}

impl std::str::FromStr for Magic {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut bytes = [0u8; 4];
        hex::decode_to_slice(s, &mut bytes)?;
        Ok(Magic(bytes))
    }
}

/// Well-known networks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Network {
    Mainnet,
    Testnet,
    Regtest,
    Signet,
}

impl Network {
    pub fn magic(self) -> Magic {
        match self {
            Network::Mainnet => Magic([0xf9, 0xbe, 0xb4, 0xd9]),
            Network::Testnet => Magic([0x0b, 0x11, 0x09, 0x07]),
            Network::Regtest => Magic([0xfa, 0xbf, 0xb5, 0xda]),
            Network::Signet => Magic([0x0a, 0x03, 0xcf, 0x40]),
        }
    }
}

impl Default for Magic {
    fn default() -> Self {
        Network::Regtest.magic()
    }
}

/// First four bytes of the payload's double-SHA256
pub fn checksum(payload: &[u8]) -> [u8; 4] {
    let hash = double_sha256(payload);
    [hash[0], hash[1], hash[2], hash[3]]
}

/// Outcome of a decode attempt on a receive buffer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    /// A whole frame was decoded from the front of the buffer
    Complete { message: Message, consumed: usize },
    /// The buffer holds less than one frame; nothing was consumed
    NeedMoreData,
}

/// Frame encoder/decoder bound to one network magic
#[derive(Debug, Clone, Copy, Default)]
pub struct WireCodec {
    magic: Magic,
}

impl WireCodec {
    pub fn new(magic: Magic) -> Self {
        Self { magic }
    }

    pub fn magic(&self) -> Magic {
        self.magic
    }

    /// Encode `message` as one frame
    pub fn encode(&self, message: &Message) -> Result<Bytes, EncodeError> {
        let mut buf = BytesMut::new();
        self.encode_into(message, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Append the frame for `message` to `buf`
    ///
    /// Fails without touching `buf` if the command does not fit the header
    /// or the payload is larger than any decoder accepts.
    pub fn encode_into(&self, message: &Message, buf: &mut BytesMut) -> Result<(), EncodeError> {
        let name = message.command();
        validate_command(name)?;

        let mut payload = BytesMut::new();
        message.encode_payload(&mut payload);
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(EncodeError::OversizedPayload {
                size: payload.len(),
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let mut command = [0u8; COMMAND_LEN];
        command[..name.len()].copy_from_slice(name.as_bytes());

        buf.reserve(HEADER_LEN + payload.len());
        buf.put_slice(&self.magic.0);
        buf.put_slice(&command);
        buf.put_u32_le(payload.len() as u32);
        buf.put_slice(&checksum(&payload));
        buf.put_slice(&payload);
        Ok(())
    }

    /// Decode the frame at the front of `buf`
    ///
    /// Header fields are validated as soon as the header is complete, so an
    /// oversized or foreign frame fails without waiting for its payload.
    pub fn decode(&self, buf: &[u8]) -> Result<DecodeStatus, DecodeError> {
        if buf.len() < HEADER_LEN {
            return Ok(DecodeStatus::NeedMoreData);
        }

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != self.magic.0 {
            return Err(DecodeError::BadMagic {
                expected: self.magic.to_string(),
                found: hex::encode(magic),
            });
        }

        let command = parse_command(&buf[4..4 + COMMAND_LEN])?;

        let size = u32::from_le_bytes([buf[16], buf[17], buf[18], buf[19]]) as usize;
        if size > MAX_PAYLOAD_SIZE {
            return Err(DecodeError::OversizedPayload {
                size,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        let frame_len = HEADER_LEN + size;
        if buf.len() < frame_len {
            return Ok(DecodeStatus::NeedMoreData);
        }

        let expected = [buf[20], buf[21], buf[22], buf[23]];
        let payload = &buf[HEADER_LEN..frame_len];
        let computed = checksum(payload);
        if expected != computed {
            return Err(DecodeError::Checksum {
                command: command.to_string(),
                expected: hex::encode(expected),
                computed: hex::encode(computed),
            });
        }

        let message =
            Message::decode_payload(command, payload).map_err(|source| DecodeError::Payload {
                command: command.to_string(),
                source,
            })?;

        Ok(DecodeStatus::Complete {
            message,
            consumed: frame_len,
        })
    }
}

/// Check that `name` fits the command field and decodes back unchanged
pub fn validate_command(name: &str) -> Result<(), EncodeError> {
    let valid = !name.is_empty()
        && name.len() <= COMMAND_LEN
        && name.bytes().all(|b| (0x20..0x7f).contains(&b));
    if valid {
        Ok(())
    } else {
        Err(EncodeError::InvalidCommand(name.to_string()))
    }
}

/// Printable ASCII followed only by NUL padding
fn parse_command(field: &[u8]) -> Result<&str, DecodeError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    let (name, padding) = field.split_at(end);

    let valid = !name.is_empty()
        && name.iter().all(|b| (0x20..0x7f).contains(b))
        && padding.iter().all(|&b| b == 0);
    if !valid {
        return Err(DecodeError::InvalidCommand(field.to_vec()));
    }

    std::str::from_utf8(name).map_err(|_| DecodeError::InvalidCommand(field.to_vec()))
}
