//! # Nodenet Wire
//!
//! Bit-exact encoding of the P2P protocol spoken between the harness and
//! its nodes.
//!
//! Every message travels in a frame:
//!
//! ```text
//! [magic:4][command:12, NUL padded][payload length:4, LE][checksum:4][payload]
//! ```
//!
//! where the checksum is the first four bytes of the double-SHA256 of the
//! payload. [`WireCodec::decode`] works on a growing receive buffer and
//! reports [`DecodeStatus::NeedMoreData`] until a whole frame is present.
//!
//! ## Example
//!
//! ```rust
//! use nodenet_wire::{DecodeStatus, Message, Network, WireCodec};
//!
//! let codec = WireCodec::new(Network::Regtest.magic());
//! let bytes = codec.encode(&Message::Ping(7)).unwrap();
//!
//! match codec.decode(&bytes).unwrap() {
//!     DecodeStatus::Complete { message, consumed } => {
//!         assert_eq!(message, Message::Ping(7));
//!         assert_eq!(consumed, bytes.len());
//!     }
//!     DecodeStatus::NeedMoreData => unreachable!(),
//! }
//! ```

pub mod codec;
pub mod encode;
pub mod error;
pub mod hash;
pub mod message;

pub use codec::{
    COMMAND_LEN, DecodeStatus, HEADER_LEN, MAX_PAYLOAD_SIZE, Magic, Network, WireCodec, checksum,
    validate_command,
};
pub use encode::{CompactSize, WireDecode, WireEncode};
pub use error::{DecodeError, EncodeError, PayloadError};
pub use hash::{Hash256, double_sha256};
pub use message::{
    AddrEntry, Block, BlockHeader, BlockLocator, InvType, Inventory, Message, NetAddress,
    Transaction, VersionMessage,
};
