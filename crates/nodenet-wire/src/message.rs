//! Typed P2P messages
//!
//! Each variant of [`Message`] maps to one command name. Commands this crate
//! does not model decode into [`Message::Unknown`] so newer peers never
//! break a connection.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::encode::{CompactSize, WireDecode, WireEncode, ensure};
use crate::error::PayloadError;
use crate::hash::Hash256;

/// Most inventory entries accepted in one `inv`/`getdata`/`notfound`
pub const MAX_INV_ENTRIES: u64 = 50_000;
/// Most headers accepted in one `headers` message
pub const MAX_HEADERS: u64 = 2_000;
/// Most addresses accepted in one `addr` message
pub const MAX_ADDR_ENTRIES: u64 = 1_000;
/// Most hashes accepted in a block locator
pub const MAX_LOCATOR_HASHES: u64 = 101;

/// A network address as carried in `version` and `addr`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetAddress {
    pub services: u64,
    pub ip: IpAddr,
    pub port: u16,
}

impl NetAddress {
    pub fn new(services: u64, ip: IpAddr, port: u16) -> Self {
        Self { services, ip, port }
    }

    /// The all-zero address nodes send when they don't know their own
    pub fn unspecified() -> Self {
        Self::new(0, IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0)
    }
}

impl From<std::net::SocketAddr> for NetAddress {
    fn from(addr: std::net::SocketAddr) -> Self {
        Self::new(0, addr.ip(), addr.port())
    }
}

impl WireEncode for NetAddress {
    fn wire_encode(&self, buf: &mut BytesMut) {
        buf.put_u64_le(self.services);
        let v6 = match self.ip {
            IpAddr::V4(v4) => v4.to_ipv6_mapped(),
            IpAddr::V6(v6) => v6,
        };
        buf.put_slice(&v6.octets());
        // Port is the one big-endian field in the protocol
        buf.put_u16(self.port);
    }
}

impl WireDecode for NetAddress {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        let services = u64::wire_decode(buf)?;
        ensure(buf, 18, "net address")?;
        let mut octets = [0u8; 16];
        buf.copy_to_slice(&mut octets);
        let port = buf.get_u16();
        let v6 = Ipv6Addr::from(octets);
        let ip = match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        };
        Ok(Self { services, ip, port })
    }
}

/// Payload of the `version` handshake message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionMessage {
    pub version: i32,
    pub services: u64,
    pub timestamp: i64,
    pub receiver: NetAddress,
    pub sender: NetAddress,
    pub nonce: u64,
    pub user_agent: String,
    pub start_height: i32,
    pub relay: bool,
}

impl WireEncode for VersionMessage {
    fn wire_encode(&self, buf: &mut BytesMut) {
        self.version.wire_encode(buf);
        self.services.wire_encode(buf);
        self.timestamp.wire_encode(buf);
        self.receiver.wire_encode(buf);
        self.sender.wire_encode(buf);
        self.nonce.wire_encode(buf);
        self.user_agent.wire_encode(buf);
        self.start_height.wire_encode(buf);
        self.relay.wire_encode(buf);
    }
}

impl WireDecode for VersionMessage {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        let version = i32::wire_decode(buf)?;
        let services = u64::wire_decode(buf)?;
        let timestamp = i64::wire_decode(buf)?;
        let receiver = NetAddress::wire_decode(buf)?;
        let sender = NetAddress::wire_decode(buf)?;
        let nonce = u64::wire_decode(buf)?;
        let user_agent = String::wire_decode(buf)?;
        let start_height = i32::wire_decode(buf)?;
        // Older peers omit the relay flag entirely
        let relay = if buf.has_remaining() {
            bool::wire_decode(buf)?
        } else {
            true
        };
        Ok(Self {
            version,
            services,
            timestamp,
            receiver,
            sender,
            nonce,
            user_agent,
            start_height,
            relay,
        })
    }
}

/// Kind of object an inventory vector refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvType {
    Error,
    Tx,
    Block,
    FilteredBlock,
    CompactBlock,
    WitnessTx,
    WitnessBlock,
    Other(u32),
}

impl From<u32> for InvType {
    fn from(value: u32) -> Self {
        match value {
            0 => InvType::Error,
            1 => InvType::Tx,
            2 => InvType::Block,
            3 => InvType::FilteredBlock,
            4 => InvType::CompactBlock,
            0x4000_0001 => InvType::WitnessTx,
            0x4000_0002 => InvType::WitnessBlock,
            other => InvType::Other(other),
        }
    }
}

impl From<InvType> for u32 {
    fn from(value: InvType) -> Self {
        match value {
            InvType::Error => 0,
            InvType::Tx => 1,
            InvType::Block => 2,
            InvType::FilteredBlock => 3,
            InvType::CompactBlock => 4,
            InvType::WitnessTx => 0x4000_0001,
            InvType::WitnessBlock => 0x4000_0002,
            InvType::Other(other) => other,
        }
    }
}

/// One inventory vector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Inventory {
    pub inv_type: InvType,
    pub hash: Hash256,
}

impl Inventory {
    pub fn block(hash: Hash256) -> Self {
        Self {
            inv_type: InvType::Block,
            hash,
        }
    }

    pub fn tx(hash: Hash256) -> Self {
        Self {
            inv_type: InvType::Tx,
            hash,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self.inv_type, InvType::Block | InvType::WitnessBlock)
    }
}

impl WireEncode for Inventory {
    fn wire_encode(&self, buf: &mut BytesMut) {
        u32::from(self.inv_type).wire_encode(buf);
        self.hash.wire_encode(buf);
    }
}

impl WireDecode for Inventory {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        let inv_type = InvType::from(u32::wire_decode(buf)?);
        let hash = Hash256::wire_decode(buf)?;
        Ok(Self { inv_type, hash })
    }
}

/// 80-byte block header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub version: i32,
    pub prev_blockhash: Hash256,
    pub merkle_root: Hash256,
    pub time: u32,
    pub bits: u32,
    pub nonce: u32,
}

impl BlockHeader {
    pub const SIZE: usize = 80;

    /// Double-SHA256 of the serialized header
    pub fn block_hash(&self) -> Hash256 {
        let mut buf = BytesMut::with_capacity(Self::SIZE);
        self.wire_encode(&mut buf);
        Hash256::hash(&buf)
    }
}

impl WireEncode for BlockHeader {
    fn wire_encode(&self, buf: &mut BytesMut) {
        self.version.wire_encode(buf);
        self.prev_blockhash.wire_encode(buf);
        self.merkle_root.wire_encode(buf);
        self.time.wire_encode(buf);
        self.bits.wire_encode(buf);
        self.nonce.wire_encode(buf);
    }
}

impl WireDecode for BlockHeader {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        ensure(buf, Self::SIZE, "block header")?;
        Ok(Self {
            version: i32::wire_decode(buf)?,
            prev_blockhash: Hash256::wire_decode(buf)?,
            merkle_root: Hash256::wire_decode(buf)?,
            time: u32::wire_decode(buf)?,
            bits: u32::wire_decode(buf)?,
            nonce: u32::wire_decode(buf)?,
        })
    }
}

/// A block: its header plus the transaction data, carried opaquely
///
/// Transaction validation belongs to the node under test, so the harness
/// never parses `txdata`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub header: BlockHeader,
    pub txdata: Bytes,
}

impl Block {
    pub fn new(header: BlockHeader, txdata: impl Into<Bytes>) -> Self {
        Self {
            header,
            txdata: txdata.into(),
        }
    }

    pub fn block_hash(&self) -> Hash256 {
        self.header.block_hash()
    }

    /// Serialized form as hex, the shape `submitblock` expects
    pub fn to_hex(&self) -> String {
        let mut buf = BytesMut::new();
        self.wire_encode(&mut buf);
        hex::encode(buf)
    }

    /// Parse the hex serialization produced by [`Block::to_hex`]
    pub fn from_hex(s: &str) -> Result<Self, PayloadError> {
        let bytes = hex::decode(s).map_err(|_| PayloadError::InvalidHex)?;
        let mut cursor = bytes.as_slice();
        Block::wire_decode(&mut cursor)
    }
}

impl WireEncode for Block {
    fn wire_encode(&self, buf: &mut BytesMut) {
        self.header.wire_encode(buf);
        buf.put_slice(&self.txdata);
    }
}

impl WireDecode for Block {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        let header = BlockHeader::wire_decode(buf)?;
        let txdata = Bytes::copy_from_slice(buf);
        *buf = &[];
        Ok(Self { header, txdata })
    }
}

/// A raw transaction, carried opaquely
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transaction {
    pub raw: Bytes,
}

impl Transaction {
    pub fn new(raw: impl Into<Bytes>) -> Self {
        Self { raw: raw.into() }
    }

    pub fn txid(&self) -> Hash256 {
        Hash256::hash(&self.raw)
    }
}

/// Payload of `getheaders` and `getblocks`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockLocator {
    pub version: u32,
    pub locator_hashes: Vec<Hash256>,
    pub hash_stop: Hash256,
}

impl WireEncode for BlockLocator {
    fn wire_encode(&self, buf: &mut BytesMut) {
        self.version.wire_encode(buf);
        encode_list(&self.locator_hashes, buf);
        self.hash_stop.wire_encode(buf);
    }
}

impl WireDecode for BlockLocator {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        let version = u32::wire_decode(buf)?;
        let locator_hashes = decode_list(buf, "locator hashes", MAX_LOCATOR_HASHES)?;
        let hash_stop = Hash256::wire_decode(buf)?;
        Ok(Self {
            version,
            locator_hashes,
            hash_stop,
        })
    }
}

/// One timestamped entry of an `addr` message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddrEntry {
    pub time: u32,
    pub address: NetAddress,
}

impl WireEncode for AddrEntry {
    fn wire_encode(&self, buf: &mut BytesMut) {
        self.time.wire_encode(buf);
        self.address.wire_encode(buf);
    }
}

impl WireDecode for AddrEntry {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        Ok(Self {
            time: u32::wire_decode(buf)?,
            address: NetAddress::wire_decode(buf)?,
        })
    }
}

fn encode_list<T: WireEncode>(items: &[T], buf: &mut BytesMut) {
    CompactSize(items.len() as u64).wire_encode(buf);
    for item in items {
        item.wire_encode(buf);
    }
}

fn decode_list<T: WireDecode>(
    buf: &mut &[u8],
    field: &'static str,
    max: u64,
) -> Result<Vec<T>, PayloadError> {
    let count = CompactSize::decode_bounded(buf, field, max)?;
    let mut items = Vec::with_capacity(count.min(1024));
    for _ in 0..count {
        items.push(T::wire_decode(buf)?);
    }
    Ok(items)
}

/// A decoded P2P message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    Version(VersionMessage),
    Verack,
    Ping(u64),
    Pong(u64),
    Inv(Vec<Inventory>),
    GetData(Vec<Inventory>),
    NotFound(Vec<Inventory>),
    Block(Block),
    Tx(Transaction),
    Headers(Vec<BlockHeader>),
    GetHeaders(BlockLocator),
    GetBlocks(BlockLocator),
    SendHeaders,
    GetAddr,
    Addr(Vec<AddrEntry>),
    Mempool,
    /// Minimum fee rate, in satoshis per kilobyte
    FeeFilter(i64),
    /// A command this crate does not model
    Unknown { command: String, payload: Bytes },
}

impl Message {
    /// Command name as it appears in the frame header
    pub fn command(&self) -> &str {
        match self {
            Message::Version(_) => "version",
            Message::Verack => "verack",
            Message::Ping(_) => "ping",
            Message::Pong(_) => "pong",
            Message::Inv(_) => "inv",
            Message::GetData(_) => "getdata",
            Message::NotFound(_) => "notfound",
            Message::Block(_) => "block",
            Message::Tx(_) => "tx",
            Message::Headers(_) => "headers",
            Message::GetHeaders(_) => "getheaders",
            Message::GetBlocks(_) => "getblocks",
            Message::SendHeaders => "sendheaders",
            Message::GetAddr => "getaddr",
            Message::Addr(_) => "addr",
            Message::Mempool => "mempool",
            Message::FeeFilter(_) => "feefilter",
            Message::Unknown { command, .. } => command.as_str(),
        }
    }

    /// Append the payload (without framing) to `buf`
    pub fn encode_payload(&self, buf: &mut BytesMut) {
        match self {
            Message::Version(v) => v.wire_encode(buf),
            Message::Verack | Message::SendHeaders | Message::GetAddr | Message::Mempool => {}
            Message::Ping(nonce) | Message::Pong(nonce) => nonce.wire_encode(buf),
            Message::Inv(inv) | Message::GetData(inv) | Message::NotFound(inv) => {
                encode_list(inv, buf)
            }
            Message::Block(block) => block.wire_encode(buf),
            Message::Tx(tx) => buf.put_slice(&tx.raw),
            Message::Headers(headers) => {
                CompactSize(headers.len() as u64).wire_encode(buf);
                for header in headers {
                    header.wire_encode(buf);
                    // Headers carry an always-empty transaction count
                    CompactSize(0).wire_encode(buf);
                }
            }
            Message::GetHeaders(locator) | Message::GetBlocks(locator) => locator.wire_encode(buf),
            Message::Addr(entries) => encode_list(entries, buf),
            Message::FeeFilter(rate) => rate.wire_encode(buf),
            Message::Unknown { payload, .. } => buf.put_slice(payload),
        }
    }

    /// Parse `payload` as the body of `command`
    ///
    /// Unrecognised commands always succeed as [`Message::Unknown`].
    pub fn decode_payload(command: &str, payload: &[u8]) -> Result<Message, PayloadError> {
        let mut buf = payload;
        let message = match command {
            "version" => Message::Version(VersionMessage::wire_decode(&mut buf)?),
            "verack" => Message::Verack,
            "ping" => Message::Ping(u64::wire_decode(&mut buf)?),
            "pong" => Message::Pong(u64::wire_decode(&mut buf)?),
            "inv" => Message::Inv(decode_list(&mut buf, "inventory", MAX_INV_ENTRIES)?),
            "getdata" => Message::GetData(decode_list(&mut buf, "inventory", MAX_INV_ENTRIES)?),
            "notfound" => Message::NotFound(decode_list(&mut buf, "inventory", MAX_INV_ENTRIES)?),
            "block" => Message::Block(Block::wire_decode(&mut buf)?),
            "tx" => {
                let tx = Transaction::new(Bytes::copy_from_slice(buf));
                buf.advance(buf.len());
                Message::Tx(tx)
            }
            "headers" => {
                let count = CompactSize::decode_bounded(&mut buf, "headers", MAX_HEADERS)?;
                let mut headers = Vec::with_capacity(count);
                for _ in 0..count {
                    headers.push(BlockHeader::wire_decode(&mut buf)?);
                    CompactSize::wire_decode(&mut buf)?;
                }
                Message::Headers(headers)
            }
            "getheaders" => Message::GetHeaders(BlockLocator::wire_decode(&mut buf)?),
            "getblocks" => Message::GetBlocks(BlockLocator::wire_decode(&mut buf)?),
            "sendheaders" => Message::SendHeaders,
            "getaddr" => Message::GetAddr,
            "addr" => Message::Addr(decode_list(&mut buf, "addresses", MAX_ADDR_ENTRIES)?),
            "mempool" => Message::Mempool,
            "feefilter" => Message::FeeFilter(i64::wire_decode(&mut buf)?),
            other => {
                return Ok(Message::Unknown {
                    command: other.to_string(),
                    payload: Bytes::copy_from_slice(payload),
                });
            }
        };

        if !buf.is_empty() {
            return Err(PayloadError::TrailingBytes { count: buf.len() });
        }
        Ok(message)
    }
}
