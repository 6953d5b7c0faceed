//! Primitive wire encodings
//!
//! Integers are little-endian, lengths and counts are CompactSize, strings
//! are CompactSize-prefixed bytes. Decoding reads from a `&[u8]` cursor and
//! never panics on short input.

use bytes::{Buf, BufMut, BytesMut};

use crate::error::PayloadError;
use crate::hash::Hash256;

/// Types with a wire encoding
pub trait WireEncode {
    fn wire_encode(&self, buf: &mut BytesMut);
}

/// Types decodable from a wire cursor
pub trait WireDecode: Sized {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError>;
}

pub(crate) fn ensure(buf: &&[u8], len: usize, field: &'static str) -> Result<(), PayloadError> {
    if buf.remaining() < len {
        return Err(PayloadError::UnexpectedEnd { field });
    }
    Ok(())
}

/// Variable-length integer ("CompactSize")
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CompactSize(pub u64);

impl CompactSize {
    /// Number of bytes the encoding occupies
    pub fn encoded_len(&self) -> usize {
        match self.0 {
            0..=0xfc => 1,
            0xfd..=0xffff => 3,
            0x1_0000..=0xffff_ffff => 5,
            _ => 9,
        }
    }

    /// Decode a count and reject it if it exceeds `max`
    pub(crate) fn decode_bounded(
        buf: &mut &[u8],
        field: &'static str,
        max: u64,
    ) -> Result<usize, PayloadError> {
        let count = CompactSize::wire_decode(buf)?.0;
        if count > max {
            return Err(PayloadError::TooMany { field, count, max });
        }
        Ok(count as usize)
    }
}

impl WireEncode for CompactSize {
    fn wire_encode(&self, buf: &mut BytesMut) {
        match self.0 {
            0..=0xfc => buf.put_u8(self.0 as u8),
            0xfd..=0xffff => {
                buf.put_u8(0xfd);
                buf.put_u16_le(self.0 as u16);
            }
            0x1_0000..=0xffff_ffff => {
                buf.put_u8(0xfe);
                buf.put_u32_le(self.0 as u32);
            }
            _ => {
                buf.put_u8(0xff);
                buf.put_u64_le(self.0);
            }
        }
    }
}

impl WireDecode for CompactSize {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        ensure(buf, 1, "compact size")?;
        let value = match buf.get_u8() {
            0xfd => {
                ensure(buf, 2, "compact size")?;
                buf.get_u16_le() as u64
            }
            0xfe => {
                ensure(buf, 4, "compact size")?;
                buf.get_u32_le() as u64
            }
            0xff => {
                ensure(buf, 8, "compact size")?;
                buf.get_u64_le()
            }
            n => n as u64,
        };
        Ok(CompactSize(value))
    }
}

macro_rules! impl_int {
    ($ty:ty, $len:expr, $put:ident, $get:ident) => {
        impl WireEncode for $ty {
            fn wire_encode(&self, buf: &mut BytesMut) {
                buf.$put(*self);
            }
        }

        impl WireDecode for $ty {
            fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
                ensure(buf, $len, stringify!($ty))?;
                Ok(buf.$get())
            }
        }
    };
}

impl_int!(u16, 2, put_u16_le, get_u16_le);
impl_int!(u32, 4, put_u32_le, get_u32_le);
impl_int!(i32, 4, put_i32_le, get_i32_le);
impl_int!(u64, 8, put_u64_le, get_u64_le);
impl_int!(i64, 8, put_i64_le, get_i64_le);

impl WireEncode for bool {
    fn wire_encode(&self, buf: &mut BytesMut) {
        buf.put_u8(u8::from(*self));
    }
}

impl WireDecode for bool {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        ensure(buf, 1, "bool")?;
        Ok(buf.get_u8() != 0)
    }
}

impl WireEncode for Hash256 {
    fn wire_encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.0);
    }
}

impl WireDecode for Hash256 {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        ensure(buf, 32, "hash")?;
        let mut bytes = [0u8; 32];
        buf.copy_to_slice(&mut bytes);
        Ok(Hash256(bytes))
    }
}

impl WireEncode for String {
    fn wire_encode(&self, buf: &mut BytesMut) {
        CompactSize(self.len() as u64).wire_encode(buf);
        buf.put_slice(self.as_bytes());
    }
}

/// Longest string accepted on the wire (the reference node's user agent limit)
pub const MAX_STRING_LEN: u64 = 256;

impl WireDecode for String {
    fn wire_decode(buf: &mut &[u8]) -> Result<Self, PayloadError> {
        let len = CompactSize::decode_bounded(buf, "string bytes", MAX_STRING_LEN)?;
        ensure(buf, len, "string")?;
        let bytes = buf[..len].to_vec();
        buf.advance(len);
        String::from_utf8(bytes).map_err(|_| PayloadError::InvalidUtf8 { field: "string" })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode<T: WireEncode>(value: &T) -> Vec<u8> {
        let mut buf = BytesMut::new();
        value.wire_encode(&mut buf);
        buf.to_vec()
    }

    #[test]
    fn test_compact_size_boundaries() {
        for (value, len) in [
            (0u64, 1usize),
            (0xfc, 1),
            (0xfd, 3),
            (0xffff, 3),
            (0x1_0000, 5),
            (0xffff_ffff, 5),
            (0x1_0000_0000, 9),
        ] {
            let bytes = encode(&CompactSize(value));
            assert_eq!(bytes.len(), len, "value {value:#x}");
            assert_eq!(CompactSize(value).encoded_len(), len);

            let mut cursor = bytes.as_slice();
            assert_eq!(CompactSize::wire_decode(&mut cursor).unwrap().0, value);
            assert!(cursor.is_empty());
        }
    }

    #[test]
    fn test_compact_size_truncated() {
        let mut cursor: &[u8] = &[0xfe, 0x01, 0x02];
        assert!(matches!(
            CompactSize::wire_decode(&mut cursor),
            Err(PayloadError::UnexpectedEnd { .. })
        ));
    }

    #[test]
    fn test_integers_little_endian() {
        assert_eq!(encode(&0x0102_0304u32), vec![4, 3, 2, 1]);
        assert_eq!(encode(&-1i32), vec![0xff; 4]);
    }

    #[test]
    fn test_short_integer_read_fails() {
        let mut cursor: &[u8] = &[1, 2, 3];
        assert!(u64::wire_decode(&mut cursor).is_err());
    }

    #[test]
    fn test_string_too_long() {
        let mut buf = BytesMut::new();
        CompactSize(MAX_STRING_LEN + 1).wire_encode(&mut buf);
        let mut cursor: &[u8] = &buf;
        assert!(matches!(
            String::wire_decode(&mut cursor),
            Err(PayloadError::TooMany { .. })
        ));
    }

    #[test]
    fn test_string_invalid_utf8() {
        let mut cursor: &[u8] = &[2, 0xff, 0xfe];
        assert_eq!(
            String::wire_decode(&mut cursor),
            Err(PayloadError::InvalidUtf8 { field: "string" })
        );
    }
}
