//! Field-level framing: fixed-width integers and length-prefixed strings.
//!
//! Reads go straight to the transport (one field at a time, no read-ahead),
//! writes go into a `BytesMut` that the response/request encoders flush as a
//! whole.

use std::io;
use std::str::FromStr;

use bytes::{BufMut, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use super::error::ProtocolError;

/// Hard limit for a single length prefix or element count (16 MB).
pub const MAX_FIELD_LEN: usize = 16 * 1024 * 1024;

/// Byte order of every multi-byte integer on the wire.
///
/// The host historically wrote integers in its native order. Both ends must
/// agree, so the order is fixed per connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ByteOrder {
    #[default]
    Little,
    Big,
    /// Whatever the machine running the bridge uses.
    Native,
}

impl ByteOrder {
    pub fn is_little_endian(self) -> bool {
        match self {
            Self::Little => true,
            Self::Big => false,
            Self::Native => cfg!(target_endian = "little"),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Little => "little",
            Self::Big => "big",
            Self::Native => "native",
        }
    }
}

impl FromStr for ByteOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "little" | "le" => Ok(Self::Little),
            "big" | "be" => Ok(Self::Big),
            "native" => Ok(Self::Native),
            other => Err(format!(
                "invalid byte order '{other}', expected 'little', 'big' or 'native'"
            )),
        }
    }
}

impl std::fmt::Display for ByteOrder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

macro_rules! read_fixed {
    ($name:ident, $ty:ty, $be:ident, $le:ident) => {
        pub async fn $name(&mut self) -> Result<$ty, ProtocolError> {
            let value = if self.order.is_little_endian() {
                self.inner.$le().await
            } else {
                self.inner.$be().await
            };
            value.map_err(ProtocolError::from_read)
        }
    };
}

macro_rules! write_fixed {
    ($name:ident, $ty:ty, $be:ident, $le:ident) => {
        pub fn $name(&mut self, value: $ty) {
            if self.order.is_little_endian() {
                self.dst.$le(value);
            } else {
                self.dst.$be(value);
            }
        }
    };
}

/// Reads protocol fields from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    order: ByteOrder,
}

impl<R: AsyncRead + Unpin + Send> FrameReader<R> {
    pub fn new(inner: R, order: ByteOrder) -> Self {
        Self { inner, order }
    }

    /// Reads the leading byte of a request.
    ///
    /// Returns `None` when the peer closed the stream cleanly before sending
    /// anything, which is how the host signals that no more requests follow.
    pub async fn read_u8_or_eof(&mut self) -> Result<Option<u8>, ProtocolError> {
        let mut byte = [0u8; 1];
        loop {
            match self.inner.read(&mut byte).await {
                Ok(0) => return Ok(None),
                Ok(_) => return Ok(Some(byte[0])),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
    }

    pub async fn read_u8(&mut self) -> Result<u8, ProtocolError> {
        self.inner.read_u8().await.map_err(ProtocolError::from_read)
    }

    pub async fn read_i8(&mut self) -> Result<i8, ProtocolError> {
        self.inner.read_i8().await.map_err(ProtocolError::from_read)
    }

    pub async fn read_bool(&mut self) -> Result<bool, ProtocolError> {
        Ok(self.read_u8().await? != 0)
    }

    read_fixed!(read_u16, u16, read_u16, read_u16_le);
    read_fixed!(read_i16, i16, read_i16, read_i16_le);
    read_fixed!(read_u32, u32, read_u32, read_u32_le);
    read_fixed!(read_i32, i32, read_i32, read_i32_le);
    read_fixed!(read_u64, u64, read_u64, read_u64_le);
    read_fixed!(read_i64, i64, read_i64, read_i64_le);
    read_fixed!(read_f32, f32, read_f32, read_f32_le);
    read_fixed!(read_f64, f64, read_f64, read_f64_le);

    /// Reads an `i32` length or element count, rejecting negative and
    /// oversized values.
    pub async fn read_len(&mut self) -> Result<usize, ProtocolError> {
        let raw = self.read_i32().await?;
        let len = usize::try_from(raw).map_err(|_| ProtocolError::NegativeLength(raw))?;
        if len > MAX_FIELD_LEN {
            return Err(ProtocolError::TooLarge {
                len,
                max: MAX_FIELD_LEN,
            });
        }
        Ok(len)
    }

    /// Reads a length-prefixed UTF-8 string. A zero length reads no payload.
    pub async fn read_string(&mut self) -> Result<String, ProtocolError> {
        let len = self.read_len().await?;
        if len == 0 {
            return Ok(String::new());
        }
        let mut buf = vec![0u8; len];
        self.inner
            .read_exact(&mut buf)
            .await
            .map_err(ProtocolError::from_read)?;
        Ok(String::from_utf8(buf)?)
    }
}

/// Writes protocol fields into an output buffer.
pub struct FrameWriter<'a> {
    dst: &'a mut BytesMut,
    order: ByteOrder,
}

impl<'a> FrameWriter<'a> {
    pub fn new(dst: &'a mut BytesMut, order: ByteOrder) -> Self {
        Self { dst, order }
    }

    pub fn put_u8(&mut self, value: u8) {
        self.dst.put_u8(value);
    }

    pub fn put_i8(&mut self, value: i8) {
        self.dst.put_i8(value);
    }

    pub fn put_bool(&mut self, value: bool) {
        self.dst.put_u8(u8::from(value));
    }

    write_fixed!(put_u16, u16, put_u16, put_u16_le);
    write_fixed!(put_i16, i16, put_i16, put_i16_le);
    write_fixed!(put_u32, u32, put_u32, put_u32_le);
    write_fixed!(put_i32, i32, put_i32, put_i32_le);
    write_fixed!(put_u64, u64, put_u64, put_u64_le);
    write_fixed!(put_i64, i64, put_i64, put_i64_le);
    write_fixed!(put_f32, f32, put_f32, put_f32_le);
    write_fixed!(put_f64, f64, put_f64, put_f64_le);

    /// Writes a length or element count as `i32`.
    pub fn put_len(&mut self, len: usize) -> Result<(), ProtocolError> {
        if len > MAX_FIELD_LEN {
            return Err(ProtocolError::TooLarge {
                len,
                max: MAX_FIELD_LEN,
            });
        }
        // MAX_FIELD_LEN fits in i32.
        self.put_i32(len as i32);
        Ok(())
    }

    /// Writes a string with its length prefix (always present, even when empty).
    pub fn put_string(&mut self, value: &str) -> Result<(), ProtocolError> {
        self.put_len(value.len())?;
        self.dst.extend_from_slice(value.as_bytes());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reader(bytes: &[u8], order: ByteOrder) -> FrameReader<&[u8]> {
        FrameReader::new(bytes, order)
    }

    #[test]
    fn byte_order_parses_aliases() {
        assert_eq!("LE".parse::<ByteOrder>(), Ok(ByteOrder::Little));
        assert_eq!("big".parse::<ByteOrder>(), Ok(ByteOrder::Big));
        assert_eq!("native".parse::<ByteOrder>(), Ok(ByteOrder::Native));
        assert!("middle".parse::<ByteOrder>().is_err());
    }

    #[test]
    fn native_matches_target() {
        assert_eq!(
            ByteOrder::Native.is_little_endian(),
            cfg!(target_endian = "little")
        );
    }

    #[test]
    fn string_writes_length_prefix_little_endian() {
        let mut buf = BytesMut::new();
        let mut w = FrameWriter::new(&mut buf, ByteOrder::Little);
        w.put_string("hi").unwrap();
        w.put_string("").unwrap();
        insta::assert_snapshot!(hex(&buf), @"02 00 00 00 68 69 00 00 00 00");
    }

    #[test]
    fn integers_follow_big_endian_order() {
        let mut buf = BytesMut::new();
        let mut w = FrameWriter::new(&mut buf, ByteOrder::Big);
        w.put_i32(1);
        w.put_u16(0x0102);
        insta::assert_snapshot!(hex(&buf), @"00 00 00 01 01 02");
    }

    #[tokio::test]
    async fn reads_what_was_written() {
        for order in [ByteOrder::Little, ByteOrder::Big] {
            let mut buf = BytesMut::new();
            let mut w = FrameWriter::new(&mut buf, order);
            w.put_i32(-42);
            w.put_u64(u64::MAX - 1);
            w.put_f64(2.5);
            w.put_string("héllo").unwrap();

            let mut r = reader(&buf, order);
            assert_eq!(r.read_i32().await.unwrap(), -42);
            assert_eq!(r.read_u64().await.unwrap(), u64::MAX - 1);
            assert_eq!(r.read_f64().await.unwrap(), 2.5);
            assert_eq!(r.read_string().await.unwrap(), "héllo");
        }
    }

    #[tokio::test]
    async fn empty_string_reads_no_payload() {
        let bytes = [0, 0, 0, 0, 0xAA];
        let mut r = reader(&bytes, ByteOrder::Little);
        assert_eq!(r.read_string().await.unwrap(), "");
        assert_eq!(r.read_u8().await.unwrap(), 0xAA);
    }

    #[tokio::test]
    async fn clean_eof_is_not_an_error() {
        let mut r = reader(&[], ByteOrder::Little);
        assert_eq!(r.read_u8_or_eof().await.unwrap(), None);
    }

    #[tokio::test]
    async fn short_integer_is_truncated() {
        let mut r = reader(&[1, 0], ByteOrder::Little);
        assert!(matches!(
            r.read_i32().await,
            Err(ProtocolError::Truncated)
        ));
    }

    #[tokio::test]
    async fn short_string_payload_is_truncated() {
        let mut r = reader(&[5, 0, 0, 0, b'a', b'b'], ByteOrder::Little);
        assert!(matches!(
            r.read_string().await,
            Err(ProtocolError::Truncated)
        ));
    }

    #[tokio::test]
    async fn negative_length_is_rejected() {
        let bytes = (-1i32).to_le_bytes();
        let mut r = reader(&bytes, ByteOrder::Little);
        assert!(matches!(
            r.read_string().await,
            Err(ProtocolError::NegativeLength(-1))
        ));
    }

    #[tokio::test]
    async fn oversized_length_is_rejected() {
        let bytes = i32::MAX.to_le_bytes();
        let mut r = reader(&bytes, ByteOrder::Little);
        assert!(matches!(
            r.read_len().await,
            Err(ProtocolError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn invalid_utf8_is_rejected() {
        let bytes = [2, 0, 0, 0, 0xC3, 0x28];
        let mut r = reader(&bytes, ByteOrder::Little);
        assert!(matches!(
            r.read_string().await,
            Err(ProtocolError::InvalidUtf8(_))
        ));
    }
}
