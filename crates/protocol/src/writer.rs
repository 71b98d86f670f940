//! # Packet Writer
//!
//! Builds a packet payload field by field.
//!
//! ## Format
//!
//! | write            | bytes                                          |
//! |------------------|------------------------------------------------|
//! | `write_byte`     | 1                                              |
//! | `write_i16`      | 2, little-endian                               |
//! | `write_i32`      | 4, little-endian                               |
//! | `write_i64`      | 8, little-endian                               |
//! | `write_bool`     | 1 (`0x01` / `0x00`)                            |
//! | `write_string`   | i32 LE byte count, then the encoded bytes      |
//!
//! The backing buffer grows by exactly the number of bytes each write needs.

use crate::encoding::TextEncoding;
use crate::framing::encode_frame;
use bytes::{BufMut, Bytes};
use eclipse_core::{EclipseError, Result};

/// Incremental little-endian packet builder
///
/// # Example
///
/// ```rust
/// use eclipse_protocol::PacketWriter;
///
/// let mut writer = PacketWriter::new();
/// writer.write_byte(1);
/// writer.write_bool(true);
/// assert_eq!(&writer.to_buffer()[..], &[1, 1]);
/// ```
#[derive(Debug, Clone, Default)]
pub struct PacketWriter {
    buf: Vec<u8>,
    encoding: TextEncoding,
}

impl PacketWriter {
    /// Create an empty writer using the default (UTF-16 LE) string encoding
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty writer that encodes strings with `encoding`
    pub fn with_encoding(encoding: TextEncoding) -> Self {
        Self { buf: Vec::new(), encoding }
    }

    /// Continue writing after the bytes already in `buf`
    pub fn from_buffer(buf: Vec<u8>, encoding: TextEncoding) -> Self {
        Self { buf, encoding }
    }

    pub fn encoding(&self) -> TextEncoding {
        self.encoding
    }

    /// Grow-to-fit: reserve exactly the bytes the next write needs
    #[inline]
    fn grow(&mut self, additional: usize) {
        self.buf.reserve_exact(additional);
    }

    #[inline]
    pub fn write_byte(&mut self, value: u8) {
        self.grow(1);
        self.buf.put_u8(value);
    }

    #[inline]
    pub fn write_i16(&mut self, value: i16) {
        self.grow(2);
        self.buf.put_i16_le(value);
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        self.grow(4);
        self.buf.put_i32_le(value);
    }

    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        self.grow(8);
        self.buf.put_i64_le(value);
    }

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.grow(1);
        self.buf.put_u8(u8::from(value));
    }

    /// Write a length-prefixed string
    ///
    /// The prefix is the encoded byte count. An empty string writes only the
    /// four prefix bytes.
    ///
    /// # Errors
    /// `InvalidData` if the encoding is longer than `i32::MAX` bytes. Nothing
    /// is written in that case.
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let count = self.encoding.byte_count(value);
        let prefix = string_prefix(count)?;
        self.write_i32(prefix);

        if count > 0 {
            self.grow(count);
            self.encoding.encode_into(value, &mut self.buf);
        }
        Ok(())
    }

    /// Append raw bytes with no prefix
    pub fn write_bytes(&mut self, data: &[u8]) {
        self.grow(data.len());
        self.buf.put_slice(data);
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn as_slice(&self) -> &[u8] {
        &self.buf
    }

    /// The accumulated bytes
    pub fn to_buffer(&self) -> Bytes {
        Bytes::copy_from_slice(&self.buf)
    }

    /// Consume the writer, returning the accumulated bytes without copying
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.buf)
    }

    /// The accumulated bytes wrapped in a `[i32 LE length]` frame header
    ///
    /// # Errors
    /// `FrameTooLarge` if more than `i32::MAX` bytes have been written
    pub fn to_frame(&self) -> Result<Bytes> {
        encode_frame(&self.buf)
    }
}

/// Length prefix for a string encoding of `count` bytes
fn string_prefix(count: usize) -> Result<i32> {
    i32::try_from(count)
        .map_err(|_| EclipseError::InvalidData(format!("string of {} bytes exceeds the i32 length prefix", count)))
}
