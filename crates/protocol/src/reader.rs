//! Packet reader, the decode side of [`PacketWriter`](crate::PacketWriter)

use crate::encoding::TextEncoding;
use bytes::{Buf, Bytes};
use eclipse_core::{EclipseError, Result};

/// Sequential little-endian field reader over a received payload
#[derive(Debug, Clone)]
pub struct PacketReader {
    buf: Bytes,
    encoding: TextEncoding,
}

impl PacketReader {
    pub fn new(buf: Bytes) -> Self {
        Self::with_encoding(buf, TextEncoding::default())
    }

    pub fn with_encoding(buf: Bytes, encoding: TextEncoding) -> Self {
        Self { buf, encoding }
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    #[inline]
    fn ensure(&self, needed: usize, what: &str) -> Result<()> {
        if self.buf.remaining() < needed {
            return Err(EclipseError::InvalidData(format!(
                "Not enough bytes for {}: need {}, have {}",
                what,
                needed,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        self.ensure(1, "Byte")?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        self.ensure(2, "Int16")?;
        Ok(self.buf.get_i16_le())
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        self.ensure(4, "Int32")?;
        Ok(self.buf.get_i32_le())
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        self.ensure(8, "Int64")?;
        Ok(self.buf.get_i64_le())
    }

    /// Any non-zero byte reads as `true`
    pub fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_byte()? != 0)
    }

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_i32()?;
        let len = usize::try_from(len)
            .map_err(|_| EclipseError::InvalidData(format!("Negative string length {}", len)))?;
        self.ensure(len, "String")?;
        let bytes = self.buf.copy_to_bytes(len);
        self.encoding.decode(&bytes)
    }

    /// Take `len` raw bytes
    pub fn read_bytes(&mut self, len: usize) -> Result<Bytes> {
        self.ensure(len, "Bytes")?;
        Ok(self.buf.copy_to_bytes(len))
    }
}
