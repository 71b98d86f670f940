//! # Length-Prefixed Frames
//!
//! ```text
//! {i32 little-endian L}{L payload bytes}{i32 L}{payload}...
//! ```
//!
//! `L` counts payload bytes only; the 4-byte header is not included. A zero
//! length is a valid, empty frame.
//!
//! [`FrameCodec`] reassembles frames from arbitrarily fragmented input: feed
//! it a growing `BytesMut` and call `decode` until it yields `None`. Consumed
//! bytes are split off the front of the buffer, so leftover partial data stays
//! in place for the next read.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use eclipse_core::{EclipseError, Result};
use tokio_util::codec::{Decoder, Encoder};

/// Size of the frame length header
pub const FRAME_HEADER_LEN: usize = 4;

/// Largest payload accepted when no explicit limit is configured (16 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Decoder/encoder for `[i32 LE length][payload]` frames
#[derive(Debug, Clone, Copy)]
pub struct FrameCodec {
    max_frame_size: usize,
}

impl Default for FrameCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl FrameCodec {
    /// Create a codec that rejects payloads larger than `max_frame_size`
    pub fn new(max_frame_size: usize) -> Self {
        Self { max_frame_size }
    }

    pub fn max_frame_size(&self) -> usize {
        self.max_frame_size
    }

    fn check_len(&self, len: usize) -> Result<()> {
        if len > self.max_frame_size {
            return Err(EclipseError::FrameTooLarge { size: len, max: self.max_frame_size });
        }
        Ok(())
    }
}

impl Decoder for FrameCodec {
    type Item = Bytes;
    type Error = EclipseError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Bytes>> {
        if src.len() < FRAME_HEADER_LEN {
            return Ok(None);
        }

        let declared = i32::from_le_bytes([src[0], src[1], src[2], src[3]]);
        let len = usize::try_from(declared)
            .map_err(|_| EclipseError::InvalidData(format!("Negative frame length {}", declared)))?;
        self.check_len(len)?;

        let needed = FRAME_HEADER_LEN + len;
        if src.len() < needed {
            // Incomplete; make room for the rest of the frame
            src.reserve(needed - src.len());
            return Ok(None);
        }

        src.advance(FRAME_HEADER_LEN);
        let payload = src.split_to(len).freeze();
        tracing::trace!("Decoded frame of {} bytes ({} bytes buffered)", len, src.len());
        Ok(Some(payload))
    }
}

impl Encoder<Bytes> for FrameCodec {
    type Error = EclipseError;

    fn encode(&mut self, payload: Bytes, dst: &mut BytesMut) -> Result<()> {
        <Self as Encoder<&[u8]>>::encode(self, &payload[..], dst)
    }
}

impl<'a> Encoder<&'a [u8]> for FrameCodec {
    type Error = EclipseError;

    fn encode(&mut self, payload: &'a [u8], dst: &mut BytesMut) -> Result<()> {
        self.check_len(payload.len())?;
        let len = frame_len(payload.len())?;
        dst.reserve(FRAME_HEADER_LEN + payload.len());
        dst.put_i32_le(len);
        dst.put_slice(payload);
        Ok(())
    }
}

/// Length header for a payload of `len` bytes
///
/// # Errors
/// `FrameTooLarge` if `len` does not fit the i32 header
pub fn frame_len(len: usize) -> Result<i32> {
    i32::try_from(len).map_err(|_| EclipseError::FrameTooLarge { size: len, max: i32::MAX as usize })
}

/// Wrap `payload` in a frame header without a configured size limit
///
/// # Errors
/// `FrameTooLarge` if the payload is longer than `i32::MAX` bytes
pub fn encode_frame(payload: &[u8]) -> Result<Bytes> {
    let len = frame_len(payload.len())?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_i32_le(len);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_all(codec: &mut FrameCodec, buf: &mut BytesMut) -> Vec<Bytes> {
        let mut frames = Vec::new();
        while let Some(frame) = codec.decode(buf).unwrap() {
            frames.push(frame);
        }
        frames
    }

    fn wire(payloads: &[&[u8]]) -> Vec<u8> {
        payloads.iter().flat_map(|p| encode_frame(p).unwrap().to_vec()).collect()
    }

    #[test]
    fn test_split_header_waits_for_payload() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();

        buf.extend_from_slice(&[0x03, 0, 0, 0]);
        assert!(decode_all(&mut codec, &mut buf).is_empty());

        buf.extend_from_slice(b"abc");
        let frames = decode_all(&mut codec, &mut buf);
        assert_eq!(frames, vec![Bytes::from_static(b"abc")]);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_one_byte_at_a_time() {
        let big = [0u8; 300];
        let payloads: Vec<&[u8]> = vec![&b"first"[..], &b""[..], &b"third frame"[..], &big[..]];
        let bytes = wire(&payloads);

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        for byte in bytes {
            buf.put_u8(byte);
            frames.extend(decode_all(&mut codec, &mut buf));
        }

        let expected: Vec<Bytes> = payloads.iter().map(|p| Bytes::copy_from_slice(p)).collect();
        assert_eq!(frames, expected);
    }

    #[test]
    fn test_many_frames_in_one_chunk_with_trailing_partial() {
        let mut bytes = wire(&[&b"a"[..], &b"bb"[..], &b"ccc"[..]]);
        bytes.extend_from_slice(&[5, 0, 0, 0, b'd']);

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&bytes[..]);
        let frames = decode_all(&mut codec, &mut buf);

        assert_eq!(frames.len(), 3);
        assert_eq!(&frames[2][..], b"ccc");
        // Partial frame remains buffered
        assert_eq!(&buf[..], &[5, 0, 0, 0, b'd']);
    }

    #[test]
    fn test_irregular_chunking_preserves_order() {
        let payloads: Vec<Vec<u8>> = (0..50u8).map(|i| vec![i; (i as usize * 7) % 33]).collect();
        let refs: Vec<&[u8]> = payloads.iter().map(|p| p.as_slice()).collect();
        let bytes = wire(&refs);

        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::new();
        let mut frames = Vec::new();
        let mut pos = 0;
        let mut step = 1;
        while pos < bytes.len() {
            let end = (pos + step).min(bytes.len());
            buf.extend_from_slice(&bytes[pos..end]);
            frames.extend(decode_all(&mut codec, &mut buf));
            pos = end;
            step = step % 13 + 3;
        }

        let decoded: Vec<Vec<u8>> = frames.iter().map(|f| f.to_vec()).collect();
        assert_eq!(decoded, payloads);
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let mut codec = FrameCodec::new(8);
        let mut buf = BytesMut::from(&[9u8, 0, 0, 0][..]);
        assert!(matches!(
            codec.decode(&mut buf),
            Err(EclipseError::FrameTooLarge { size: 9, max: 8 })
        ));
    }

    #[test]
    fn test_negative_length_rejected() {
        let mut codec = FrameCodec::default();
        let mut buf = BytesMut::from(&(-1i32).to_le_bytes()[..]);
        assert!(matches!(codec.decode(&mut buf), Err(EclipseError::InvalidData(_))));
    }

    #[test]
    fn test_encoder_matches_encode_frame() {
        let mut codec = FrameCodec::default();
        let mut dst = BytesMut::new();
        codec.encode(Bytes::from_static(b"xyz"), &mut dst).unwrap();
        assert_eq!(&dst[..], &encode_frame(b"xyz").unwrap()[..]);

        let mut small = FrameCodec::new(2);
        assert!(small.encode(&b"xyz"[..], &mut dst).is_err());
    }

    #[test]
    fn test_frame_len_rejects_unrepresentable_lengths() {
        assert_eq!(frame_len(0).unwrap(), 0);
        assert_eq!(frame_len(i32::MAX as usize).unwrap(), i32::MAX);
        assert!(matches!(
            frame_len(i32::MAX as usize + 1),
            Err(EclipseError::FrameTooLarge { max, .. }) if max == i32::MAX as usize
        ));
    }
}
