//! # Eclipse2D Protocol Library
//!
//! Binary building blocks shared by the network server and the applications
//! that talk to it.
//!
//! ## Architecture
//!
//! ### 1. Frames ([`framing`])
//! Every application packet travels as
//!
//! ```text
//! [i32 little-endian payload length][payload bytes]
//! ```
//!
//! [`FrameCodec`] implements `tokio_util`'s `Decoder`/`Encoder` for this
//! format and enforces a maximum payload size.
//!
//! ### 2. Primitives ([`writer`], [`reader`])
//! [`PacketWriter`] appends fixed-width little-endian integers, booleans and
//! length-prefixed strings. [`PacketReader`] is the matching decoder.
//!
//! ### 3. Text ([`encoding`])
//! Strings are written in a configurable [`TextEncoding`]; the default is
//! UTF-16 little-endian (two bytes per code unit).
//!
//! ## Usage Example
//!
//! ```rust
//! use eclipse_protocol::{PacketReader, PacketWriter};
//!
//! let mut writer = PacketWriter::new();
//! writer.write_i32(7);
//! writer.write_string("hello").unwrap();
//!
//! let mut reader = PacketReader::new(writer.to_buffer());
//! assert_eq!(reader.read_i32().unwrap(), 7);
//! assert_eq!(reader.read_string().unwrap(), "hello");
//! ```

pub mod encoding;
pub mod framing;
pub mod reader;
pub mod writer;

// Re-export commonly used items
pub use encoding::TextEncoding;
pub use framing::{encode_frame, frame_len, FrameCodec, DEFAULT_MAX_FRAME_SIZE, FRAME_HEADER_LEN};
pub use reader::PacketReader;
pub use writer::PacketWriter;
