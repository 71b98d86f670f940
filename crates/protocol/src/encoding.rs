//! String encodings supported by the packet writer and reader

use eclipse_core::{EclipseError, Result};

/// Text encoding used for length-prefixed strings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TextEncoding {
    /// UTF-16, little-endian code units (2 bytes per code unit)
    #[default]
    Utf16Le,
    /// UTF-16, big-endian code units
    Utf16Be,
    Utf8,
}

impl TextEncoding {
    /// Number of bytes `value` occupies once encoded (not the character count)
    pub fn byte_count(&self, value: &str) -> usize {
        match self {
            Self::Utf8 => value.len(),
            Self::Utf16Le | Self::Utf16Be => value.encode_utf16().count() * 2,
        }
    }

    /// Append the encoded form of `value` to `out`
    pub fn encode_into(&self, value: &str, out: &mut Vec<u8>) {
        match self {
            Self::Utf8 => out.extend_from_slice(value.as_bytes()),
            Self::Utf16Le => {
                for unit in value.encode_utf16() {
                    out.extend_from_slice(&unit.to_le_bytes());
                }
            }
            Self::Utf16Be => {
                for unit in value.encode_utf16() {
                    out.extend_from_slice(&unit.to_be_bytes());
                }
            }
        }
    }

    /// Decode `bytes` back into a string
    pub fn decode(&self, bytes: &[u8]) -> Result<String> {
        match self {
            Self::Utf8 => String::from_utf8(bytes.to_vec())
                .map_err(|e| EclipseError::InvalidData(format!("Invalid UTF-8: {}", e))),
            Self::Utf16Le | Self::Utf16Be => {
                if bytes.len() % 2 != 0 {
                    return Err(EclipseError::InvalidData(format!(
                        "UTF-16 string has odd byte length {}",
                        bytes.len()
                    )));
                }
                let units: Vec<u16> = bytes
                    .chunks_exact(2)
                    .map(|pair| match self {
                        Self::Utf16Be => u16::from_be_bytes([pair[0], pair[1]]),
                        _ => u16::from_le_bytes([pair[0], pair[1]]),
                    })
                    .collect();
                String::from_utf16(&units)
                    .map_err(|e| EclipseError::InvalidData(format!("Invalid UTF-16: {}", e)))
            }
        }
    }
}
