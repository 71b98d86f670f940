//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Session index (assigned at accept time, never reused while the server lives)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u32);

impl SessionId {
    pub const fn new(id: u32) -> Self {
        Self(id)
    }

    pub fn get(&self) -> u32 {
        self.0
    }
}

impl From<u32> for SessionId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How inbound bytes are turned into received-data events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FramingMode {
    /// `[i32 LE length][payload]` frames, reassembled across reads
    #[default]
    Framed,
    /// Every completed read is surfaced verbatim
    Raw,
}

impl FramingMode {
    pub fn from_str_opt(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "framed" | "packets" | "true" => Some(Self::Framed),
            "raw" | "false" => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Framed => "framed",
            Self::Raw => "raw",
        }
    }

    pub fn is_framed(&self) -> bool {
        matches!(self, Self::Framed)
    }
}
