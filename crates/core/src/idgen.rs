//! Monotonic session index generation

use crate::SessionId;
use std::sync::atomic::{AtomicU32, Ordering};

/// Thread-safe generator of session indices
///
/// The first index handed out is 1. Indices are never reused for the lifetime
/// of the generator, even if the owning server stops and listens again.
#[derive(Debug, Default)]
pub struct IndexGenerator {
    last: AtomicU32,
}

impl IndexGenerator {
    pub fn new() -> Self {
        Self { last: AtomicU32::new(0) }
    }

    /// Get the next session index
    pub fn next_id(&self) -> SessionId {
        SessionId(self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
    }

    /// The most recently issued index, or 0 if none has been issued
    pub fn last_issued(&self) -> u32 {
        self.last.load(Ordering::Relaxed)
    }
}
