//! # Buffer Pool
//!
//! Pre-allocates one contiguous block of `segments * segment_size` bytes and
//! carves it into fixed-size, non-overlapping segments, one per I/O context.
//!
//! ```text
//! backing: [ seg 0 | seg 1 | seg 2 | ... | seg n-1 ]
//!            ^ctx 0  ^ctx 1  ^ctx 2         ^ctx n-1
//! ```
//!
//! Segments are handed out once and never individually freed. A segment
//! belongs to its context for the context's whole lifetime and is reused every
//! time the context goes back to its pool. Each segment is a `BytesMut` split
//! off the same allocation, so contexts own their bytes independently while
//! the memory stays a single block.

use crate::context::IoContext;
use bytes::BytesMut;
use eclipse_core::{EclipseError, Result};

/// Fixed-size segment allocator backed by one contiguous buffer
#[derive(Debug)]
pub struct BufferPool {
    /// Not-yet-assigned tail of the backing block
    unassigned: BytesMut,
    segment_size: usize,
    segments: usize,
    assigned: usize,
}

impl BufferPool {
    /// Allocate the backing block
    ///
    /// # Arguments
    /// * `total_capacity` - Size of the backing block in bytes
    /// * `segment_size` - Size of each segment; any remainder of
    ///   `total_capacity` that does not fill a whole segment is unused
    pub fn allocate(total_capacity: usize, segment_size: usize) -> Result<Self> {
        if segment_size == 0 {
            return Err(EclipseError::Config("segment_size must be > 0".to_string()));
        }

        let segments = total_capacity / segment_size;
        tracing::debug!(
            "Allocating buffer pool: {} segments x {} bytes",
            segments,
            segment_size
        );

        Ok(Self {
            unassigned: BytesMut::zeroed(segments * segment_size),
            segment_size,
            segments,
            assigned: 0,
        })
    }

    /// Bind the next unused segment to `context`
    ///
    /// # Errors
    /// `CapacityExceeded` once every segment has been assigned
    pub fn assign(&mut self, context: &mut IoContext) -> Result<()> {
        if self.assigned == self.segments {
            return Err(EclipseError::CapacityExceeded { segments: self.segments });
        }

        let offset = self.assigned * self.segment_size;
        let segment = self.unassigned.split_to(self.segment_size);
        context.bind_segment(segment, offset);
        self.assigned += 1;
        Ok(())
    }

    pub fn segment_size(&self) -> usize {
        self.segment_size
    }

    /// Total number of segments in the backing block
    pub fn segments(&self) -> usize {
        self.segments
    }

    pub fn assigned(&self) -> usize {
        self.assigned
    }

    pub fn remaining(&self) -> usize {
        self.segments - self.assigned
    }
}
