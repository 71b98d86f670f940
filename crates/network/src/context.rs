//! # I/O Contexts and Context Pools
//!
//! An [`IoContext`] describes one socket operation: which kind it is, the
//! pooled buffer segment it reads into or writes from, how many bytes of that
//! segment are valid, and which session currently holds it.
//!
//! # Ownership
//!
//! Contexts are plain values. Exactly one owner holds each context at a time:
//!
//! ```text
//! ContextPool --pop()--> session task (attach) --push()--> ContextPool
//! ```
//!
//! `pop` moves a context out of the pool, `push` moves it back and clears the
//! session attachment, so a context never re-enters service carrying a stale
//! session reference.
//!
//! # Thread Safety
//!
//! A [`ContextPool`] is a fixed-capacity stack behind a single
//! `parking_lot::Mutex`. Push and pop are O(1) and may be called from any task.

use crate::buffer_pool::BufferPool;
use bytes::BytesMut;
use eclipse_core::{EclipseError, Result, SessionId};
use parking_lot::Mutex;

/// Slot index of a context within its pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextId(pub usize);

/// Socket operation a context is dedicated to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoKind {
    Receive,
    Send,
}

/// Reusable descriptor for one socket operation
#[derive(Debug)]
pub struct IoContext {
    id: ContextId,
    kind: IoKind,
    /// Pooled segment; its length is the context's fixed capacity
    buffer: BytesMut,
    /// Offset of the segment within the pool's backing block
    offset: usize,
    /// Valid bytes at the front of `buffer` for the current operation
    count: usize,
    /// Session currently holding this context
    token: Option<SessionId>,
}

impl IoContext {
    /// Create a context with no buffer; bind one with [`BufferPool::assign`]
    pub fn new(id: ContextId, kind: IoKind) -> Self {
        Self {
            id,
            kind,
            buffer: BytesMut::new(),
            offset: 0,
            count: 0,
            token: None,
        }
    }

    pub(crate) fn bind_segment(&mut self, segment: BytesMut, offset: usize) {
        self.buffer = segment;
        self.offset = offset;
        self.count = 0;
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn kind(&self) -> IoKind {
        self.kind
    }

    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Size of the bound segment
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Attach the session that now owns this context
    pub fn attach(&mut self, session: SessionId) {
        self.token = Some(session);
    }

    /// Clear the session attachment, returning the previous one
    pub fn detach(&mut self) -> Option<SessionId> {
        self.count = 0;
        self.token.take()
    }

    pub fn token(&self) -> Option<SessionId> {
        self.token
    }

    /// The whole segment, for a read to fill
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.buffer[..]
    }

    /// Record how many bytes the last operation transferred
    pub fn set_count(&mut self, count: usize) {
        debug_assert!(count <= self.buffer.len());
        self.count = count.min(self.buffer.len());
    }

    /// Bytes transferred by the last operation
    pub fn count(&self) -> usize {
        self.count
    }

    /// The valid bytes of the segment
    pub fn filled(&self) -> &[u8] {
        &self.buffer[..self.count]
    }

    /// Copy as much of `data` as fits into the segment
    ///
    /// # Returns
    /// The number of bytes copied, which becomes the context's count
    pub fn fill_from(&mut self, data: &[u8]) -> usize {
        let len = data.len().min(self.buffer.len());
        self.buffer[..len].copy_from_slice(&data[..len]);
        self.count = len;
        len
    }
}

/// Fixed-capacity, thread-safe stack of I/O contexts of one kind
#[derive(Debug)]
pub struct ContextPool {
    kind: IoKind,
    capacity: usize,
    stack: Mutex<Vec<IoContext>>,
}

impl ContextPool {
    /// Create an empty pool
    pub fn new(kind: IoKind, capacity: usize) -> Self {
        Self {
            kind,
            capacity,
            stack: Mutex::new(Vec::with_capacity(capacity)),
        }
    }

    /// Create a full pool of `capacity` contexts, each bound to its own
    /// `segment_size` slice of one freshly allocated buffer pool
    pub fn build(kind: IoKind, capacity: usize, segment_size: usize) -> Result<Self> {
        let total = capacity.checked_mul(segment_size).ok_or_else(|| {
            EclipseError::Config(format!("{} x {} byte pool overflows", capacity, segment_size))
        })?;
        let mut buffers = BufferPool::allocate(total, segment_size)?;
        let pool = Self::new(kind, capacity);

        for slot in 0..capacity {
            let mut context = IoContext::new(ContextId(slot), kind);
            buffers.assign(&mut context)?;
            pool.push(context)?;
        }

        tracing::debug!("{:?} context pool ready: {} contexts", kind, capacity);
        Ok(pool)
    }

    /// Return a context to the pool
    ///
    /// The session attachment is cleared on the way in.
    ///
    /// # Errors
    /// - `InvalidState` if the context belongs to the other kind of pool
    /// - `InvalidState` if the pool is already full (double return)
    pub fn push(&self, mut context: IoContext) -> Result<()> {
        if context.kind != self.kind {
            return Err(EclipseError::InvalidState(format!(
                "{:?} context {} returned to {:?} pool",
                context.kind, context.id.0, self.kind
            )));
        }
        context.detach();

        let mut stack = self.stack.lock();
        if stack.len() >= self.capacity {
            return Err(EclipseError::InvalidState(format!(
                "{:?} pool already holds all {} contexts",
                self.kind, self.capacity
            )));
        }
        stack.push(context);
        Ok(())
    }

    /// Take a context out of the pool
    ///
    /// # Errors
    /// `PoolExhausted` if no context is available. With admission control
    /// sized to the pool this indicates a bug, not load.
    pub fn pop(&self) -> Result<IoContext> {
        self.stack.lock().pop().ok_or_else(|| {
            EclipseError::PoolExhausted(format!("no {:?} contexts available", self.kind))
        })
    }

    /// Contexts currently in the pool
    pub fn available(&self) -> usize {
        self.stack.lock().len()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn kind(&self) -> IoKind {
        self.kind
    }
}
