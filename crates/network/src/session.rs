//! # Session Management
//!
//! A [`Session`] is the server-side state of one accepted connection.
//!
//! # Architecture
//!
//! Each session has:
//! - a receive side: a [`FrameAssembler`] that turns partial reads into
//!   complete frames (or passes raw reads through)
//! - a send side: an [`OutboundQueue`] drained into pooled send contexts, and
//!   a send guard that allows one in-flight send chain at a time
//! - byte and frame counters
//!
//! # Lifecycle
//!
//! ```text
//! accepted → receiving ⇄ sending → closed
//!                 ↓
//!    EOF / socket error / timeout / bad frame / server close
//! ```
//!
//! The session never destroys itself. Faults only cancel its shutdown token;
//! the server's receive task observes that and performs the teardown.

use crate::config::ServerConfig;
use crate::context::IoContext;
use crate::server::Shared;
use bytes::{Bytes, BytesMut};
use eclipse_core::{EclipseError, FramingMode, Result, SessionId};
use eclipse_protocol::{encode_frame, FrameCodec};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex as TokioMutex, Semaphore};
use tokio_util::codec::Decoder;
use tokio_util::sync::CancellationToken;

/// Why a session was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Closed for reasons not otherwise classified
    Unknown,

    /// The server was closed
    ServerShutdown,

    /// The peer closed the connection (zero-byte read)
    RemotelyClosed,

    /// A read or write failed at the transport level
    SocketError,

    /// The peer declared a frame larger than the configured maximum
    FrameTooLarge,

    /// The peer sent a malformed frame header
    ProtocolError,

    /// A receive or send did not complete within its timeout
    TimedOut,
}

impl CloseReason {
    /// Classify a session-local error
    pub fn from_error(err: &EclipseError) -> Self {
        match err {
            EclipseError::FrameTooLarge { .. } => Self::FrameTooLarge,
            EclipseError::InvalidData(_) => Self::ProtocolError,
            e if e.is_timeout() => Self::TimedOut,
            EclipseError::SocketFault(_) => Self::SocketError,
            _ => Self::Unknown,
        }
    }
}

/// Receive-side reassembly state
///
/// # Framed Mode
/// Incoming bytes are appended to a reassembly buffer. Complete frames are
/// split off the front and queued; a trailing partial frame stays buffered
/// until more data arrives.
///
/// # Raw Mode
/// Each read is queued verbatim as one item, with no reassembly.
#[derive(Debug)]
pub struct FrameAssembler {
    mode: FramingMode,
    codec: FrameCodec,
    buffer: BytesMut,
    received: VecDeque<Bytes>,
}

impl FrameAssembler {
    pub fn new(mode: FramingMode, max_frame_size: usize) -> Self {
        Self {
            mode,
            codec: FrameCodec::new(max_frame_size),
            buffer: BytesMut::new(),
            received: VecDeque::new(),
        }
    }

    /// Feed one completed read
    ///
    /// # Returns
    /// The number of items queued by this read
    ///
    /// # Errors
    /// `FrameTooLarge` or `InvalidData` if a frame header is unacceptable.
    /// Frames completed before the bad header stay queued.
    pub fn process_receive(&mut self, data: &[u8]) -> Result<usize> {
        match self.mode {
            FramingMode::Raw => Ok(self.process_receive_raw(data)),
            FramingMode::Framed => {
                self.buffer.extend_from_slice(data);
                let mut completed = 0;
                while let Some(frame) = self.codec.decode(&mut self.buffer)? {
                    self.received.push_back(frame);
                    completed += 1;
                }
                Ok(completed)
            }
        }
    }

    /// Queue `data` as one item with no framing
    pub fn process_receive_raw(&mut self, data: &[u8]) -> usize {
        self.received.push_back(Bytes::copy_from_slice(data));
        1
    }

    /// Next completed item, in arrival order
    pub fn dequeue(&mut self) -> Option<Bytes> {
        self.received.pop_front()
    }

    pub fn has_frames(&self) -> bool {
        !self.received.is_empty()
    }

    /// Bytes of an incomplete frame waiting for more data
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Send-side queue
///
/// Payloads wait in FIFO order. The front payload becomes the active buffer and
/// is copied into pooled send contexts one segment at a time, so a payload
/// larger than a segment produces a chain of sends.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    queue: VecDeque<Bytes>,
    active: Bytes,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a payload; empty payloads are skipped
    pub fn enqueue(&mut self, payload: Bytes) {
        if !payload.is_empty() {
            self.queue.push_back(payload);
        }
    }

    /// Whether the active buffer or the queue still holds data
    pub fn has_pending(&self) -> bool {
        !self.active.is_empty() || !self.queue.is_empty()
    }

    pub fn pending_bytes(&self) -> usize {
        self.active.len() + self.queue.iter().map(Bytes::len).sum::<usize>()
    }

    /// Load the next piece of outbound data into `context`
    ///
    /// # Process
    /// 1. If the active buffer is empty, dequeue the next payload into it
    /// 2. If it fits the context's segment, copy it whole and clear it
    /// 3. Otherwise copy one segment's worth and keep the rest active
    ///
    /// # Returns
    /// Bytes loaded into the context (0 when nothing is pending)
    pub fn process_send(&mut self, context: &mut IoContext) -> usize {
        if self.active.is_empty() {
            match self.queue.pop_front() {
                Some(next) => self.active = next,
                None => {
                    context.set_count(0);
                    return 0;
                }
            }
        }

        if self.active.len() <= context.capacity() {
            let loaded = context.fill_from(&self.active);
            self.active = Bytes::new();
            loaded
        } else {
            let chunk = self.active.split_to(context.capacity());
            context.fill_from(&chunk)
        }
    }

    /// Drop everything pending, returning the discarded byte count
    pub fn clear(&mut self) -> usize {
        let discarded = self.pending_bytes();
        self.queue.clear();
        self.active = Bytes::new();
        discarded
    }
}

/// One accepted connection
///
/// # Thread Safety
/// All methods take `&self`; the receive task, send chains and application
/// code share the session through an `Arc`.
///
/// # Example
///
/// ```rust,no_run
/// # async fn demo(session: std::sync::Arc<eclipse_network::Session>) -> eclipse_core::Result<()> {
/// session.send_frame(b"welcome").await?;
/// println!("session {} from {}", session.id(), session.peer_addr());
/// # Ok(())
/// # }
/// ```
pub struct Session {
    id: SessionId,
    peer_addr: SocketAddr,
    framing: FramingMode,
    connected_at: Instant,

    /// Write half of the socket; `None` once the session is retired
    pub(crate) writer: TokioMutex<Option<OwnedWriteHalf>>,

    assembler: Mutex<FrameAssembler>,
    outbound: Mutex<OutboundQueue>,

    /// Send guard: one permit, held for the whole of a send chain
    pub(crate) send_guard: Arc<Semaphore>,

    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    frames_received: AtomicU64,

    /// Cancelled when the session must close
    pub(crate) shutdown: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,

    server: Weak<Shared>,
}

impl Session {
    pub(crate) fn new(
        id: SessionId,
        peer_addr: SocketAddr,
        writer: OwnedWriteHalf,
        config: &ServerConfig,
        shutdown: CancellationToken,
        server: Weak<Shared>,
    ) -> Self {
        tracing::debug!("New session {}: {}", id, peer_addr);

        Self {
            id,
            peer_addr,
            framing: config.framing,
            connected_at: Instant::now(),
            writer: TokioMutex::new(Some(writer)),
            assembler: Mutex::new(FrameAssembler::new(config.framing, config.max_frame_size)),
            outbound: Mutex::new(OutboundQueue::new()),
            send_guard: Arc::new(Semaphore::new(1)),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            frames_received: AtomicU64::new(0),
            shutdown,
            close_reason: Mutex::new(None),
            server,
        }
    }

    /// Send raw bytes to this session's peer
    ///
    /// Waits while a previous send chain on this session is still draining.
    pub async fn send_bytes(self: &Arc<Self>, payload: impl Into<Bytes>) -> Result<()> {
        let server = self.server.upgrade().ok_or(EclipseError::SessionClosed(self.id.get()))?;
        server.send_grouped(self, vec![payload.into()]).await
    }

    /// Send `payload` wrapped in a `[i32 LE length]` frame header
    pub async fn send_frame(self: &Arc<Self>, payload: &[u8]) -> Result<()> {
        self.send_bytes(encode_frame(payload)?).await
    }

    /// Wait until no send chain is in flight
    pub async fn flush(&self) -> Result<()> {
        let _permit = self
            .send_guard
            .acquire()
            .await
            .map_err(|_| EclipseError::SessionClosed(self.id.get()))?;
        Ok(())
    }

    // === Receive side ===

    /// Run one completed read through reassembly (or raw pass-through)
    pub(crate) fn process_receive(&self, data: &[u8]) -> Result<usize> {
        self.bytes_received.fetch_add(data.len() as u64, Ordering::Relaxed);
        let completed = self.assembler.lock().process_receive(data);
        if let Ok(count) = completed {
            self.frames_received.fetch_add(count as u64, Ordering::Relaxed);
        }
        completed
    }

    pub(crate) fn dequeue_received(&self) -> Option<Bytes> {
        self.assembler.lock().dequeue()
    }

    // === Send side ===

    pub(crate) fn enqueue<I>(&self, payloads: I)
    where
        I: IntoIterator<Item = Bytes>,
    {
        let mut outbound = self.outbound.lock();
        for payload in payloads {
            outbound.enqueue(payload);
        }
    }

    pub(crate) fn process_send(&self, context: &mut IoContext) -> usize {
        self.outbound.lock().process_send(context)
    }

    pub(crate) fn record_sent(&self, bytes: usize) {
        self.bytes_sent.fetch_add(bytes as u64, Ordering::Relaxed);
    }

    pub(crate) fn discard_outbound(&self) -> usize {
        self.outbound.lock().clear()
    }

    /// Whether outbound data is still waiting to be written
    pub fn has_pending_send(&self) -> bool {
        self.outbound.lock().has_pending()
    }

    // === Shutdown ===

    /// Request that the session close
    ///
    /// The first reason recorded wins. Teardown happens in the server's
    /// receive task, not here.
    pub(crate) fn abort(&self, reason: CloseReason) {
        {
            let mut slot = self.close_reason.lock();
            if slot.is_none() {
                *slot = Some(reason);
            }
        }
        self.shutdown.cancel();
    }

    /// Reason recorded for a cancelled session
    ///
    /// Sessions cancelled through the server's shutdown token carry no
    /// explicit reason and report `ServerShutdown`.
    pub(crate) fn abort_reason(&self) -> CloseReason {
        self.close_reason.lock().unwrap_or(CloseReason::ServerShutdown)
    }

    /// Stop all send activity and shut the socket down
    ///
    /// Waits for an in-flight send chain to notice cancellation and release
    /// the send guard, then closes the guard so later sends fail fast.
    /// Shutdown errors are ignored; the socket is being discarded.
    pub(crate) async fn retire(&self) {
        let permit = self.send_guard.acquire().await;
        self.send_guard.close();
        drop(permit);

        let discarded = self.discard_outbound();
        if discarded > 0 {
            tracing::debug!("Session {} discarded {} unsent bytes", self.id, discarded);
        }

        let writer = self.writer.lock().await.take();
        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                tracing::trace!("Session {} shutdown ignored: {}", self.id, e);
            }
        }
    }

    // === Getters ===

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn framing(&self) -> FramingMode {
        self.framing
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Frames (or raw reads) surfaced to the application
    pub fn frames_received(&self) -> u64 {
        self.frames_received.load(Ordering::Relaxed)
    }

    pub fn uptime(&self) -> Duration {
        self.connected_at.elapsed()
    }

    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Reason the session closed, if it has
    pub fn close_reason(&self) -> Option<CloseReason> {
        if self.is_closed() {
            Some(self.abort_reason())
        } else {
            None
        }
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("peer_addr", &self.peer_addr)
            .field("framing", &self.framing)
            .field("closed", &self.is_closed())
            .finish()
    }
}
