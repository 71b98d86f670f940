//! # Network Server
//!
//! This module provides the TCP server that owns the listener, the session
//! registry and the receive/send pipelines.
//!
//! # Architecture
//!
//! ## Components
//!
//! 1. **Accept loop** - One task per listen cycle, gated by the admission semaphore
//! 2. **Session registry** - `DashMap` of session index → session
//! 3. **Context pools** - Pre-allocated receive and send contexts
//! 4. **Receive tasks** - One per session, reads until close or fault
//! 5. **Send chains** - One task per enqueue, serialized by the session's send guard
//!
//! # Admission
//!
//! The accept loop takes an admission permit *before* accepting. The permit
//! travels with the session's receive task and is released after teardown, so
//! the number of registered sessions never exceeds the size of the pools.
//!
//! # Faults
//!
//! - Accept errors close the whole server
//! - Receive/send errors, timeouts and bad frames close only that session
//! - Socket shutdown errors during teardown are swallowed
//!
//! # Example
//!
//! ```rust,no_run
//! use eclipse_network::{NetworkServer, ServerConfig, ServerEvent};
//!
//! #[tokio::main]
//! async fn main() -> eclipse_core::Result<()> {
//!     let (server, mut events) = NetworkServer::new(ServerConfig::default())?;
//!     server.listen(14900)?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let ServerEvent::DataReceived { session, payload } = event {
//!             session.send_frame(&payload).await?;
//!         }
//!     }
//!
//!     server.close().await
//! }
//! ```

use crate::config::ServerConfig;
use crate::context::{ContextPool, IoContext, IoKind};
use crate::events::{EventReceiver, ServerEvent};
use crate::session::{CloseReason, Session};
use bytes::Bytes;
use dashmap::DashMap;
use eclipse_core::{EclipseError, FramingMode, IndexGenerator, Result, SessionId};
use eclipse_protocol::encode_frame;
use socket2::{Domain, Protocol, Socket, Type};
use std::future::Future;
use std::io::ErrorKind;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedReadHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

/// Snapshot of server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub current_connections: usize,
    pub total_accepted: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub receive_contexts_available: usize,
    pub send_contexts_available: usize,
    /// `DataSent` events dropped because the event channel was full
    pub events_dropped: u64,
}

/// Listener lifecycle
enum ListenSlot {
    Stopped,
    Listening(ListenState),
    /// Teardown in progress; listen and close are rejected until it finishes
    Closing,
}

/// State that exists only while listening
struct ListenState {
    local_addr: SocketAddr,
    admission: Arc<Semaphore>,
    /// Parent of every session token from this listen cycle
    shutdown: CancellationToken,
    accept_task: JoinHandle<()>,
}

/// State shared by the server handle, the accept loop and every session task
pub(crate) struct Shared {
    config: ServerConfig,
    receive_pool: ContextPool,
    send_pool: ContextPool,
    sessions: DashMap<SessionId, Arc<Session>>,
    events: mpsc::Sender<ServerEvent>,
    index: IndexGenerator,
    current_connections: AtomicUsize,
    total_accepted: AtomicU64,
    bytes_received: AtomicU64,
    bytes_sent: AtomicU64,
    events_dropped: AtomicU64,
    running: AtomicBool,
    listen: parking_lot::Mutex<ListenSlot>,
    /// Receive tasks and send chains
    tasks: TaskTracker,
}

/// TCP server with pooled buffers and framed sessions
///
/// # Lifecycle
///
/// ```text
/// new() → listen() → ... → close() → listen() → ... → close()
///   Stopped    Listening      Closing → Stopped   ...
/// ```
///
/// A new listen cycle cannot start until the previous close has finished
/// tearing every session down.
///
/// # Thread Safety
///
/// All methods take `&self` and may be called from any task.
///
/// # Drop
///
/// Dropping the server cancels every session of the current listen cycle.
/// Call [`close`](Self::close) to wait for teardown to finish.
pub struct NetworkServer {
    shared: Arc<Shared>,
}

impl NetworkServer {
    /// Create a stopped server and pre-allocate its context pools
    ///
    /// # Returns
    /// The server and the receiving end of its event channel
    ///
    /// # Errors
    /// `Config` if the configuration is invalid
    pub fn new(config: ServerConfig) -> Result<(Self, EventReceiver)> {
        config
            .validate()
            .map_err(|e| EclipseError::Config(format!("Invalid configuration: {}", e)))?;

        if config.max_connections > Semaphore::MAX_PERMITS {
            return Err(EclipseError::Config(format!(
                "max_connections must be <= {}",
                Semaphore::MAX_PERMITS
            )));
        }

        let receive_pool =
            ContextPool::build(IoKind::Receive, config.max_connections, config.buffer_size)?;
        let send_pool = ContextPool::build(IoKind::Send, config.max_connections, config.buffer_size)?;
        let (events, receiver) = mpsc::channel(config.event_capacity);

        tracing::info!(
            "Network server initialized: max_connections={}, buffer_size={}, framing={}",
            config.max_connections,
            config.buffer_size,
            config.framing.as_str()
        );

        let shared = Arc::new(Shared {
            config,
            receive_pool,
            send_pool,
            sessions: DashMap::new(),
            events,
            index: IndexGenerator::new(),
            current_connections: AtomicUsize::new(0),
            total_accepted: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            events_dropped: AtomicU64::new(0),
            running: AtomicBool::new(false),
            listen: parking_lot::Mutex::new(ListenSlot::Stopped),
            tasks: TaskTracker::new(),
        });

        Ok((Self { shared }, receiver))
    }

    /// Listen on every interface, IPv4 and IPv6, with the configured backlog
    ///
    /// Falls back to IPv4 only when the host has no IPv6 support.
    pub fn listen(&self, port: u32) -> Result<SocketAddr> {
        if ipv6_supported() {
            match self.listen_on(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port) {
                Err(EclipseError::SocketFault(e)) if e.kind() == ErrorKind::AddrNotAvailable => {
                    tracing::warn!("IPv6 unavailable ({}), listening on IPv4 only", e);
                }
                result => return result,
            }
        } else {
            tracing::warn!("IPv6 unavailable, listening on IPv4 only");
        }
        self.listen_on(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
    }

    /// Bind `address:port` with the configured backlog and start the accept loop
    pub fn listen_on(&self, address: IpAddr, port: u32) -> Result<SocketAddr> {
        self.listen_with_backlog(address, port, self.shared.config.backlog)
    }

    /// Bind `address:port` and start the accept loop
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Returns
    /// The bound local address (useful with port 0)
    ///
    /// # Errors
    /// - `InvalidPort` if `port` is above 65535
    /// - `InvalidState` if already listening, still closing, or outside a runtime
    /// - `SocketFault` if the socket cannot be bound
    pub fn listen_with_backlog(&self, address: IpAddr, port: u32, backlog: u32) -> Result<SocketAddr> {
        let port = u16::try_from(port).map_err(|_| EclipseError::InvalidPort(port))?;
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| {
            EclipseError::InvalidState("listen must be called within a Tokio runtime".to_string())
        })?;

        let mut slot = self.shared.listen.lock();
        match *slot {
            ListenSlot::Stopped => {}
            ListenSlot::Listening(_) => {
                return Err(EclipseError::InvalidState("server is already listening".to_string()));
            }
            ListenSlot::Closing => {
                return Err(EclipseError::InvalidState("server is still closing".to_string()));
            }
        }

        let listener = bind_listener(SocketAddr::new(address, port), backlog)?;
        let local_addr = listener.local_addr()?;
        let admission = Arc::new(Semaphore::new(self.shared.config.max_connections));
        let shutdown = CancellationToken::new();

        let accept_task = runtime.spawn(accept_loop(
            self.shared.clone(),
            listener,
            admission.clone(),
            shutdown.clone(),
        ));

        self.shared.running.store(true, Ordering::SeqCst);
        *slot = ListenSlot::Listening(ListenState {
            local_addr,
            admission,
            shutdown,
            accept_task,
        });

        tracing::info!("Listening on {} (backlog {})", local_addr, backlog);
        Ok(local_addr)
    }

    /// Hard close: stop accepting and force-close every session
    ///
    /// Pending outbound data is discarded. Each registered session produces
    /// one `SessionDisconnected` event with [`CloseReason::ServerShutdown`],
    /// so the event receiver must keep draining while this runs.
    ///
    /// Teardown runs on its own task, so dropping this future does not leave
    /// the server stuck in the closing state.
    ///
    /// # Errors
    /// `InvalidState` if the server is not listening or is already closing
    pub async fn close(&self) -> Result<()> {
        let state = self.shared.begin_close()?;
        let shared = self.shared.clone();

        tokio::spawn(async move { shared.hard_close(state, true).await })
            .await
            .map_err(|e| EclipseError::InvalidState(format!("close did not finish: {}", e)))
    }

    /// Send raw bytes to a session
    pub async fn send_bytes(&self, session: &Arc<Session>, payload: impl Into<Bytes>) -> Result<()> {
        self.shared.send_grouped(session, vec![payload.into()]).await
    }

    /// Send several payloads as one send chain
    ///
    /// The payloads are written back to back in order, with no other send on
    /// this session interleaved.
    ///
    /// # Errors
    /// - `SessionClosed` if the session is closed or closes while waiting
    /// - `PoolExhausted` if no send context is free (an admission bug)
    pub async fn send_grouped(&self, session: &Arc<Session>, payloads: Vec<Bytes>) -> Result<()> {
        self.shared.send_grouped(session, payloads).await
    }

    /// Send `payload` with a `[i32 LE length]` frame header
    pub async fn send_frame(&self, session: &Arc<Session>, payload: &[u8]) -> Result<()> {
        self.shared.send_grouped(session, vec![encode_frame(payload)?]).await
    }

    /// Send raw bytes to a session looked up by index
    pub async fn send_to(&self, id: SessionId, payload: impl Into<Bytes>) -> Result<()> {
        let session = self.session(id).ok_or(EclipseError::SessionClosed(id.get()))?;
        self.send_bytes(&session, payload).await
    }

    /// Look up a registered session
    pub fn session(&self, id: SessionId) -> Option<Arc<Session>> {
        self.shared.sessions.get(&id).map(|entry| entry.value().clone())
    }

    /// Indices of every registered session
    pub fn session_ids(&self) -> Vec<SessionId> {
        self.shared.sessions.iter().map(|entry| *entry.key()).collect()
    }

    pub fn session_count(&self) -> usize {
        self.shared.sessions.len()
    }

    pub fn buffer_size(&self) -> usize {
        self.shared.config.buffer_size
    }

    pub fn max_connections(&self) -> usize {
        self.shared.config.max_connections
    }

    pub fn current_connections(&self) -> usize {
        self.shared.current_connections.load(Ordering::SeqCst)
    }

    /// Bound address while listening
    pub fn local_endpoint(&self) -> Option<SocketAddr> {
        match &*self.shared.listen.lock() {
            ListenSlot::Listening(state) => Some(state.local_addr),
            ListenSlot::Stopped | ListenSlot::Closing => None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn framing(&self) -> FramingMode {
        self.shared.config.framing
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            current_connections: self.current_connections(),
            total_accepted: self.shared.total_accepted.load(Ordering::Relaxed),
            bytes_received: self.shared.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.shared.bytes_sent.load(Ordering::Relaxed),
            receive_contexts_available: self.shared.receive_pool.available(),
            send_contexts_available: self.shared.send_pool.available(),
            events_dropped: self.shared.events_dropped.load(Ordering::Relaxed),
        }
    }
}

impl Drop for NetworkServer {
    fn drop(&mut self) {
        if let Ok(state) = self.shared.begin_close() {
            tracing::debug!("Server dropped while listening on {}", state.local_addr);
            self.shared.running.store(false, Ordering::SeqCst);
            state.admission.close();
            state.shutdown.cancel();
        }
    }
}

impl Shared {
    /// Move the slot from listening to closing
    ///
    /// # Errors
    /// `InvalidState` if the server is stopped or already closing
    fn begin_close(&self) -> Result<ListenState> {
        let mut slot = self.listen.lock();
        match std::mem::replace(&mut *slot, ListenSlot::Closing) {
            ListenSlot::Listening(state) => Ok(state),
            ListenSlot::Closing => Err(EclipseError::InvalidState("server is already closing".to_string())),
            ListenSlot::Stopped => {
                *slot = ListenSlot::Stopped;
                Err(EclipseError::InvalidState("server is not listening".to_string()))
            }
        }
    }

    // === Accept ===

    /// Register an accepted connection and start its receive task
    fn admit(
        self: &Arc<Self>,
        stream: TcpStream,
        peer_addr: SocketAddr,
        permit: OwnedSemaphorePermit,
        shutdown: &CancellationToken,
    ) -> Result<()> {
        if self.config.nodelay {
            stream.set_nodelay(true)?;
        }

        let mut context = self.receive_pool.pop()?;
        let id = self.index.next_id();
        context.attach(id);

        let (reader, writer) = stream.into_split();
        let session = Arc::new(Session::new(
            id,
            peer_addr,
            writer,
            &self.config,
            shutdown.child_token(),
            Arc::downgrade(self),
        ));

        self.current_connections.fetch_add(1, Ordering::SeqCst);
        self.total_accepted.fetch_add(1, Ordering::Relaxed);
        self.sessions.insert(id, session.clone());

        tracing::info!(
            "Session {} connected from {} ({} active)",
            id,
            peer_addr,
            self.current_connections.load(Ordering::SeqCst)
        );

        let shared = self.clone();
        self.tasks
            .spawn(async move { shared.receive_loop(session, reader, context, permit).await });
        Ok(())
    }

    // === Receive ===

    /// Read until the session closes, surfacing frames as events
    async fn receive_loop(
        self: Arc<Self>,
        session: Arc<Session>,
        mut reader: OwnedReadHalf,
        mut context: IoContext,
        permit: OwnedSemaphorePermit,
    ) {
        self.emit(ServerEvent::SessionConnected {
            session: session.clone(),
        })
        .await;

        let reason = loop {
            let read = tokio::select! {
                biased;
                _ = session.shutdown.cancelled() => break session.abort_reason(),
                read = with_timeout(
                    self.config.receive_timeout,
                    "receive",
                    reader.read(context.buffer_mut()),
                ) => read,
            };

            let count = match read {
                Ok(0) => break CloseReason::RemotelyClosed,
                Ok(count) => count,
                Err(e) => {
                    tracing::debug!("Session {} receive failed: {}", session.id(), e);
                    break CloseReason::from_error(&e);
                }
            };

            context.set_count(count);
            self.bytes_received.fetch_add(count as u64, Ordering::Relaxed);
            let completed = session.process_receive(context.filled());

            while let Some(payload) = session.dequeue_received() {
                let event = ServerEvent::DataReceived {
                    session: session.clone(),
                    payload,
                };
                tokio::select! {
                    biased;
                    _ = session.shutdown.cancelled() => break,
                    _ = self.emit(event) => {}
                }
            }

            if let Err(e) = completed {
                tracing::warn!("Session {} sent a bad frame: {}", session.id(), e);
                break CloseReason::from_error(&e);
            }
        };

        self.close_session(session, reader, context, permit, reason).await;
    }

    /// Tear a session down and release everything it holds
    ///
    /// The admission permit is released last, after the disconnect event, so
    /// a new session cannot be accepted into a slot still being torn down.
    async fn close_session(
        &self,
        session: Arc<Session>,
        reader: OwnedReadHalf,
        context: IoContext,
        permit: OwnedSemaphorePermit,
        reason: CloseReason,
    ) {
        session.abort(reason);
        session.retire().await;
        drop(reader);

        let removed = self.sessions.remove(&session.id()).is_some();

        if let Err(e) = self.receive_pool.push(context) {
            tracing::error!("Session {} receive context not returned: {}", session.id(), e);
        }

        if removed {
            let _ = self
                .current_connections
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));

            let reason = session.abort_reason();
            tracing::info!(
                "Session {} disconnected ({:?}): {} bytes in, {} bytes out, {:.1}s",
                session.id(),
                reason,
                session.bytes_received(),
                session.bytes_sent(),
                session.uptime().as_secs_f64()
            );

            self.emit(ServerEvent::SessionDisconnected {
                session_id: session.id(),
                peer_addr: session.peer_addr(),
                reason,
            })
            .await;
        }

        drop(permit);
    }

    // === Send ===

    /// Enqueue payloads and start a send chain once the send guard is free
    pub(crate) async fn send_grouped(
        self: &Arc<Self>,
        session: &Arc<Session>,
        payloads: Vec<Bytes>,
    ) -> Result<()> {
        let closed = || EclipseError::SessionClosed(session.id().get());

        if session.is_closed() || !self.sessions.contains_key(&session.id()) {
            return Err(closed());
        }

        let permit = session
            .send_guard
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| closed())?;

        if session.is_closed() {
            return Err(closed());
        }

        session.enqueue(payloads);
        if !session.has_pending_send() {
            return Ok(());
        }

        let mut context = match self.send_pool.pop() {
            Ok(context) => context,
            Err(e) => {
                session.discard_outbound();
                return Err(e);
            }
        };
        context.attach(session.id());

        let shared = self.clone();
        let session = session.clone();
        self.tasks
            .spawn(async move { shared.send_chain(session, context, permit).await });
        Ok(())
    }

    /// Drain the session's outbound queue, then release the send guard
    async fn send_chain(
        self: Arc<Self>,
        session: Arc<Session>,
        mut context: IoContext,
        permit: OwnedSemaphorePermit,
    ) {
        match self.drain_outbound(&session, &mut context).await {
            Ok(()) => {}
            Err(EclipseError::SessionClosed(_)) => {
                tracing::trace!("Session {} send chain cancelled", session.id());
            }
            Err(e) => {
                tracing::warn!("Session {} send failed: {}", session.id(), e);
                session.abort(CloseReason::from_error(&e));
            }
        }

        if let Err(e) = self.send_pool.push(context) {
            tracing::error!("Session {} send context not returned: {}", session.id(), e);
        }
        drop(permit);
    }

    async fn drain_outbound(&self, session: &Session, context: &mut IoContext) -> Result<()> {
        let closed = || EclipseError::SessionClosed(session.id().get());
        let mut guard = session.writer.lock().await;
        let writer = guard.as_mut().ok_or_else(closed)?;

        while session.has_pending_send() {
            let count = session.process_send(context);
            if count == 0 {
                break;
            }

            tokio::select! {
                biased;
                _ = session.shutdown.cancelled() => return Err(closed()),
                written = with_timeout(
                    self.config.send_timeout,
                    "send",
                    writer.write_all(context.filled()),
                ) => written?,
            }

            session.record_sent(count);
            self.bytes_sent.fetch_add(count as u64, Ordering::Relaxed);
            self.try_emit(ServerEvent::DataSent {
                session_id: session.id(),
                bytes: count,
            });
        }

        Ok(())
    }

    // === Shutdown ===

    /// Stop the listen cycle described by `state` and wait for every session
    /// task to finish its teardown
    async fn hard_close(&self, state: ListenState, join_accept: bool) {
        let ListenState {
            local_addr,
            admission,
            shutdown,
            accept_task,
        } = state;

        tracing::info!(
            "Closing server on {} ({} sessions)",
            local_addr,
            self.sessions.len()
        );

        self.running.store(false, Ordering::SeqCst);
        admission.close();
        shutdown.cancel();

        if join_accept {
            if let Err(e) = accept_task.await {
                tracing::error!("Accept loop ended abnormally: {}", e);
            }
        }

        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();

        if !self.sessions.is_empty() {
            tracing::error!("{} sessions left after close", self.sessions.len());
            self.sessions.clear();
        }
        self.current_connections.store(0, Ordering::SeqCst);
        *self.listen.lock() = ListenSlot::Stopped;

        tracing::info!("Server on {} closed", local_addr);
    }

    // === Events ===

    async fn emit(&self, event: ServerEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("Event receiver dropped");
        }
    }

    /// Emit without waiting; the event is dropped and counted if the channel is full
    fn try_emit(&self, event: ServerEvent) {
        match self.events.try_send(event) {
            Ok(()) | Err(TrySendError::Closed(_)) => {}
            Err(TrySendError::Full(event)) => {
                self.events_dropped.fetch_add(1, Ordering::Relaxed);
                tracing::trace!("Event channel full, dropped {:?}", event);
            }
        }
    }
}

/// Admit connections until shutdown or an accept error
async fn accept_loop(
    shared: Arc<Shared>,
    listener: TcpListener,
    admission: Arc<Semaphore>,
    shutdown: CancellationToken,
) {
    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = admission.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let (stream, peer_addr) = tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("Accept failed, closing server: {}", e);
                    drop(permit);
                    if let Ok(state) = shared.begin_close() {
                        shared.hard_close(state, false).await;
                    }
                    break;
                }
            },
        };

        if let Err(e) = shared.admit(stream, peer_addr, permit, &shutdown) {
            tracing::warn!("Connection from {} rejected: {}", peer_addr, e);
        }
    }

    tracing::debug!("Accept loop stopped");
}

/// Bind a listening socket, dual-stack when `addr` is IPv6
fn bind_listener(addr: SocketAddr, backlog: u32) -> Result<TcpListener> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;

    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(i32::try_from(backlog).unwrap_or(i32::MAX))?;

    Ok(TcpListener::from_std(socket.into())?)
}

/// Whether the host can create IPv6 sockets at all
fn ipv6_supported() -> bool {
    Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP)).is_ok()
}

/// Run an I/O future under an optional deadline
async fn with_timeout<T, F>(limit: Option<Duration>, operation: &str, io: F) -> Result<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, io).await {
            Ok(result) => result.map_err(EclipseError::from),
            Err(_) => Err(EclipseError::timed_out(operation)),
        },
        None => io.await.map_err(EclipseError::from),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::collections::HashSet;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    fn config() -> ServerConfig {
        ServerConfig {
            max_connections: 8,
            buffer_size: 256,
            ..Default::default()
        }
    }

    fn start(config: ServerConfig) -> (NetworkServer, EventReceiver, SocketAddr) {
        let (server, events) = NetworkServer::new(config).unwrap();
        let addr = server.listen_with_backlog(LOCALHOST, 0, 16).unwrap();
        (server, events, addr)
    }

    async fn next_event(events: &mut EventReceiver) -> ServerEvent {
        tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    async fn expect_connected(events: &mut EventReceiver) -> Arc<Session> {
        match next_event(events).await {
            ServerEvent::SessionConnected { session } => session,
            other => panic!("expected SessionConnected, got {:?}", other),
        }
    }

    async fn expect_received(events: &mut EventReceiver) -> Bytes {
        loop {
            match next_event(events).await {
                ServerEvent::DataReceived { payload, .. } => return payload,
                ServerEvent::DataSent { .. } => continue,
                other => panic!("expected DataReceived, got {:?}", other),
            }
        }
    }

    async fn expect_disconnected(events: &mut EventReceiver) -> (SessionId, CloseReason) {
        loop {
            match next_event(events).await {
                ServerEvent::SessionDisconnected {
                    session_id, reason, ..
                } => return (session_id, reason),
                ServerEvent::DataSent { .. } => continue,
                other => panic!("expected SessionDisconnected, got {:?}", other),
            }
        }
    }

    async fn read_frame(client: &mut TcpStream) -> Vec<u8> {
        let len = client.read_i32_le().await.unwrap();
        let mut payload = vec![0u8; len as usize];
        client.read_exact(&mut payload).await.unwrap();
        payload
    }

    #[tokio::test]
    async fn test_listen_twice_rejected() {
        let (server, _events, _) = start(config());
        assert!(server.is_running());
        assert!(matches!(
            server.listen_on(LOCALHOST, 0),
            Err(EclipseError::InvalidState(_))
        ));
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_while_stopped_rejected() {
        let (server, _events) = NetworkServer::new(config()).unwrap();
        assert!(matches!(server.close().await, Err(EclipseError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_invalid_port_rejected() {
        let (server, _events) = NetworkServer::new(config()).unwrap();
        assert!(matches!(
            server.listen_with_backlog(LOCALHOST, 70000, 16),
            Err(EclipseError::InvalidPort(70000))
        ));
        assert!(!server.is_running());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let bad = ServerConfig {
            max_connections: 0,
            ..Default::default()
        };
        assert!(matches!(NetworkServer::new(bad), Err(EclipseError::Config(_))));
    }

    #[tokio::test]
    async fn test_properties() {
        let (server, _events, addr) = start(config());
        assert_eq!(server.buffer_size(), 256);
        assert_eq!(server.max_connections(), 8);
        assert_eq!(server.framing(), FramingMode::Framed);
        assert_eq!(server.local_endpoint(), Some(addr));

        server.close().await.unwrap();
        assert!(!server.is_running());
        assert_eq!(server.local_endpoint(), None);
    }

    #[tokio::test]
    async fn test_frame_split_across_reads() {
        let (server, mut events, addr) = start(config());
        let mut client = TcpStream::connect(addr).await.unwrap();
        expect_connected(&mut events).await;

        client.write_all(&[0x03, 0x00, 0x00, 0x00]).await.unwrap();
        client.flush().await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.write_all(b"abc").await.unwrap();

        assert_eq!(&expect_received(&mut events).await[..], b"abc");
        assert!(events.try_recv().is_err());
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_mode_single_event() {
        let (server, mut events, addr) = start(ServerConfig {
            framing: FramingMode::Raw,
            ..config()
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        expect_connected(&mut events).await;

        let data = [1u8, 2, 3, 4, 5, 6, 7, 8, 9, 10];
        client.write_all(&data).await.unwrap();

        assert_eq!(&expect_received(&mut events).await[..], &data[..]);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_large_frames_cross_small_buffers() {
        let (server, mut events, addr) = start(ServerConfig {
            buffer_size: 64,
            ..config()
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let session = expect_connected(&mut events).await;

        let inbound: Vec<u8> = (0..1000u32).map(|i| (i % 251) as u8).collect();
        client.write_all(&encode_frame(&inbound).unwrap()).await.unwrap();
        assert_eq!(&expect_received(&mut events).await[..], &inbound[..]);

        let outbound: Vec<u8> = (0..1000u32).map(|i| (i % 13) as u8).collect();
        server.send_frame(&session, &outbound).await.unwrap();
        assert_eq!(read_frame(&mut client).await, outbound);

        session.flush().await.unwrap();
        assert_eq!(session.bytes_sent(), 1004);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_concurrent_sends_arrive_whole_in_enqueue_order() {
        // Every frame spans several segments, so interleaved chains would corrupt it
        let (server, mut events, addr) = start(ServerConfig {
            buffer_size: 8,
            ..config()
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let session = expect_connected(&mut events).await;

        let payloads: Vec<Vec<u8>> = (0..40)
            .map(|i| format!("concurrent payload number {:02}", i).into_bytes())
            .collect();
        let results = join_all(payloads.iter().map(|p| session.send_frame(p))).await;
        assert!(results.iter().all(Result::is_ok));

        let mut received = Vec::with_capacity(payloads.len());
        for _ in 0..payloads.len() {
            received.push(read_frame(&mut client).await);
        }
        assert_eq!(received, payloads);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_sequential_sends_keep_order() {
        let (server, mut events, addr) = start(ServerConfig {
            buffer_size: 16,
            ..config()
        });
        let mut client = TcpStream::connect(addr).await.unwrap();
        let session = expect_connected(&mut events).await;

        for i in 0..50 {
            session.send_frame(format!("message number {}", i).as_bytes()).await.unwrap();
        }
        for i in 0..50 {
            assert_eq!(read_frame(&mut client).await, format!("message number {}", i).into_bytes());
        }
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_grouped_send_is_contiguous() {
        let (server, mut events, addr) = start(config());
        let mut client = TcpStream::connect(addr).await.unwrap();
        let session = expect_connected(&mut events).await;

        let group = vec![
            encode_frame(b"first").unwrap(),
            encode_frame(b"").unwrap(),
            encode_frame(b"third").unwrap(),
        ];
        server.send_grouped(&session, group).await.unwrap();

        assert_eq!(read_frame(&mut client).await, b"first");
        assert_eq!(read_frame(&mut client).await, b"");
        assert_eq!(read_frame(&mut client).await, b"third");
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_admission_blocks_at_capacity() {
        let (server, mut events, addr) = start(ServerConfig {
            max_connections: 1,
            ..config()
        });

        let first = TcpStream::connect(addr).await.unwrap();
        let first_session = expect_connected(&mut events).await;

        // Completes the TCP handshake in the backlog but is not accepted yet
        let _second = TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(events.try_recv().is_err());
        assert_eq!(server.session_count(), 1);

        drop(first);
        let (id, reason) = expect_disconnected(&mut events).await;
        assert_eq!(id, first_session.id());
        assert_eq!(reason, CloseReason::RemotelyClosed);

        let second_session = expect_connected(&mut events).await;
        assert_ne!(second_session.id(), first_session.id());
        assert_eq!(server.current_connections(), 1);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_disconnects_every_session() {
        let (server, mut events, addr) = start(config());

        let mut clients = Vec::new();
        for _ in 0..3 {
            clients.push(TcpStream::connect(addr).await.unwrap());
            expect_connected(&mut events).await;
        }
        assert_eq!(server.current_connections(), 3);

        server.close().await.unwrap();

        let mut closed = HashSet::new();
        for _ in 0..3 {
            let (id, reason) = expect_disconnected(&mut events).await;
            assert_eq!(reason, CloseReason::ServerShutdown);
            assert!(closed.insert(id));
        }
        assert!(events.try_recv().is_err());

        let stats = server.stats();
        assert_eq!(server.session_count(), 0);
        assert_eq!(stats.current_connections, 0);
        assert_eq!(stats.total_accepted, 3);
        assert_eq!(stats.receive_contexts_available, 8);
        assert_eq!(stats.send_contexts_available, 8);
    }

    #[tokio::test]
    async fn test_oversized_frame_closes_only_that_session() {
        let (server, mut events, addr) = start(ServerConfig {
            max_frame_size: 16,
            ..config()
        });

        let mut bad = TcpStream::connect(addr).await.unwrap();
        let bad_session = expect_connected(&mut events).await;
        let mut good = TcpStream::connect(addr).await.unwrap();
        expect_connected(&mut events).await;

        bad.write_all(&100i32.to_le_bytes()).await.unwrap();
        let (id, reason) = expect_disconnected(&mut events).await;
        assert_eq!(id, bad_session.id());
        assert_eq!(reason, CloseReason::FrameTooLarge);

        good.write_all(&encode_frame(b"still here").unwrap()).await.unwrap();
        assert_eq!(&expect_received(&mut events).await[..], b"still here");
        assert!(server.is_running());
        assert_eq!(server.session_count(), 1);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_receive_timeout_closes_session() {
        let (server, mut events, addr) = start(ServerConfig {
            receive_timeout: Some(Duration::from_millis(100)),
            ..config()
        });
        let _client = TcpStream::connect(addr).await.unwrap();
        expect_connected(&mut events).await;

        let (_, reason) = expect_disconnected(&mut events).await;
        assert_eq!(reason, CloseReason::TimedOut);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_timeout_closes_only_that_session() {
        let (server, mut events, addr) = start(ServerConfig {
            buffer_size: 64 * 1024,
            send_timeout: Some(Duration::from_millis(50)),
            ..config()
        });

        // Never reads, so the socket buffers fill and a write stalls
        let _stalled = TcpStream::connect(addr).await.unwrap();
        let stalled_session = expect_connected(&mut events).await;
        server
            .send_bytes(&stalled_session, vec![0x5Au8; 64 * 1024 * 1024])
            .await
            .unwrap();

        let (id, reason) = expect_disconnected(&mut events).await;
        assert_eq!(id, stalled_session.id());
        assert_eq!(reason, CloseReason::TimedOut);

        let mut healthy = TcpStream::connect(addr).await.unwrap();
        let healthy_session = expect_connected(&mut events).await;
        healthy.write_all(&encode_frame(b"ping").unwrap()).await.unwrap();
        assert_eq!(&expect_received(&mut events).await[..], b"ping");
        healthy_session.send_frame(b"pong").await.unwrap();
        assert_eq!(read_frame(&mut healthy).await, b"pong");

        assert!(server.is_running());
        assert_eq!(server.session_count(), 1);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_full_event_channel_counts_dropped_data_sent() {
        let (server, mut events, addr) = start(ServerConfig {
            buffer_size: 16,
            event_capacity: 1,
            ..config()
        });
        let mut client = TcpStream::connect(addr).await.unwrap();

        // Leave SessionConnected unread so the channel stays full
        let session = loop {
            if let Some(session) = server.session(SessionId(1)) {
                break session;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        server.send_bytes(&session, vec![7u8; 160]).await.unwrap();
        session.flush().await.unwrap();

        let mut data = vec![0u8; 160];
        client.read_exact(&mut data).await.unwrap();
        assert!(data.iter().all(|&b| b == 7));
        assert_eq!(server.stats().events_dropped, 10);

        expect_connected(&mut events).await;
        assert!(events.try_recv().is_err());
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_accepts_ipv4_clients() {
        let (server, mut events) = NetworkServer::new(config()).unwrap();
        let bound = server.listen(0).unwrap();
        assert!(bound.ip().is_unspecified());

        let _client = TcpStream::connect((Ipv4Addr::LOCALHOST, bound.port())).await.unwrap();
        let session = expect_connected(&mut events).await;

        match session.peer_addr().ip() {
            IpAddr::V4(ip) => assert_eq!(ip, Ipv4Addr::LOCALHOST),
            IpAddr::V6(ip) => assert_eq!(ip.to_ipv4_mapped(), Some(Ipv4Addr::LOCALHOST)),
        }
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_after_disconnect_fails() {
        let (server, mut events, addr) = start(config());
        let client = TcpStream::connect(addr).await.unwrap();
        let session = expect_connected(&mut events).await;

        drop(client);
        expect_disconnected(&mut events).await;

        assert!(session.is_closed());
        assert!(matches!(
            session.send_frame(b"late").await,
            Err(EclipseError::SessionClosed(_))
        ));
        assert!(matches!(
            server.send_to(session.id(), Bytes::from_static(b"late")).await,
            Err(EclipseError::SessionClosed(_))
        ));
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_relisten_after_close() {
        let (server, mut events, _) = start(config());
        server.close().await.unwrap();

        let addr = server.listen_on(LOCALHOST, 0).unwrap();
        assert!(server.is_running());

        let _client = TcpStream::connect(addr).await.unwrap();
        let session = expect_connected(&mut events).await;
        assert_eq!(session.id(), SessionId(1));
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_listen_rejected_until_close_finishes() {
        let (server, mut events, addr) = start(ServerConfig {
            event_capacity: 1,
            ..config()
        });
        let server = Arc::new(server);

        // SessionConnected fills the channel, so teardown blocks on SessionDisconnected
        let _client = TcpStream::connect(addr).await.unwrap();
        while server.session_count() == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        let closing = tokio::spawn({
            let server = server.clone();
            async move { server.close().await }
        });
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert!(!closing.is_finished());
        assert!(!server.is_running());
        assert_eq!(server.local_endpoint(), None);
        assert!(matches!(server.listen_on(LOCALHOST, 0), Err(EclipseError::InvalidState(_))));
        assert!(matches!(server.close().await, Err(EclipseError::InvalidState(_))));

        expect_connected(&mut events).await;
        let (_, reason) = expect_disconnected(&mut events).await;
        assert_eq!(reason, CloseReason::ServerShutdown);
        closing.await.unwrap().unwrap();

        let addr = server.listen_on(LOCALHOST, 0).unwrap();
        let _client = TcpStream::connect(addr).await.unwrap();
        expect_connected(&mut events).await;
        assert_eq!(server.session_count(), 1);
        assert_eq!(server.current_connections(), 1);
        server.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_session_indices_are_monotonic() {
        let (server, mut events, addr) = start(config());
        let mut ids = Vec::new();
        for _ in 0..3 {
            let client = TcpStream::connect(addr).await.unwrap();
            ids.push(expect_connected(&mut events).await.id());
            drop(client);
            expect_disconnected(&mut events).await;
        }
        assert_eq!(ids, vec![SessionId(1), SessionId(2), SessionId(3)]);
        server.close().await.unwrap();
    }
}
