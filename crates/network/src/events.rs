//! # Server Events
//!
//! Session lifecycle and I/O completions are reported to the application as
//! [`ServerEvent`] values on a bounded channel returned by
//! [`NetworkServer::new`](crate::NetworkServer::new).
//!
//! # Ordering
//!
//! For a single session:
//! - `SessionConnected` precedes every other event
//! - `DataReceived` events arrive in wire order
//! - `SessionDisconnected` is the last event, emitted exactly once
//!
//! `DataSent` is best effort: it is dropped if the channel is full, so a send
//! chain never waits on the event consumer.

use crate::session::{CloseReason, Session};
use bytes::Bytes;
use eclipse_core::SessionId;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Notification from the server to the application
#[derive(Debug, Clone)]
pub enum ServerEvent {
    /// A connection was accepted and registered
    SessionConnected { session: Arc<Session> },

    /// A session was removed from the registry
    SessionDisconnected {
        session_id: SessionId,
        peer_addr: SocketAddr,
        reason: CloseReason,
    },

    /// A complete frame (or, in raw mode, one read) arrived
    DataReceived { session: Arc<Session>, payload: Bytes },

    /// A send chain segment was written to the socket
    ///
    /// Send chains never wait on the event channel. When it is full this event
    /// is dropped and counted in [`ServerStats::events_dropped`](crate::ServerStats::events_dropped).
    DataSent { session_id: SessionId, bytes: usize },
}

impl ServerEvent {
    /// Session this event concerns
    pub fn session_id(&self) -> SessionId {
        match self {
            Self::SessionConnected { session } | Self::DataReceived { session, .. } => session.id(),
            Self::SessionDisconnected { session_id, .. } | Self::DataSent { session_id, .. } => {
                *session_id
            }
        }
    }
}

/// Receiving end of the server's event channel
pub type EventReceiver = mpsc::Receiver<ServerEvent>;
