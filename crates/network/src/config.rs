//! # Server Configuration
//!
//! Configuration options for the Eclipse2D networking layer.
//!
//! # Example
//!
//! ```rust
//! use eclipse_network::{FramingMode, ServerConfig};
//! use std::time::Duration;
//!
//! let config = ServerConfig {
//!     max_connections: 500,
//!     buffer_size: 4096,
//!     framing: FramingMode::Framed,
//!     receive_timeout: Some(Duration::from_secs(120)),
//!     ..Default::default()
//! };
//! assert!(config.validate().is_ok());
//! ```

use eclipse_core::FramingMode;
use eclipse_protocol::DEFAULT_MAX_FRAME_SIZE;
use std::time::Duration;

/// Listen backlog used when none is given
pub const DEFAULT_BACKLOG: u32 = 100;

/// Server configuration options
///
/// # Purpose
/// Defines every tunable of the network server. Pools are sized from
/// `max_connections` and `buffer_size` once, at construction.
///
/// # Default Values
///
/// - 100 max connections
/// - 8 KB per-connection buffer (one receive and one send segment each)
/// - Framed mode with a 16 MB frame limit
/// - No receive timeout, 30-second send timeout
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of concurrent sessions
    ///
    /// # Purpose
    /// Sizes the admission semaphore and both context pools
    ///
    /// # Default
    /// 100 connections
    pub max_connections: usize,

    /// Size of each pooled I/O buffer segment, in bytes
    ///
    /// # Notes
    /// - One receive read never transfers more than this
    /// - Outbound payloads larger than this are sent as a chain of writes
    /// - Total pool memory is `2 * max_connections * buffer_size`
    pub buffer_size: usize,

    /// Whether inbound bytes are reassembled into frames or surfaced raw
    ///
    /// # Default
    /// [`FramingMode::Framed`]
    pub framing: FramingMode,

    /// Largest frame payload a peer may declare
    ///
    /// # Purpose
    /// Bounds reassembly buffer growth. A peer declaring a longer frame has its
    /// session closed; the server keeps running.
    ///
    /// # Default
    /// 16 MB
    pub max_frame_size: usize,

    /// Listen backlog used by [`NetworkServer::listen`](crate::NetworkServer::listen)
    pub backlog: u32,

    /// Read timeout - a session idle for this long is closed
    ///
    /// # Default
    /// `None` (wait indefinitely)
    pub receive_timeout: Option<Duration>,

    /// Write timeout for each pooled send
    ///
    /// # Default
    /// 30 seconds
    pub send_timeout: Option<Duration>,

    /// Capacity of the server event channel
    ///
    /// # Notes
    /// - When the channel is full, receive loops wait for the application
    /// - Data-sent notifications are dropped instead of waiting
    pub event_capacity: usize,

    /// Disable Nagle's algorithm on accepted sockets
    pub nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_connections: 100,
            buffer_size: 8192,
            framing: FramingMode::Framed,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            backlog: DEFAULT_BACKLOG,
            receive_timeout: None,
            send_timeout: Some(Duration::from_secs(30)),
            event_capacity: 1024,
            nodelay: true,
        }
    }
}

impl ServerConfig {
    /// Validate the configuration
    ///
    /// # Returns
    /// `Ok(())` if configuration is valid, `Err(String)` otherwise
    ///
    /// # Checks
    /// - `max_connections`, `buffer_size`, `max_frame_size` and
    ///   `event_capacity` must be > 0
    /// - `max_connections * buffer_size` must not overflow
    /// - timeouts, when set, must be non-zero
    pub fn validate(&self) -> Result<(), String> {
        if self.max_connections == 0 {
            return Err("max_connections must be > 0".to_string());
        }

        if self.buffer_size == 0 {
            return Err("buffer_size must be > 0".to_string());
        }

        if self.max_connections.checked_mul(self.buffer_size).is_none() {
            return Err("max_connections * buffer_size overflows".to_string());
        }

        if self.max_frame_size == 0 {
            return Err("max_frame_size must be > 0".to_string());
        }

        if self.event_capacity == 0 {
            return Err("event_capacity must be > 0".to_string());
        }

        if self.receive_timeout.is_some_and(|t| t.is_zero()) {
            return Err("receive_timeout must be non-zero when set".to_string());
        }

        if self.send_timeout.is_some_and(|t| t.is_zero()) {
            return Err("send_timeout must be non-zero when set".to_string());
        }

        if self.max_connections > u16::MAX as usize {
            tracing::warn!("max_connections={} pre-allocates a very large pool", self.max_connections);
        }

        Ok(())
    }
}
