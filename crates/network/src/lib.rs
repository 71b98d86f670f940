//! # Eclipse Networking Layer
//!
//! This crate provides the Tokio-based TCP server: pooled buffers, framed
//! sessions, admission control and an event channel for the application.
//!
//! ## Modules
//!
//! - [`config`] - Server configuration options
//! - [`buffer_pool`] - Contiguous buffer block sliced into segments
//! - [`context`] - Reusable I/O contexts and their pools
//! - [`session`] - Per-connection reassembly and send queue
//! - [`events`] - Events delivered to the application
//! - [`server`] - Listener, accept loop and session pipelines

pub mod buffer_pool;
pub mod config;
pub mod context;
pub mod events;
pub mod server;
pub mod session;

// Re-export commonly used items
pub use buffer_pool::BufferPool;
pub use config::{ServerConfig, DEFAULT_BACKLOG};
pub use context::{ContextId, ContextPool, IoContext, IoKind};
pub use eclipse_core::FramingMode;
pub use events::{EventReceiver, ServerEvent};
pub use server::{NetworkServer, ServerStats};
pub use session::{CloseReason, FrameAssembler, OutboundQueue, Session};
