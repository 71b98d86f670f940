//! Core error types for the Eclipse2D networking stack

#[derive(thiserror::Error, Debug)]
pub enum EclipseError {
    /// Listen while listening, close while stopped, and similar lifecycle misuse
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Invalid port: {0} (valid range is 0 to 65535)")]
    InvalidPort(u32),

    /// Context pool underflow. Admission control should make this unreachable.
    #[error("Context pool exhausted: {0}")]
    PoolExhausted(String),

    #[error("Buffer pool capacity exceeded: all {segments} segments are assigned")]
    CapacityExceeded { segments: usize },

    #[error("Socket fault: {0}")]
    SocketFault(#[from] std::io::Error),

    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Session {0} is closed")]
    SessionClosed(u32),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),
}

impl EclipseError {
    /// Build a timeout fault for the named operation
    pub fn timed_out(operation: &str) -> Self {
        Self::SocketFault(std::io::Error::new(
            std::io::ErrorKind::TimedOut,
            format!("{} timed out", operation),
        ))
    }

    /// Whether this error is a transport timeout
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::SocketFault(e) if e.kind() == std::io::ErrorKind::TimedOut)
    }
}

pub type Result<T> = std::result::Result<T, EclipseError>;
