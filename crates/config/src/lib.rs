//! Eclipse Server Configuration
//!
//! Loads `serveroptions.txt`, a flat `key = value` file. Lines starting with
//! `#` are comments. Unknown keys are ignored and unparsable values keep their
//! defaults, so an old options file never stops the server from starting.
//!
//! ```text
//! # serveroptions.txt
//! name = Eclipse Test Server
//! interface = AUTO
//! port = 14900
//! maxconnections = 250
//! framing = framed
//! receivetimeout = 120
//! ```

use eclipse_core::{EclipseError, FramingMode, Result};
use std::fs;
use std::net::IpAddr;
use std::path::Path;
use std::time::Duration;

/// Default location of the options file, relative to the working directory
pub const DEFAULT_OPTIONS_PATH: &str = "config/serveroptions.txt";

/// Server options from `serveroptions.txt`
#[derive(Debug, Clone, PartialEq)]
pub struct ServerOptions {
    /// Server name (from "name" option)
    pub name: String,
    /// Interface to bind (from "interface" option, `AUTO` = every interface)
    pub interface: String,
    /// Listen port (from "port" option, default: 14900)
    pub port: u32,
    /// Maximum concurrent sessions (from "maxconnections" option)
    pub max_connections: usize,
    /// Per-session buffer size in bytes (from "buffersize" option)
    pub buffer_size: usize,
    /// Wire framing (from "framing" option: `framed` or `raw`)
    pub framing: FramingMode,
    /// Listen backlog (from "backlog" option)
    pub backlog: u32,
    /// Largest accepted frame payload in bytes (from "maxframesize" option)
    pub max_frame_size: usize,
    /// Idle receive limit (from "receivetimeout" option, seconds, 0 = none)
    pub receive_timeout: Option<Duration>,
    /// Per-write limit (from "sendtimeout" option, seconds, 0 = none)
    pub send_timeout: Option<Duration>,
    /// Event channel capacity (from "eventcapacity" option)
    pub event_capacity: usize,
}

impl Default for ServerOptions {
    fn default() -> Self {
        Self {
            name: "Eclipse Server".to_string(),
            interface: "AUTO".to_string(),
            port: 14900,
            max_connections: 100,
            buffer_size: 8192,
            framing: FramingMode::Framed,
            backlog: 100,
            max_frame_size: 16 * 1024 * 1024,
            receive_timeout: None,
            send_timeout: Some(Duration::from_secs(30)),
            event_capacity: 1024,
        }
    }
}

impl ServerOptions {
    /// Load options from a file
    ///
    /// # Errors
    /// `Config` if the file cannot be read
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            EclipseError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        tracing::debug!("Loaded options from {}", path.display());
        Ok(Self::parse(&content))
    }

    /// Load options from [`DEFAULT_OPTIONS_PATH`]
    pub fn load_default() -> Result<Self> {
        Self::load_from_file(DEFAULT_OPTIONS_PATH)
    }

    /// Parse options file content
    pub fn parse(content: &str) -> Self {
        let mut options = Self::default();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                options.parse_option(&key.trim().to_lowercase(), value.trim());
            }
        }

        options
    }

    fn parse_option(&mut self, key: &str, value: &str) {
        match key {
            "name" => self.name = value.into(),
            "interface" => self.interface = value.into(),
            "port" => parse_into(key, value, &mut self.port),
            "maxconnections" => parse_into(key, value, &mut self.max_connections),
            "buffersize" => parse_into(key, value, &mut self.buffer_size),
            "framing" => match FramingMode::from_str_opt(value) {
                Some(framing) => self.framing = framing,
                None => tracing::warn!("Invalid value for framing: {}", value),
            },
            "backlog" => parse_into(key, value, &mut self.backlog),
            "maxframesize" => parse_into(key, value, &mut self.max_frame_size),
            "receivetimeout" => parse_seconds(key, value, &mut self.receive_timeout),
            "sendtimeout" => parse_seconds(key, value, &mut self.send_timeout),
            "eventcapacity" => parse_into(key, value, &mut self.event_capacity),
            _ => {
                tracing::debug!("Unknown option: {} = {}", key, value);
            }
        }
    }

    /// Address to bind
    ///
    /// # Returns
    /// `None` for `AUTO` (every interface, IPv4 and IPv6)
    ///
    /// # Errors
    /// `Config` if the interface is neither `AUTO` nor an IP address
    pub fn bind_address(&self) -> Result<Option<IpAddr>> {
        if self.interface.eq_ignore_ascii_case("AUTO") || self.interface.is_empty() {
            return Ok(None);
        }

        self.interface
            .parse()
            .map(Some)
            .map_err(|_| EclipseError::Config(format!("invalid interface: {}", self.interface)))
    }

    /// Display options summary
    pub fn display(&self) {
        tracing::info!("Server options:");
        tracing::info!("    Name: {}", self.name);
        tracing::info!("    Bind: {} (port {})", self.interface, self.port);
        tracing::info!("    Max Connections: {}", self.max_connections);
        tracing::info!("    Buffer Size: {} bytes", self.buffer_size);
        tracing::info!("    Framing: {}", self.framing.as_str());
        tracing::info!("    Max Frame Size: {} bytes", self.max_frame_size);
        tracing::info!("    Backlog: {}", self.backlog);
        tracing::info!("    Receive Timeout: {}", describe_timeout(self.receive_timeout));
        tracing::info!("    Send Timeout: {}", describe_timeout(self.send_timeout));
        tracing::info!("    Event Capacity: {}", self.event_capacity);
    }
}

fn parse_into<T: std::str::FromStr>(key: &str, value: &str, slot: &mut T) {
    match value.parse() {
        Ok(parsed) => *slot = parsed,
        Err(_) => tracing::warn!("Invalid value for {}: {}", key, value),
    }
}

fn parse_seconds(key: &str, value: &str, slot: &mut Option<Duration>) {
    match value.parse::<u64>() {
        Ok(0) => *slot = None,
        Ok(secs) => *slot = Some(Duration::from_secs(secs)),
        Err(_) => tracing::warn!("Invalid value for {}: {}", key, value),
    }
}

fn describe_timeout(timeout: Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("{}s", t.as_secs()),
        None => "none".to_string(),
    }
}
