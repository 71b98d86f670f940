//! Eclipse Server - echo demo for the Eclipse2D networking layer
//!
//! Loads `config/serveroptions.txt`, listens, greets each session and echoes
//! every received frame back until Ctrl+C.

use anyhow::Context;
use bytes::Bytes;
use eclipse_config::ServerOptions;
use eclipse_core::EclipseError;
use eclipse_network::{FramingMode, NetworkServer, ServerConfig, ServerEvent};
use eclipse_protocol::PacketWriter;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Eclipse server starting up...");

    let options = match ServerOptions::load_default() {
        Ok(options) => {
            info!("Configuration loaded");
            options
        }
        Err(e) => {
            warn!("Failed to load options: {}", e);
            warn!("Using default configuration (port {})", ServerOptions::default().port);
            ServerOptions::default()
        }
    };
    options.display();

    let config = ServerConfig {
        max_connections: options.max_connections,
        buffer_size: options.buffer_size,
        framing: options.framing,
        max_frame_size: options.max_frame_size,
        backlog: options.backlog,
        receive_timeout: options.receive_timeout,
        send_timeout: options.send_timeout,
        event_capacity: options.event_capacity,
        ..Default::default()
    };

    let (server, mut events) = NetworkServer::new(config).context("creating network server")?;

    let local_addr = match options.bind_address()? {
        Some(ip) => server.listen_on(ip, options.port),
        None => server.listen(options.port),
    }
    .with_context(|| format!("listening on port {}", options.port))?;

    info!("{} ready on {}", options.name, local_addr);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("waiting for Ctrl+C")?;
                info!("Shutdown requested");
                break;
            }
            event = events.recv() => {
                let Some(event) = event else { break };
                handle_event(&server, &options, event).await;
            }
        }
    }

    // Keep draining so every disconnect event can be delivered during close
    let drain = tokio::spawn(async move { while events.recv().await.is_some() {} });
    server.close().await.context("closing server")?;
    let stats = server.stats();
    drop(server);
    drain.abort();

    info!(
        "Server stopped: {} sessions served, {} bytes in, {} bytes out",
        stats.total_accepted, stats.bytes_received, stats.bytes_sent
    );
    Ok(())
}

fn welcome_frame(options: &ServerOptions, session_id: u32) -> Result<Bytes, EclipseError> {
    let mut welcome = PacketWriter::new();
    welcome.write_string(&format!("Welcome to {}", options.name))?;
    welcome.write_i32(session_id as i32);
    welcome.to_frame()
}

async fn handle_event(server: &NetworkServer, options: &ServerOptions, event: ServerEvent) {
    let result = match event {
        ServerEvent::SessionConnected { session } => {
            if server.framing() == FramingMode::Framed {
                match welcome_frame(options, session.id().get()) {
                    Ok(frame) => server.send_bytes(&session, frame).await,
                    Err(e) => Err(e),
                }
            } else {
                Ok(())
            }
        }
        ServerEvent::DataReceived { session, payload } => match server.framing() {
            FramingMode::Framed => server.send_frame(&session, &payload).await,
            FramingMode::Raw => server.send_bytes(&session, payload).await,
        },
        ServerEvent::SessionDisconnected { .. } | ServerEvent::DataSent { .. } => Ok(()),
    };

    match result {
        Ok(()) => {}
        Err(EclipseError::SessionClosed(id)) => debug!("Session {} closed before reply", id),
        Err(e) => warn!("Reply failed: {}", e),
    }
}
