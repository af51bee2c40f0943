//! photo-drop: a TCP photo receiving server
//!
//! Clients connect, send a 4-byte big-endian length followed by that many
//! bytes of image data, and receive `OK` once the photo is on disk.
//!
//! Features:
//! - One task per connection, no cap unless configured
//! - Photos stored under `data/YYYY-MM-DD/HHMMSS.jpg`
//! - Latest photo surfaced to a display sink on a single consumer task
//! - Configuration via CLI arguments or TOML file

mod config;
mod error;
mod frame;
mod server;
mod sink;
mod storage;

use config::Config;
use server::PhotoServer;
use sink::DisplaySink;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::load()?;

    // Initialize logging
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        host = %config.host,
        port = config.port,
        data_dir = %config.data_dir.display(),
        max_connections = ?config.max_connections,
        max_payload = ?config.max_payload,
        "Starting photo-drop server"
    );

    let sink = DisplaySink::new();
    let latest = sink.latest();
    let mut server = PhotoServer::new(config, sink);

    server.start().await?;
    info!(
        address = ?server.local_addr(),
        state = ?server.state(),
        "Waiting for photos, press Ctrl-C to stop"
    );

    server.stop_on(tokio::signal::ctrl_c()).await;
    info!(state = ?server.state(), "Server shut down");

    if let Some(last) = latest.get() {
        info!(
            path = %last.path.display(),
            bytes = last.payload.len(),
            received_at = %last.received_at.format("%Y-%m-%d %H:%M:%S"),
            "Last photo received"
        );
    }

    Ok(())
}
