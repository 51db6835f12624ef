//! ws-gateway: a WebSocket to binary-envelope protocol gateway
//!
//! Browser clients speak JSON over WebSocket text frames. Each message is
//! forwarded to a TCP backend as a `[type][length][JSON]` envelope, and
//! envelopes coming back are delivered to the same client as text frames.
//!
//! Features:
//! - One backend connection per client, opened on the first message
//! - Either side closing tears down both
//! - Configuration via CLI arguments or TOML file

mod config;
mod gateway;
mod protocols;
mod runtime;

use config::Config;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::load()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    info!(
        listen = %config.listen,
        backend = %format!("{}:{}", config.backend_host, config.backend_port),
        max_connections = config.max_connections,
        max_message_size = config.max_message_size,
        "Starting ws-gateway"
    );

    runtime::run(&config)?;
    Ok(())
}
