//! Example: Echo Server
//!
//! Accepts WebSocket connections, labels each one with a guest name stored
//! as user data, echoes every message back with the same framing and
//! logs who left when a connection closes.
//!
//! Run with: `cargo run --example echo_server [config.toml]`
//!
//! Without a config file the `WS_SERVER_*` environment variables are
//! applied on top of the defaults.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::{info, warn};
use ws_event_server::utils::logging::init_logging;
use ws_event_server::{Config, Server};

struct Guest {
    name: String,
    messages: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => Config::from_file(path)?,
        None => Config::from_env()?,
    };
    config.validate_strict()?;
    init_logging(&config.logging)?;

    let mut server = Server::from_config(&config).await?;
    info!(address = %server.local_addr(), path = %config.server.path, "Echo server ready");

    let guests = Arc::new(AtomicU64::new(0));
    server.on_connection(move |socket| {
        let number = guests.fetch_add(1, Ordering::Relaxed) + 1;
        let name = format!("guest-{number}");
        info!(conn = %socket.handle(), guest = %name, "Joined");
        socket.set_user(Guest { name, messages: 0 });
    });

    server.on_message(|socket, payload, binary| {
        if let Some(guest) = socket.user_mut::<Guest>() {
            guest.messages += 1;
        }
        if let Err(e) = socket.send(payload, binary) {
            warn!(conn = %socket.handle(), error = %e, "Echo failed");
        }
    });

    server.on_disconnection(|socket| {
        if let Some(guest) = socket.take_user::<Guest>() {
            info!(guest = %guest.name, messages = guest.messages, "Left");
        }
    });

    server
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for ctrl-c");
            }
        })
        .await?;

    info!(metrics = ?server.metrics(), "Echo server stopped");
    Ok(())
}
