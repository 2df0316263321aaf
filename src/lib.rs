//! # ws-event-server
//!
//! A minimal event-driven WebSocket server. Applications register three
//! callbacks (connection opened, message received, connection closed) and
//! attach arbitrary per-connection data to the socket they are handed.
//!
//! ## Layout
//! - [`config`]: endpoint, keep-alive and logging settings
//! - [`core`](crate::core): connection handles, the socket view and the user-data slot
//! - [`engine`]: the event source a server drives (WebSocket or in-memory)
//! - [`server`]: the event loop and callback dispatch
//! - [`utils`]: logging setup and metrics
//!
//! ## Quick start
//! ```rust,no_run
//! use ws_event_server::{Server, ServerOptions};
//!
//! # async fn demo() -> ws_event_server::Result<()> {
//! let mut server = Server::bind(ServerOptions::new(8080, "/ws", 30, 5, 3)).await?;
//! server.on_message(|socket, payload, binary| {
//!     let _ = socket.send(payload, binary);
//! });
//! server.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! })
//! .await
//! # }
//! ```

pub mod config;
pub mod core;
pub mod engine;
pub mod error;
pub mod server;
pub mod utils;

pub use config::{Config, KeepAlive, LoggingConfig, ServerOptions};
pub use crate::core::{ConnectionId, ExtensionId, Socket, SocketRef, UserData};
pub use engine::{CloseReason, Engine, EngineEvent, MemoryEngine, MemoryPeer, WebSocketEngine};
pub use error::{Result, ServerError};
pub use server::{EventKind, Handler, Server};
