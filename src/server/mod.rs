//! # Event Server
//!
//! The `Server` owns an engine, a table of live connections and one
//! callback per lifecycle event, and turns engine events into callback
//! invocations.
//!
//! ## Dispatch
//! Every callback runs on the task driving [`Server::run`] (or
//! [`Server::run_once`]), one at a time. A callback receives a `Socket`
//! borrowed from the connection table and cannot reach the server itself,
//! so it can neither re-enter the loop nor keep the view past its return.
//!
//! For each connection the callbacks fire as connection, then messages in
//! arrival order, then exactly one close. User data stored on the socket is
//! dropped right after the close callback returns.
//!
//! ## Example
//! ```rust,no_run
//! use ws_event_server::config::ServerOptions;
//! use ws_event_server::server::Server;
//!
//! # async fn demo() -> ws_event_server::error::Result<()> {
//! let options = ServerOptions::new(8080, "/ws", 30, 5, 3);
//! let mut server = Server::bind(options).await?;
//!
//! server.on_connection(|socket| socket.set_user(String::from("guest")));
//! server.on_message(|socket, payload, binary| {
//!     let _ = socket.send(payload, binary);
//! });
//! server.on_disconnection(|socket| {
//!     let _name: Option<String> = socket.take_user();
//! });
//!
//! server.run().await
//! # }
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::{Config, KeepAlive, ServerOptions, SHUTDOWN_TIMEOUT};
use crate::core::connection::Connection;
use crate::core::handle::{ConnectionId, ExtensionId, SocketRef};
use crate::core::socket::Socket;
use crate::engine::{CloseReason, Engine, EngineEvent, WebSocketEngine};
use crate::error::{constants, Result, ServerError};
use crate::utils::metrics::{Metrics, MetricsSnapshot, Timer};

pub mod dispatcher;

#[cfg(test)]
mod tests;

pub use dispatcher::{Dispatcher, EventKind, Handler};

/// Event-driven WebSocket server over an engine `E`
pub struct Server<E: Engine> {
    options: ServerOptions,
    keep_alive: KeepAlive,
    engine: E,
    connections: HashMap<ConnectionId, Connection>,
    dispatcher: Dispatcher,
    metrics: Arc<Metrics>,
}

impl Server<WebSocketEngine> {
    /// Validate `options` and start listening on the configured endpoint.
    ///
    /// Fails with `ConfigurationError` for invalid options and `BindError`
    /// when the listener cannot be established.
    pub async fn bind(options: ServerOptions) -> Result<Self> {
        options.validate_strict()?;
        let engine = WebSocketEngine::bind(&options).await?;
        Self::with_engine(options, engine)
    }

    /// Bind using the `server` section of a full configuration
    pub async fn from_config(config: &Config) -> Result<Self> {
        Self::bind(config.server.clone()).await
    }

    /// The address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.engine.local_addr()
    }
}

impl<E: Engine> Server<E> {
    /// Wrap an engine that is already listening.
    pub fn with_engine(options: ServerOptions, engine: E) -> Result<Self> {
        options.validate_strict()?;
        Ok(Self {
            keep_alive: options.keep_alive(),
            options,
            engine,
            connections: HashMap::new(),
            dispatcher: Dispatcher::new(),
            metrics: Arc::new(Metrics::new()),
        })
    }

    pub fn options(&self) -> &ServerOptions {
        &self.options
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    /// Register the connection-opened callback, replacing any previous one
    pub fn on_connection<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Socket<'_>) + Send + 'static,
    {
        self.dispatcher.set_connection(Box::new(handler));
    }

    /// Register the connection-closed callback, replacing any previous one
    pub fn on_disconnection<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Socket<'_>) + Send + 'static,
    {
        self.dispatcher.set_disconnection(Box::new(handler));
    }

    /// Register the message callback, replacing any previous one
    pub fn on_message<F>(&mut self, handler: F)
    where
        F: FnMut(&mut Socket<'_>, &[u8], bool) + Send + 'static,
    {
        self.dispatcher.set_message(Box::new(handler));
    }

    /// Register a callback by event name: "connection", "close" or "message".
    ///
    /// Unknown names and handlers of the wrong shape are rejected with
    /// `ConfigurationError`.
    pub fn on(&mut self, event: &str, handler: Handler) -> Result<()> {
        let kind = self.dispatcher.register(event, handler)?;
        debug!(event = %kind, "Callback registered");
        Ok(())
    }

    /// Send a frame to the connection `socket` refers to.
    ///
    /// Fails with `TransportError` if the connection is gone or closing.
    pub fn send(&self, socket: SocketRef, payload: &[u8], binary: bool) -> Result<()> {
        let connection = self.lookup(socket)?;
        connection.send(&self.engine, &self.metrics, payload, binary)
    }

    /// Replace the user data of a live connection
    pub fn set_user_data<T: Any + Send>(&mut self, socket: SocketRef, value: T) -> Result<()> {
        self.lookup_mut(socket)?.user.set(value);
        Ok(())
    }

    /// Borrow the user data of a live connection, if it holds a `T`
    pub fn user_data<T: Any>(&self, socket: SocketRef) -> Result<Option<&T>> {
        Ok(self.lookup(socket)?.user.get::<T>())
    }

    /// Move the user data out of a live connection, if it holds a `T`
    pub fn take_user_data<T: Any>(&mut self, socket: SocketRef) -> Result<Option<T>> {
        Ok(self.lookup_mut(socket)?.user.take::<T>())
    }

    /// Request a close; the close callback fires on a later loop turn
    pub fn close(&mut self, socket: SocketRef) -> Result<()> {
        let connection = self
            .connections
            .get_mut(&socket.transport())
            .ok_or_else(|| ServerError::transport(constants::ERR_STALE_SOCKET))?;
        connection.close(&self.engine)
    }

    /// Unwrap a stored ref back into a socket view
    pub fn socket(&mut self, socket: SocketRef) -> Result<Socket<'_>> {
        let connection = self
            .connections
            .get_mut(&socket.transport())
            .ok_or_else(|| ServerError::transport(constants::ERR_STALE_SOCKET))?;
        Ok(Socket::new(connection, &self.engine, &self.metrics))
    }

    /// Whether `socket` still refers to a connection that has not closed
    pub fn is_open(&self, socket: SocketRef) -> bool {
        self.connections.contains_key(&socket.transport())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Shared handle to the live counters, readable from other tasks
    pub fn metrics_handle(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Wait for one engine event and dispatch it.
    ///
    /// Returns `false` once the engine has nothing more to report.
    pub async fn run_once(&mut self) -> bool {
        match self.engine.poll_event().await {
            Some(event) => {
                self.dispatch(event);
                true
            }
            None => false,
        }
    }

    /// Dispatch events until the engine is exhausted
    #[instrument(skip(self), fields(port = self.options.port, path = %self.options.path))]
    pub async fn run(&mut self) -> Result<()> {
        while self.run_once().await {}
        info!("Engine exhausted, server loop finished");
        Ok(())
    }

    /// Dispatch events until `signal` resolves, then shut down
    #[instrument(skip(self, signal), fields(port = self.options.port, path = %self.options.path))]
    pub async fn run_until<F>(&mut self, signal: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("Shutdown requested");
                    break;
                }

                event = self.engine.poll_event() => match event {
                    Some(event) => self.dispatch(event),
                    None => {
                        info!("Engine exhausted, server loop finished");
                        return Ok(());
                    }
                },
            }
        }

        self.shutdown().await
    }

    /// Stop the engine and deliver a close for every remaining connection.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.engine.shutdown();

        let drained = tokio::time::timeout(SHUTDOWN_TIMEOUT, async {
            while let Some(event) = self.engine.poll_event().await {
                self.dispatch(event);
            }
        })
        .await;
        if drained.is_err() {
            warn!("Shutdown timeout reached, forcing close of remaining connections");
        }

        let mut remaining: Vec<ConnectionId> = self.connections.keys().copied().collect();
        remaining.sort();
        for id in remaining {
            self.handle_closed(id, CloseReason::Shutdown);
        }

        self.metrics.log_metrics();
        info!("Server shut down");
        Ok(())
    }

    fn lookup(&self, socket: SocketRef) -> Result<&Connection> {
        self.connections
            .get(&socket.transport())
            .ok_or_else(|| ServerError::transport(constants::ERR_STALE_SOCKET))
    }

    fn lookup_mut(&mut self, socket: SocketRef) -> Result<&mut Connection> {
        self.connections
            .get_mut(&socket.transport())
            .ok_or_else(|| ServerError::transport(constants::ERR_STALE_SOCKET))
    }

    fn dispatch(&mut self, event: EngineEvent) {
        match event {
            EngineEvent::Opened {
                id,
                extension,
                peer,
            } => self.handle_opened(id, extension, peer),
            EngineEvent::Message {
                id,
                payload,
                binary,
            } => self.handle_message(id, &payload, binary),
            EngineEvent::Closed { id, reason } => self.handle_closed(id, reason),
        }
    }

    fn handle_opened(
        &mut self,
        id: ConnectionId,
        extension: Option<ExtensionId>,
        peer: Option<SocketAddr>,
    ) {
        if self.connections.contains_key(&id) {
            warn!(conn = %id, "Duplicate open for a live connection ignored");
            return;
        }

        if let Err(e) = self.engine.configure_keep_alive(id, self.keep_alive) {
            warn!(conn = %id, error = %e, "Failed to configure keep-alive");
        }

        let connection = self
            .connections
            .entry(id)
            .or_insert_with(|| Connection::new(SocketRef::new(id, extension), peer));
        self.metrics.connection_opened();
        debug!(conn = %connection.handle, peer = ?peer, "Connection opened");

        let _timer = Timer::start("connection");
        let mut socket = Socket::new(connection, &self.engine, &self.metrics);
        self.dispatcher.connection(&mut socket);
    }

    fn handle_message(&mut self, id: ConnectionId, payload: &[u8], binary: bool) {
        let Some(connection) = self.connections.get_mut(&id) else {
            debug!(conn = %id, "Message for unknown connection dropped");
            return;
        };
        connection.messages_in += 1;
        self.metrics.message_received(payload.len() as u64);

        let _timer = Timer::start("message");
        let mut socket = Socket::new(connection, &self.engine, &self.metrics);
        self.dispatcher.message(&mut socket, payload, binary);
    }

    fn handle_closed(&mut self, id: ConnectionId, reason: CloseReason) {
        let Some(mut connection) = self.connections.remove(&id) else {
            debug!(conn = %id, "Close for unknown connection dropped");
            return;
        };
        connection.closing = true;
        self.metrics.connection_closed(&reason);

        if reason.is_abnormal() {
            warn!(conn = %id, reason = %reason, "Connection closed abnormally");
        }
        debug!(
            conn = %id,
            reason = %reason,
            messages = connection.messages_in,
            lifetime_ms = connection.opened_at.elapsed().as_millis() as u64,
            "Connection closed"
        );

        {
            let _timer = Timer::start("close");
            let mut socket = Socket::new(&mut connection, &self.engine, &self.metrics);
            self.dispatcher.disconnection(&mut socket);
        }

        // Releases whatever user data the application left in the slot.
        drop(connection);
    }
}

impl<E: Engine> std::fmt::Debug for Server<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("options", &self.options)
            .field("connections", &self.connections.len())
            .field("dispatcher", &self.dispatcher)
            .finish()
    }
}
