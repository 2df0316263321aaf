//! # Protocol Engines
//!
//! The transport and framing layer a `Server` orchestrates.
//!
//! An engine owns the listening endpoint and every live connection's I/O.
//! It reports what happened through [`Engine::poll_event`] and accepts
//! writes through [`FrameWriter`]. The server never touches sockets itself.
//!
//! ## Engines
//! - **WebSocket**: TCP + RFC 6455 via `tokio-tungstenite`, path filtering, ping keep-alive
//! - **Memory**: an in-process engine scripted through a `MemoryPeer`
//!
//! ## Ordering
//! Events for one connection come out of `poll_event` in the order
//! `Opened`, `Message`*, `Closed`, and `Closed` is always the last.

use crate::config::KeepAlive;
use crate::core::handle::{ConnectionId, ExtensionId};
use crate::error::Result;
use bytes::Bytes;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;

pub mod memory;
pub mod websocket;

pub use memory::{MemoryEngine, MemoryPeer, SentFrame};
pub use websocket::WebSocketEngine;

/// Something that happened on one connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// The upgrade handshake completed
    Opened {
        id: ConnectionId,
        extension: Option<ExtensionId>,
        peer: Option<SocketAddr>,
    },
    /// A complete data message arrived
    Message {
        id: ConnectionId,
        payload: Bytes,
        binary: bool,
    },
    /// The connection is gone; no further events follow for `id`
    Closed { id: ConnectionId, reason: CloseReason },
}

impl EngineEvent {
    pub fn id(&self) -> ConnectionId {
        match self {
            EngineEvent::Opened { id, .. }
            | EngineEvent::Message { id, .. }
            | EngineEvent::Closed { id, .. } => *id,
        }
    }
}

/// Why a connection went away.
///
/// Only logged and counted; callbacks see every close the same way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The peer sent a close frame or hung up
    Peer,
    /// The application asked for the close
    Local,
    /// Keep-alive probes went unanswered
    KeepAliveTimeout,
    /// The peer broke the protocol
    ProtocolViolation(String),
    /// Reading or writing the transport failed
    Io(String),
    /// The engine was shut down
    Shutdown,
}

impl CloseReason {
    pub fn is_abnormal(&self) -> bool {
        !matches!(self, CloseReason::Peer | CloseReason::Local | CloseReason::Shutdown)
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseReason::Peer => f.write_str("peer closed"),
            CloseReason::Local => f.write_str("closed locally"),
            CloseReason::KeepAliveTimeout => f.write_str("keep-alive timeout"),
            CloseReason::ProtocolViolation(msg) => write!(f, "protocol violation: {msg}"),
            CloseReason::Io(msg) => write!(f, "i/o error: {msg}"),
            CloseReason::Shutdown => f.write_str("shutdown"),
        }
    }
}

/// The write half of an engine, borrowed by socket views
pub trait FrameWriter {
    /// Queue one frame to `id`. Fails with `TransportError` if `id` is not open.
    fn write_frame(&self, id: ConnectionId, payload: &[u8], binary: bool) -> Result<()>;

    /// Start closing `id`. Its `Closed` event arrives through `poll_event` later.
    fn close(&self, id: ConnectionId) -> Result<()>;
}

/// A transport/protocol engine driven by a `Server`
pub trait Engine: FrameWriter {
    /// Wait for the next event. `None` once the engine is shut down and drained.
    ///
    /// Must be cancel-safe: dropping the future loses no event.
    fn poll_event(&mut self) -> impl Future<Output = Option<EngineEvent>> + Send;

    /// Apply a keep-alive policy to one connection.
    fn configure_keep_alive(&mut self, id: ConnectionId, keep_alive: KeepAlive) -> Result<()>;

    /// Stop accepting and close every connection. Pending events stay pollable.
    fn shutdown(&mut self);
}
