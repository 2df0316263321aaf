//! # Error Types
//!
//! Error handling for the WebSocket event server.
//!
//! This module defines every error variant the server surfaces, from invalid
//! construction parameters to writes attempted on connections that are gone.
//!
//! ## Error Categories
//! - **Configuration Errors**: bad options, unknown event names, handler mismatches
//! - **Bind Errors**: the listening endpoint could not be established
//! - **Transport Errors**: operations on closed, closing or stale connections
//! - **Protocol Violations**: framing or handshake errors reported by the engine
//!
//! Construction and bind errors fail fast. Per-connection errors are returned
//! to the caller of the operation and never cross the event loop.
//!
//! ## Example Usage
//! ```rust
//! use ws_event_server::config::ServerOptions;
//! use ws_event_server::error::ServerError;
//!
//! let mut options = ServerOptions::default();
//! options.path = "no-leading-slash".to_string();
//!
//! match options.validate_strict() {
//!     Err(ServerError::ConfigurationError(msg)) => assert!(msg.contains("Path")),
//!     other => panic!("unexpected: {other:?}"),
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::io;
use thiserror::Error;

/// Error message constants to reduce allocations in error paths.
pub mod constants {
    /// Connection state errors
    pub const ERR_CONNECTION_CLOSED: &str = "Connection is closed or closing";
    pub const ERR_STALE_SOCKET: &str = "Socket does not refer to a live connection";
    pub const ERR_UNKNOWN_CONNECTION: &str = "Engine has no such connection";
    pub const ERR_WRITER_GONE: &str = "Connection writer has shut down";

    /// Frame errors
    pub const ERR_TEXT_NOT_UTF8: &str = "Text frame payload is not valid UTF-8";

    /// Registration errors
    pub const ERR_UNKNOWN_EVENT: &str = "Unknown event name";
    pub const ERR_HANDLER_MISMATCH: &str = "Handler shape does not match event";

    /// Engine errors
    pub const ERR_ENGINE_SHUT_DOWN: &str = "Engine has been shut down";
    pub const ERR_LOCK_POISONED: &str = "Synchronization primitive poisoned";
}

/// ServerError is the primary error type for all server operations
#[derive(Error, Debug, Serialize, Deserialize)]
pub enum ServerError {
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Bind error: {0}")]
    BindError(String),

    #[error("Transport error: {0}")]
    TransportError(String),

    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("I/O error: {0}")]
    #[serde(skip_serializing, skip_deserializing)]
    Io(#[from] io::Error),
}

impl ServerError {
    /// Shorthand for a transport error built from a static message
    pub(crate) fn transport(msg: &str) -> Self {
        ServerError::TransportError(msg.to_string())
    }

    /// Whether this error means the connection can no longer be written to
    pub fn is_transport(&self) -> bool {
        matches!(self, ServerError::TransportError(_))
    }
}

/// Type alias for Results using ServerError
pub type Result<T> = std::result::Result<T, ServerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_category() {
        let err = ServerError::transport(constants::ERR_CONNECTION_CLOSED);
        assert_eq!(
            err.to_string(),
            "Transport error: Connection is closed or closing"
        );
        assert!(err.is_transport());
    }

    #[test]
    fn test_io_conversion() {
        let err: ServerError = io::Error::new(io::ErrorKind::AddrInUse, "taken").into();
        assert!(matches!(err, ServerError::Io(_)));
        assert!(!err.is_transport());
    }
}
