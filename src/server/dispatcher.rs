use crate::core::socket::Socket;
use crate::error::{constants, Result, ServerError};
use std::fmt;
use std::str::FromStr;
use tracing::trace;

/// Callback receiving only the socket (connection opened / closed)
pub type SocketHandler = dyn FnMut(&mut Socket<'_>) + Send + 'static;

/// Callback receiving the socket, the payload and the binary flag
pub type MessageHandler = dyn FnMut(&mut Socket<'_>, &[u8], bool) + Send + 'static;

/// The three lifecycle events a server reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connection,
    Close,
    Message,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connection => "connection",
            EventKind::Close => "close",
            EventKind::Message => "message",
        }
    }
}

impl FromStr for EventKind {
    type Err = ServerError;

    fn from_str(name: &str) -> Result<Self> {
        match name {
            "connection" => Ok(EventKind::Connection),
            "close" => Ok(EventKind::Close),
            "message" => Ok(EventKind::Message),
            other => Err(ServerError::ConfigurationError(format!(
                "{}: '{other}' (expected 'connection', 'close' or 'message')",
                constants::ERR_UNKNOWN_EVENT
            ))),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A callback registered by event name
pub enum Handler {
    Socket(Box<SocketHandler>),
    Message(Box<MessageHandler>),
}

impl Handler {
    /// Handler for "connection" or "close"
    pub fn socket<F>(handler: F) -> Self
    where
        F: FnMut(&mut Socket<'_>) + Send + 'static,
    {
        Handler::Socket(Box::new(handler))
    }

    /// Handler for "message"
    pub fn message<F>(handler: F) -> Self
    where
        F: FnMut(&mut Socket<'_>, &[u8], bool) + Send + 'static,
    {
        Handler::Message(Box::new(handler))
    }
}

impl fmt::Debug for Handler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Handler::Socket(_) => f.write_str("Handler::Socket(..)"),
            Handler::Message(_) => f.write_str("Handler::Message(..)"),
        }
    }
}

/// One slot per event kind. Registering again replaces the previous callback.
#[derive(Default)]
pub struct Dispatcher {
    on_connection: Option<Box<SocketHandler>>,
    on_disconnection: Option<Box<SocketHandler>>,
    on_message: Option<Box<MessageHandler>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_connection(&mut self, handler: Box<SocketHandler>) {
        self.on_connection = Some(handler);
    }

    pub fn set_disconnection(&mut self, handler: Box<SocketHandler>) {
        self.on_disconnection = Some(handler);
    }

    pub fn set_message(&mut self, handler: Box<MessageHandler>) {
        self.on_message = Some(handler);
    }

    /// Register by event name; the handler shape must match the event.
    pub fn register(&mut self, event: &str, handler: Handler) -> Result<EventKind> {
        let kind = event.parse::<EventKind>()?;

        match (kind, handler) {
            (EventKind::Connection, Handler::Socket(h)) => self.set_connection(h),
            (EventKind::Close, Handler::Socket(h)) => self.set_disconnection(h),
            (EventKind::Message, Handler::Message(h)) => self.set_message(h),
            (kind, handler) => {
                return Err(ServerError::ConfigurationError(format!(
                    "{}: '{kind}' cannot take {handler:?}",
                    constants::ERR_HANDLER_MISMATCH
                )))
            }
        }

        Ok(kind)
    }

    pub fn is_registered(&self, kind: EventKind) -> bool {
        match kind {
            EventKind::Connection => self.on_connection.is_some(),
            EventKind::Close => self.on_disconnection.is_some(),
            EventKind::Message => self.on_message.is_some(),
        }
    }

    pub fn connection(&mut self, socket: &mut Socket<'_>) {
        match self.on_connection.as_mut() {
            Some(handler) => handler(socket),
            None => trace!(conn = %socket.handle(), "No connection handler; event dropped"),
        }
    }

    pub fn disconnection(&mut self, socket: &mut Socket<'_>) {
        match self.on_disconnection.as_mut() {
            Some(handler) => handler(socket),
            None => trace!(conn = %socket.handle(), "No close handler; event dropped"),
        }
    }

    pub fn message(&mut self, socket: &mut Socket<'_>, payload: &[u8], binary: bool) {
        match self.on_message.as_mut() {
            Some(handler) => handler(socket, payload, binary),
            None => trace!(conn = %socket.handle(), "No message handler; event dropped"),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("connection", &self.on_connection.is_some())
            .field("close", &self.on_disconnection.is_some())
            .field("message", &self.on_message.is_some())
            .finish()
    }
}
