use crate::core::connection::Connection;
use crate::core::handle::{ConnectionId, ExtensionId, SocketRef};
use crate::engine::FrameWriter;
use crate::error::Result;
use crate::utils::metrics::Metrics;
use std::any::Any;
use std::fmt;
use std::net::SocketAddr;

/// A view of one live connection, handed to a callback.
///
/// The view borrows the server's connection record and the engine's
/// writer, so it is only usable for the duration of the callback. Keep
/// [`Socket::handle`] to refer to the connection afterwards.
pub struct Socket<'a> {
    connection: &'a mut Connection,
    writer: &'a dyn FrameWriter,
    metrics: &'a Metrics,
}

impl<'a> Socket<'a> {
    pub(crate) fn new(
        connection: &'a mut Connection,
        writer: &'a dyn FrameWriter,
        metrics: &'a Metrics,
    ) -> Self {
        Self {
            connection,
            writer,
            metrics,
        }
    }

    /// Wrap this view into its boundary-visible form.
    pub fn handle(&self) -> SocketRef {
        self.connection.handle
    }

    pub fn id(&self) -> ConnectionId {
        self.connection.handle.transport()
    }

    pub fn extension(&self) -> Option<ExtensionId> {
        self.connection.handle.extension()
    }

    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.connection.peer
    }

    /// Whether a close has been requested or the connection is going away
    pub fn is_closing(&self) -> bool {
        self.connection.closing
    }

    /// Queue `payload` to the peer as a binary or text frame.
    ///
    /// Fails with `TransportError` if the connection is closed or closing,
    /// or if a text payload is not valid UTF-8.
    pub fn send(&self, payload: &[u8], binary: bool) -> Result<()> {
        self.connection
            .send(self.writer, self.metrics, payload, binary)
    }

    pub fn send_text(&self, text: &str) -> Result<()> {
        self.send(text.as_bytes(), false)
    }

    pub fn send_binary(&self, payload: &[u8]) -> Result<()> {
        self.send(payload, true)
    }

    /// Request a close. The disconnection callback runs on a later loop turn.
    pub fn close(&mut self) -> Result<()> {
        self.connection.close(self.writer)
    }

    pub fn user<T: Any>(&self) -> Option<&T> {
        self.connection.user.get::<T>()
    }

    pub fn user_mut<T: Any>(&mut self) -> Option<&mut T> {
        self.connection.user.get_mut::<T>()
    }

    pub fn set_user<T: Any + Send>(&mut self, value: T) {
        self.connection.user.set(value);
    }

    pub fn take_user<T: Any>(&mut self) -> Option<T> {
        self.connection.user.take::<T>()
    }

    pub fn clear_user(&mut self) {
        self.connection.user.clear();
    }

    pub fn has_user(&self) -> bool {
        !self.connection.user.is_empty()
    }
}

impl PartialEq for Socket<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.handle() == other.handle()
    }
}

impl fmt::Debug for Socket<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Socket")
            .field("handle", &self.connection.handle)
            .field("peer", &self.connection.peer)
            .field("closing", &self.connection.closing)
            .field("user", &self.connection.user)
            .finish()
    }
}
