use crate::core::handle::SocketRef;
use crate::core::user_data::UserData;
use crate::engine::FrameWriter;
use crate::error::{constants, Result, ServerError};
use crate::utils::metrics::Metrics;
use std::net::SocketAddr;
use std::time::Instant;

/// The server's record of one live connection.
#[derive(Debug)]
pub(crate) struct Connection {
    pub(crate) handle: SocketRef,
    pub(crate) peer: Option<SocketAddr>,
    pub(crate) user: UserData,
    pub(crate) closing: bool,
    pub(crate) opened_at: Instant,
    pub(crate) messages_in: u64,
}

impl Connection {
    pub(crate) fn new(handle: SocketRef, peer: Option<SocketAddr>) -> Self {
        Self {
            handle,
            peer,
            user: UserData::new(),
            closing: false,
            opened_at: Instant::now(),
            messages_in: 0,
        }
    }

    /// Write one frame through `writer`, refusing once the connection is closing.
    pub(crate) fn send(
        &self,
        writer: &dyn FrameWriter,
        metrics: &Metrics,
        payload: &[u8],
        binary: bool,
    ) -> Result<()> {
        if self.closing {
            metrics.send_failed();
            return Err(ServerError::transport(constants::ERR_CONNECTION_CLOSED));
        }

        match writer.write_frame(self.handle.transport(), payload, binary) {
            Ok(()) => {
                metrics.message_sent(payload.len() as u64);
                Ok(())
            }
            Err(e) => {
                metrics.send_failed();
                Err(e)
            }
        }
    }

    /// Ask the engine to close; a second call while closing is a no-op.
    pub(crate) fn close(&mut self, writer: &dyn FrameWriter) -> Result<()> {
        if self.closing {
            return Ok(());
        }
        writer.close(self.handle.transport())?;
        self.closing = true;
        Ok(())
    }
}
