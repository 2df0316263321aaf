//! # In-Memory Engine
//!
//! An engine with no sockets behind it. A [`MemoryPeer`] plays the remote
//! side: it opens connections, delivers messages, hangs up or breaks the
//! protocol, and inspects what the server wrote back.
//!
//! Useful for exercising callback logic deterministically, and for
//! embedders that terminate WebSockets elsewhere and only want the
//! server's connection bookkeeping.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use crate::config::KeepAlive;
use crate::core::handle::{ConnectionId, ExtensionId};
use crate::engine::{CloseReason, Engine, EngineEvent, FrameWriter};
use crate::error::{constants, Result, ServerError};

/// A frame the server wrote to a memory connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub payload: Bytes,
    pub binary: bool,
}

#[derive(Debug, Default)]
struct PeerConnection {
    open: bool,
    sent: Vec<SentFrame>,
    keep_alive: Option<KeepAlive>,
}

#[derive(Debug, Default)]
struct Shared {
    next_id: u64,
    connections: HashMap<ConnectionId, PeerConnection>,
    // Closes requested by the server side. Peer traffic already in the
    // channel was sent before the close and is moved ahead of it.
    pending: VecDeque<EngineEvent>,
    shut_down: bool,
}

impl Shared {
    fn connection_mut(&mut self, id: ConnectionId) -> Result<&mut PeerConnection> {
        self.connections
            .get_mut(&id)
            .ok_or_else(|| ServerError::transport(constants::ERR_UNKNOWN_CONNECTION))
    }

    fn open_connection_mut(&mut self, id: ConnectionId) -> Result<&mut PeerConnection> {
        let connection = self.connection_mut(id)?;
        if connection.open {
            Ok(connection)
        } else {
            Err(ServerError::transport(constants::ERR_CONNECTION_CLOSED))
        }
    }
}

fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Engine half, owned by the `Server`
#[derive(Debug)]
pub struct MemoryEngine {
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedReceiver<EngineEvent>,
}

/// Remote half, kept by the test or embedder
#[derive(Debug, Clone)]
pub struct MemoryPeer {
    shared: Arc<Mutex<Shared>>,
    events: mpsc::UnboundedSender<EngineEvent>,
}

impl MemoryEngine {
    /// Create a connected engine/peer pair
    pub fn pair() -> (MemoryEngine, MemoryPeer) {
        let shared = Arc::new(Mutex::new(Shared {
            next_id: 1,
            ..Shared::default()
        }));
        let (tx, rx) = mpsc::unbounded_channel();

        (
            MemoryEngine {
                shared: shared.clone(),
                events: rx,
            },
            MemoryPeer { shared, events: tx },
        )
    }

    fn take_pending(&mut self) -> Option<EngineEvent> {
        let mut shared = lock(&self.shared);
        if shared.pending.is_empty() {
            return None;
        }

        // A closed connection refuses further peer sends, so whatever is
        // still queued in the channel predates every pending close.
        let mut queued = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            queued.push(event);
        }
        for event in queued.into_iter().rev() {
            shared.pending.push_front(event);
        }

        shared.pending.pop_front()
    }

    fn is_shut_down(&self) -> bool {
        lock(&self.shared).shut_down
    }
}

impl FrameWriter for MemoryEngine {
    fn write_frame(&self, id: ConnectionId, payload: &[u8], binary: bool) -> Result<()> {
        if !binary && std::str::from_utf8(payload).is_err() {
            return Err(ServerError::transport(constants::ERR_TEXT_NOT_UTF8));
        }

        let mut shared = lock(&self.shared);
        shared.open_connection_mut(id)?.sent.push(SentFrame {
            payload: Bytes::copy_from_slice(payload),
            binary,
        });
        Ok(())
    }

    fn close(&self, id: ConnectionId) -> Result<()> {
        let mut shared = lock(&self.shared);
        shared.open_connection_mut(id)?.open = false;
        shared.pending.push_back(EngineEvent::Closed {
            id,
            reason: CloseReason::Local,
        });
        Ok(())
    }
}

impl Engine for MemoryEngine {
    async fn poll_event(&mut self) -> Option<EngineEvent> {
        if let Some(event) = self.take_pending() {
            return Some(event);
        }
        if self.is_shut_down() {
            return None;
        }
        self.events.recv().await
    }

    fn configure_keep_alive(&mut self, id: ConnectionId, keep_alive: KeepAlive) -> Result<()> {
        lock(&self.shared).open_connection_mut(id)?.keep_alive = Some(keep_alive);
        Ok(())
    }

    fn shutdown(&mut self) {
        let mut shared = lock(&self.shared);
        if shared.shut_down {
            return;
        }
        shared.shut_down = true;

        // Queued peer traffic is delivered before the shutdown closes.
        while let Ok(event) = self.events.try_recv() {
            shared.pending.push_back(event);
        }

        let mut open: Vec<ConnectionId> = shared
            .connections
            .iter()
            .filter(|(_, c)| c.open)
            .map(|(id, _)| *id)
            .collect();
        open.sort();

        for id in open {
            if let Some(connection) = shared.connections.get_mut(&id) {
                connection.open = false;
            }
            shared.pending.push_back(EngineEvent::Closed {
                id,
                reason: CloseReason::Shutdown,
            });
        }
        debug!("Memory engine shut down");
    }
}

impl MemoryPeer {
    /// Complete a handshake and return the new connection's id
    pub fn connect(&self) -> Result<ConnectionId> {
        self.connect_with_extension(None)
    }

    /// Complete a handshake for a connection carrying an extension context
    pub fn connect_with_extension(&self, extension: Option<ExtensionId>) -> Result<ConnectionId> {
        let mut shared = lock(&self.shared);
        if shared.shut_down {
            return Err(ServerError::transport(constants::ERR_ENGINE_SHUT_DOWN));
        }

        let id = ConnectionId::new(shared.next_id)
            .ok_or_else(|| ServerError::transport(constants::ERR_UNKNOWN_CONNECTION))?;
        shared.next_id += 1;
        shared.connections.insert(
            id,
            PeerConnection {
                open: true,
                ..PeerConnection::default()
            },
        );

        self.emit(EngineEvent::Opened {
            id,
            extension,
            peer: None,
        })?;
        Ok(id)
    }

    pub fn send_text(&self, id: ConnectionId, text: &str) -> Result<()> {
        self.deliver(id, Bytes::copy_from_slice(text.as_bytes()), false)
    }

    pub fn send_binary(&self, id: ConnectionId, payload: &[u8]) -> Result<()> {
        self.deliver(id, Bytes::copy_from_slice(payload), true)
    }

    /// Hang up gracefully
    pub fn disconnect(&self, id: ConnectionId) -> Result<()> {
        self.terminate(id, CloseReason::Peer)
    }

    /// Break the protocol; the server sees an ordinary disconnection
    pub fn violate(&self, id: ConnectionId, detail: &str) -> Result<()> {
        self.terminate(id, CloseReason::ProtocolViolation(detail.to_string()))
    }

    /// Stop answering keep-alive probes until the policy gives up
    pub fn expire(&self, id: ConnectionId) -> Result<()> {
        self.terminate(id, CloseReason::KeepAliveTimeout)
    }

    /// Frames the server has written to `id` so far
    pub fn sent(&self, id: ConnectionId) -> Vec<SentFrame> {
        lock(&self.shared)
            .connections
            .get(&id)
            .map(|c| c.sent.clone())
            .unwrap_or_default()
    }

    /// The keep-alive policy the server applied to `id`
    pub fn keep_alive(&self, id: ConnectionId) -> Option<KeepAlive> {
        lock(&self.shared)
            .connections
            .get(&id)
            .and_then(|c| c.keep_alive)
    }

    pub fn is_open(&self, id: ConnectionId) -> bool {
        lock(&self.shared)
            .connections
            .get(&id)
            .is_some_and(|c| c.open)
    }

    fn deliver(&self, id: ConnectionId, payload: Bytes, binary: bool) -> Result<()> {
        lock(&self.shared).open_connection_mut(id)?;
        self.emit(EngineEvent::Message {
            id,
            payload,
            binary,
        })
    }

    fn terminate(&self, id: ConnectionId, reason: CloseReason) -> Result<()> {
        lock(&self.shared).open_connection_mut(id)?.open = false;
        self.emit(EngineEvent::Closed { id, reason })
    }

    fn emit(&self, event: EngineEvent) -> Result<()> {
        self.events
            .send(event)
            .map_err(|_| ServerError::transport(constants::ERR_ENGINE_SHUT_DOWN))
    }
}
