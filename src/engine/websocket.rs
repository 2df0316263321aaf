//! # WebSocket Engine
//!
//! TCP listener plus RFC 6455 framing via `tokio-tungstenite`.
//!
//! ## Responsibilities
//! - Bind the listening socket and accept connections
//! - Complete the upgrade handshake, rejecting requests for any other path
//! - Run one task per connection that forwards inbound messages, writes
//!   queued frames and enforces the keep-alive policy
//! - Funnel every connection's events through one ordered channel
//!
//! Connection tasks run concurrently, but a connection only ever talks to
//! the server through the event channel, so its events stay in order.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout, Instant};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message as WsMessage};
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, trace, warn};

use crate::config::{KeepAlive, ServerOptions};
use crate::core::handle::ConnectionId;
use crate::engine::{CloseReason, Engine, EngineEvent, FrameWriter};
use crate::error::{constants, Result, ServerError};

/// Work queued for a connection task
#[derive(Debug)]
enum Outbound {
    Frame(WsMessage),
    KeepAlive(KeepAlive),
    Close,
}

/// What connection tasks report to the engine
enum Inbound {
    Opened {
        id: ConnectionId,
        peer: SocketAddr,
        outbound: mpsc::UnboundedSender<Outbound>,
    },
    Event(EngineEvent),
}

/// Settings shared by the accept loop and every connection task
struct Settings {
    path: String,
    keep_alive: KeepAlive,
    handshake_timeout: std::time::Duration,
    ws_config: WebSocketConfig,
}

/// Engine serving WebSocket connections on one TCP endpoint
pub struct WebSocketEngine {
    local_addr: SocketAddr,
    events: mpsc::UnboundedReceiver<Inbound>,
    writers: HashMap<ConnectionId, mpsc::UnboundedSender<Outbound>>,
    shutdown: CancellationToken,
}

impl WebSocketEngine {
    /// Bind the listener described by `options` and start accepting.
    ///
    /// Fails with `BindError` when the address is in use or not permitted.
    #[instrument(skip(options), fields(port = options.port, path = %options.path))]
    pub async fn bind(options: &ServerOptions) -> Result<Self> {
        let address = options.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|e| ServerError::BindError(format!("{address}: {e}")))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| ServerError::BindError(format!("{address}: {e}")))?;

        info!(address = %local_addr, path = %options.path, "WebSocket endpoint listening");

        let mut ws_config = WebSocketConfig::default();
        ws_config.max_message_size = Some(options.max_message_size);
        ws_config.max_frame_size = Some(options.max_message_size);

        let settings = Arc::new(Settings {
            path: options.path.clone(),
            keep_alive: options.keep_alive(),
            handshake_timeout: options.handshake_timeout(),
            ws_config,
        });

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let shutdown = CancellationToken::new();

        tokio::spawn(accept_loop(listener, settings, events_tx, shutdown.clone()));

        Ok(Self {
            local_addr,
            events: events_rx,
            writers: HashMap::new(),
            shutdown,
        })
    }

    /// The address actually bound (useful when binding port 0 in embedders)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    fn writer(&self, id: ConnectionId) -> Result<&mpsc::UnboundedSender<Outbound>> {
        self.writers
            .get(&id)
            .ok_or_else(|| ServerError::transport(constants::ERR_UNKNOWN_CONNECTION))
    }
}

impl FrameWriter for WebSocketEngine {
    fn write_frame(&self, id: ConnectionId, payload: &[u8], binary: bool) -> Result<()> {
        let message = if binary {
            WsMessage::Binary(payload.to_vec())
        } else {
            let text = std::str::from_utf8(payload)
                .map_err(|_| ServerError::transport(constants::ERR_TEXT_NOT_UTF8))?;
            WsMessage::Text(text.to_owned())
        };

        self.writer(id)?
            .send(Outbound::Frame(message))
            .map_err(|_| ServerError::transport(constants::ERR_WRITER_GONE))
    }

    fn close(&self, id: ConnectionId) -> Result<()> {
        self.writer(id)?
            .send(Outbound::Close)
            .map_err(|_| ServerError::transport(constants::ERR_WRITER_GONE))
    }
}

impl Engine for WebSocketEngine {
    async fn poll_event(&mut self) -> Option<EngineEvent> {
        match self.events.recv().await? {
            Inbound::Opened { id, peer, outbound } => {
                self.writers.insert(id, outbound);
                Some(EngineEvent::Opened {
                    id,
                    extension: None,
                    peer: Some(peer),
                })
            }
            Inbound::Event(event) => {
                if let EngineEvent::Closed { id, .. } = &event {
                    self.writers.remove(id);
                }
                Some(event)
            }
        }
    }

    fn configure_keep_alive(&mut self, id: ConnectionId, keep_alive: KeepAlive) -> Result<()> {
        self.writer(id)?
            .send(Outbound::KeepAlive(keep_alive))
            .map_err(|_| ServerError::transport(constants::ERR_WRITER_GONE))
    }

    fn shutdown(&mut self) {
        info!(address = %self.local_addr, "Shutting down WebSocket endpoint");
        self.shutdown.cancel();
    }
}

impl Drop for WebSocketEngine {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

async fn accept_loop(
    listener: TcpListener,
    settings: Arc<Settings>,
    events: mpsc::UnboundedSender<Inbound>,
    shutdown: CancellationToken,
) {
    let mut next_id: u64 = 1;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                debug!("Accept loop stopped");
                break;
            }

            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, peer)) => {
                        let Some(id) = ConnectionId::new(next_id) else {
                            continue;
                        };
                        next_id += 1;

                        tokio::spawn(drive_connection(
                            id,
                            stream,
                            peer,
                            settings.clone(),
                            events.clone(),
                            shutdown.clone(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                    }
                }
            }
        }
    }
}

#[instrument(skip(stream, settings, events, shutdown), fields(conn = %id, peer = %peer))]
async fn drive_connection(
    id: ConnectionId,
    stream: TcpStream,
    peer: SocketAddr,
    settings: Arc<Settings>,
    events: mpsc::UnboundedSender<Inbound>,
    shutdown: CancellationToken,
) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "Failed to set TCP_NODELAY");
    }

    let expected_path = settings.path.clone();
    let check_path = move |request: &Request, response: Response| {
        if request.uri().path() == expected_path {
            Ok(response)
        } else {
            let mut rejection = ErrorResponse::new(Some(format!(
                "no WebSocket endpoint at {}",
                request.uri().path()
            )));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            Err(rejection)
        }
    };

    let handshake = accept_hdr_async_with_config(stream, check_path, Some(settings.ws_config.clone()));
    let mut ws = tokio::select! {
        _ = shutdown.cancelled() => return,
        result = timeout(settings.handshake_timeout, handshake) => match result {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                warn!(error = %e, "WebSocket handshake failed");
                return;
            }
            Err(_) => {
                warn!("WebSocket handshake timed out");
                return;
            }
        },
    };

    let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
    if events
        .send(Inbound::Opened {
            id,
            peer,
            outbound: outbound_tx,
        })
        .is_err()
    {
        return;
    }
    debug!("WebSocket session established");

    let reason = pump(id, &mut ws, outbound_rx, &settings, &events, &shutdown).await;
    debug!(reason = %reason, "WebSocket session ended");

    let _ = events.send(Inbound::Event(EngineEvent::Closed { id, reason }));
}

/// Move frames both ways and run the keep-alive clock until the session ends.
async fn pump(
    id: ConnectionId,
    ws: &mut WebSocketStream<TcpStream>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
    settings: &Settings,
    events: &mpsc::UnboundedSender<Inbound>,
    shutdown: &CancellationToken,
) -> CloseReason {
    let mut keep_alive = settings.keep_alive;
    let mut unanswered: u32 = 0;
    let idle = sleep(keep_alive.time);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                let _ = ws.close(None).await;
                return CloseReason::Shutdown;
            }

            inbound = ws.next() => {
                let message = match inbound {
                    Some(Ok(message)) => message,
                    Some(Err(e)) => return close_reason_for(e),
                    None => return CloseReason::Peer,
                };

                // Any traffic, pongs included, proves the peer alive.
                unanswered = 0;
                idle.as_mut().reset(Instant::now() + keep_alive.time);

                let event = match message {
                    WsMessage::Text(text) => EngineEvent::Message {
                        id,
                        payload: text.into(),
                        binary: false,
                    },
                    WsMessage::Binary(data) => EngineEvent::Message {
                        id,
                        payload: data.into(),
                        binary: true,
                    },
                    // Close replies are flushed by the next read, which then ends the stream.
                    WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Close(_) | WsMessage::Frame(_) => {
                        continue;
                    }
                };

                if events.send(Inbound::Event(event)).is_err() {
                    return CloseReason::Shutdown;
                }
            }

            queued = outbound.recv() => {
                match queued {
                    Some(Outbound::Frame(message)) => {
                        if let Err(e) = ws.send(message).await {
                            return close_reason_for(e);
                        }
                    }
                    Some(Outbound::KeepAlive(updated)) => {
                        trace!(?updated, "Keep-alive policy applied");
                        keep_alive = updated;
                        unanswered = 0;
                        idle.as_mut().reset(Instant::now() + keep_alive.time);
                    }
                    Some(Outbound::Close) | None => {
                        let _ = ws.close(None).await;
                        return CloseReason::Local;
                    }
                }
            }

            () = &mut idle => {
                if unanswered >= keep_alive.retries {
                    warn!(probes = unanswered, "Peer stopped answering keep-alive probes");
                    return CloseReason::KeepAliveTimeout;
                }
                unanswered += 1;
                trace!(probe = unanswered, "Sending keep-alive probe");
                if let Err(e) = ws.send(WsMessage::Ping(Vec::new())).await {
                    return close_reason_for(e);
                }
                idle.as_mut().reset(Instant::now() + keep_alive.interval);
            }
        }
    }
}

fn close_reason_for(error: WsError) -> CloseReason {
    match error {
        WsError::ConnectionClosed | WsError::AlreadyClosed => CloseReason::Peer,
        WsError::Io(e) => CloseReason::Io(e.to_string()),
        other => CloseReason::ProtocolViolation(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_reason_mapping() {
        assert_eq!(close_reason_for(WsError::ConnectionClosed), CloseReason::Peer);
        assert_eq!(close_reason_for(WsError::AlreadyClosed), CloseReason::Peer);
        assert!(matches!(
            close_reason_for(WsError::Io(std::io::Error::other("reset"))),
            CloseReason::Io(_)
        ));
        assert!(matches!(
            close_reason_for(WsError::Utf8),
            CloseReason::ProtocolViolation(_)
        ));
    }
}
