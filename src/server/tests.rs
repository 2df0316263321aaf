// test-only module included via server/mod.rs
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use crate::config::ServerOptions;
use crate::core::handle::{ExtensionId, SocketRef};
use crate::engine::{MemoryEngine, MemoryPeer};
use crate::error::ServerError;
use crate::server::{Handler, Server};

type Log = Arc<Mutex<Vec<String>>>;

fn server() -> (Server<MemoryEngine>, MemoryPeer) {
    let (engine, peer) = MemoryEngine::pair();
    let options = ServerOptions::new(8080, "/ws", 30, 5, 3);
    let server = Server::with_engine(options, engine).expect("valid options");
    (server, peer)
}

fn recording(server: &mut Server<MemoryEngine>) -> Log {
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    server.on_connection(move |socket| {
        l.lock().unwrap().push(format!("open {}", socket.id().get()));
    });
    let l = log.clone();
    server.on_message(move |socket, payload, binary| {
        l.lock()
            .unwrap()
            .push(format!("msg {} {:?} {}", socket.id().get(), payload, binary));
    });
    let l = log.clone();
    server.on_disconnection(move |socket| {
        l.lock().unwrap().push(format!("close {}", socket.id().get()));
    });

    log
}

async fn pump(server: &mut Server<MemoryEngine>, turns: usize) {
    for _ in 0..turns {
        assert!(server.run_once().await, "engine ended early");
    }
}

#[tokio::test]
async fn test_lifecycle_order() {
    let (mut server, peer) = server();
    let log = recording(&mut server);

    let id = peer.connect().unwrap();
    peer.send_binary(id, &[0x01, 0x02]).unwrap();
    peer.send_text(id, "hi").unwrap();
    peer.disconnect(id).unwrap();
    pump(&mut server, 4).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "open 1".to_string(),
            "msg 1 [1, 2] true".to_string(),
            "msg 1 [104, 105] false".to_string(),
            "close 1".to_string(),
        ]
    );
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_user_slot_cleared_then_released_after_close() {
    struct Token(Arc<AtomicUsize>);
    impl Drop for Token {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    let (mut server, peer) = server();
    let drops = Arc::new(AtomicUsize::new(0));
    let seen_empty = Arc::new(AtomicUsize::new(0));

    let d = drops.clone();
    let e = seen_empty.clone();
    server.on_connection(move |socket| {
        if !socket.has_user() {
            e.fetch_add(1, Ordering::SeqCst);
        }
        socket.set_user(Token(d.clone()));
    });
    let d = drops.clone();
    server.on_disconnection(move |socket| {
        // Still attached while the close callback runs.
        assert!(socket.user::<Token>().is_some());
        assert_eq!(d.load(Ordering::SeqCst), 0);
    });

    let id = peer.connect().unwrap();
    peer.disconnect(id).unwrap();
    pump(&mut server, 2).await;

    assert_eq!(seen_empty.load(Ordering::SeqCst), 1);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_user_data_roundtrip_through_ref() {
    let (mut server, peer) = server();
    let handle: Arc<Mutex<Option<SocketRef>>> = Arc::new(Mutex::new(None));

    let h = handle.clone();
    server.on_connection(move |socket| {
        *h.lock().unwrap() = Some(socket.handle());
    });

    peer.connect().unwrap();
    pump(&mut server, 1).await;

    let socket = handle.lock().unwrap().expect("connection seen");
    server.set_user_data(socket, String::from("alice")).unwrap();
    assert_eq!(
        server.user_data::<String>(socket).unwrap().map(String::as_str),
        Some("alice")
    );
    assert_eq!(server.user_data::<u64>(socket).unwrap(), None);
    assert_eq!(
        server.take_user_data::<String>(socket).unwrap(),
        Some("alice".to_string())
    );
    assert_eq!(server.user_data::<String>(socket).unwrap(), None);
}

#[tokio::test]
async fn test_send_after_disconnection_fails() {
    let (mut server, peer) = server();
    let handle: Arc<Mutex<Option<SocketRef>>> = Arc::new(Mutex::new(None));
    let close_send_failed = Arc::new(AtomicUsize::new(0));

    let h = handle.clone();
    server.on_connection(move |socket| {
        *h.lock().unwrap() = Some(socket.handle());
    });
    let c = close_send_failed.clone();
    server.on_disconnection(move |socket| {
        if let Err(ServerError::TransportError(_)) = socket.send(b"bye", false) {
            c.fetch_add(1, Ordering::SeqCst);
        }
    });

    let id = peer.connect().unwrap();
    pump(&mut server, 1).await;
    let socket = handle.lock().unwrap().expect("connection seen");
    server.send(socket, b"hello", false).unwrap();

    peer.disconnect(id).unwrap();
    pump(&mut server, 1).await;

    assert_eq!(close_send_failed.load(Ordering::SeqCst), 1);
    assert!(matches!(
        server.send(socket, b"late", true),
        Err(ServerError::TransportError(_))
    ));
    assert!(server.set_user_data(socket, 1u8).is_err());
    assert!(server.socket(socket).is_err());
    assert_eq!(peer.sent(id).len(), 1);
    assert_eq!(server.metrics().send_failures, 1);
}

#[tokio::test]
async fn test_reregistering_replaces_callback() {
    let (mut server, peer) = server();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));

    let a = first.clone();
    server.on_message(move |_, _, _| {
        a.fetch_add(1, Ordering::SeqCst);
    });
    let b = second.clone();
    server
        .on(
            "message",
            Handler::message(move |_, _, _| {
                b.fetch_add(1, Ordering::SeqCst);
            }),
        )
        .unwrap();

    let id = peer.connect().unwrap();
    peer.send_text(id, "one").unwrap();
    peer.send_text(id, "two").unwrap();
    pump(&mut server, 3).await;

    assert_eq!(first.load(Ordering::SeqCst), 0);
    assert_eq!(second.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_close_inside_message_defers_disconnection() {
    let (mut server, peer) = server();
    let log = recording(&mut server);

    let l = log.clone();
    server.on_message(move |socket, _, _| {
        socket.close().unwrap();
        // Closing again is harmless; sending is not.
        socket.close().unwrap();
        assert!(socket.send(b"x", true).is_err());
        l.lock().unwrap().push("closed in message".to_string());
    });

    let id = peer.connect().unwrap();
    peer.send_text(id, "quit").unwrap();
    pump(&mut server, 2).await;
    assert_eq!(
        *log.lock().unwrap(),
        vec!["open 1".to_string(), "closed in message".to_string()]
    );

    pump(&mut server, 1).await;
    assert_eq!(log.lock().unwrap().last().map(String::as_str), Some("close 1"));
    assert!(!peer.is_open(id));
}

#[tokio::test]
async fn test_messages_sent_before_close_still_delivered() {
    let (mut server, peer) = server();
    let log: Log = Arc::new(Mutex::new(Vec::new()));

    let l = log.clone();
    server.on_message(move |socket, payload, _| {
        let text = String::from_utf8_lossy(payload).into_owned();
        if text == "quit" {
            socket.close().unwrap();
        }
        l.lock().unwrap().push(text);
    });
    let l = log.clone();
    server.on_disconnection(move |_| {
        l.lock().unwrap().push("close".to_string());
    });

    let id = peer.connect().unwrap();
    peer.send_text(id, "quit").unwrap();
    peer.send_text(id, "after-1").unwrap();
    pump(&mut server, 4).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec!["quit".to_string(), "after-1".to_string(), "close".to_string()]
    );
    assert!(peer.send_text(id, "after-2").is_err());
    assert_eq!(server.connection_count(), 0);
}

#[tokio::test]
async fn test_protocol_violation_is_plain_disconnection() {
    let (mut server, peer) = server();
    let log = recording(&mut server);

    let a = peer.connect().unwrap();
    let b = peer.connect().unwrap();
    peer.violate(a, "reserved opcode").unwrap();
    peer.expire(b).unwrap();
    pump(&mut server, 4).await;

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "open 1".to_string(),
            "open 2".to_string(),
            "close 1".to_string(),
            "close 2".to_string(),
        ]
    );
    let metrics = server.metrics();
    assert_eq!(metrics.protocol_violations, 1);
    assert_eq!(metrics.keep_alive_timeouts, 1);
    assert_eq!(metrics.connections_active, 0);
}

#[tokio::test]
async fn test_keep_alive_and_extension_applied() {
    let (mut server, peer) = server();
    let seen: Arc<Mutex<Option<SocketRef>>> = Arc::new(Mutex::new(None));

    let s = seen.clone();
    server.on_connection(move |socket| {
        *s.lock().unwrap() = Some(socket.handle());
    });

    let id = peer.connect_with_extension(ExtensionId::new(77)).unwrap();
    pump(&mut server, 1).await;

    let handle = seen.lock().unwrap().expect("connection seen");
    assert_eq!(handle.extension(), ExtensionId::new(77));
    assert_eq!(handle.into_raw(), (id.get(), 77));

    let keep_alive = peer.keep_alive(id).expect("keep-alive configured");
    assert_eq!(keep_alive, server.options().keep_alive());
}

#[tokio::test]
async fn test_missing_callbacks_are_noops() {
    let (mut server, peer) = server();
    let id = peer.connect().unwrap();
    peer.send_binary(id, &[9]).unwrap();
    peer.disconnect(id).unwrap();
    pump(&mut server, 3).await;

    let metrics = server.metrics();
    assert_eq!(metrics.connections_total, 1);
    assert_eq!(metrics.messages_received, 1);
}

#[tokio::test]
async fn test_shutdown_closes_every_connection_once() {
    let (mut server, peer) = server();
    let log = recording(&mut server);

    peer.connect().unwrap();
    peer.connect().unwrap();
    pump(&mut server, 2).await;

    server.shutdown().await.unwrap();

    let log = log.lock().unwrap();
    assert_eq!(log.iter().filter(|e| e.starts_with("close")).count(), 2);
    assert_eq!(server.connection_count(), 0);
    assert!(!server.run_once().await);
}

#[tokio::test]
async fn test_run_returns_when_peer_gone() {
    let (mut server, peer) = server();
    let log = recording(&mut server);

    let id = peer.connect().unwrap();
    peer.disconnect(id).unwrap();
    drop(peer);

    server.run().await.unwrap();
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[test]
fn test_invalid_options_rejected() {
    let (engine, _peer) = MemoryEngine::pair();
    let options = ServerOptions::new(0, "ws", 30, 5, 3);
    let err = Server::with_engine(options, engine).unwrap_err();
    assert!(matches!(err, ServerError::ConfigurationError(_)));
}

#[test]
fn test_unknown_event_name_rejected() {
    let (mut server, _peer) = server();
    let err = server
        .on("disconnect", Handler::socket(|_| {}))
        .unwrap_err();
    assert!(matches!(err, ServerError::ConfigurationError(_)));
}
