//! End-to-end tests over real TCP connections

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use ws_event_server::{Result, Server, ServerError, ServerOptions};

type Log = Arc<Mutex<Vec<String>>>;

const WAIT: Duration = Duration::from_secs(5);

fn free_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("probe bind");
    listener.local_addr().expect("probe addr").port()
}

fn local_options(path: &str, time: u64, interval: u64, retry: u32) -> ServerOptions {
    ServerOptions::new(free_port(), path, time, interval, retry).with_host("127.0.0.1")
}

struct Running {
    port: u16,
    log: Log,
    closed: mpsc::UnboundedReceiver<u64>,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<()>>,
}

impl Running {
    async fn next_close(&mut self) -> u64 {
        timeout(WAIT, self.closed.recv())
            .await
            .expect("disconnection in time")
            .expect("server still running")
    }

    async fn stop(self) -> Vec<String> {
        let _ = self.stop.send(());
        timeout(WAIT, self.task)
            .await
            .expect("server stopped in time")
            .expect("server task")
            .expect("clean shutdown");
        let log = self.log.lock().unwrap().clone();
        log
    }
}

/// An echo server that labels each connection and records every callback
async fn start(options: ServerOptions) -> Running {
    let port = options.port;
    let mut server = Server::bind(options).await.expect("bind");

    let log: Log = Arc::new(Mutex::new(Vec::new()));
    let (closed_tx, closed) = mpsc::unbounded_channel();

    let l = log.clone();
    server.on_connection(move |socket| {
        let label = format!("client-{}", socket.id());
        socket.set_user(label);
        l.lock().unwrap().push("open".to_string());
    });

    let l = log.clone();
    server.on_message(move |socket, payload, binary| {
        l.lock()
            .unwrap()
            .push(format!("msg {payload:?} {binary}"));
        socket.send(payload, binary).expect("echo");
    });

    let l = log.clone();
    server.on_disconnection(move |socket| {
        let label: Option<String> = socket.take_user();
        l.lock()
            .unwrap()
            .push(format!("close {}", label.unwrap_or_default()));
        let _ = closed_tx.send(socket.id().get());
    });

    let (stop, stop_rx) = oneshot::channel::<()>();
    let task = tokio::spawn(async move {
        server
            .run_until(async move {
                let _ = stop_rx.await;
            })
            .await
    });

    Running {
        port,
        log,
        closed,
        stop,
        task,
    }
}

#[tokio::test]
async fn test_echo_and_lifecycle_order() {
    let mut running = start(local_options("/ws", 30, 5, 3)).await;

    let url = format!("ws://127.0.0.1:{}/ws", running.port);
    let (mut client, _) = connect_async(url).await.expect("connect");

    client.send(Message::Binary(vec![0x01, 0x02])).await.unwrap();
    let echoed = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(echoed, Message::Binary(vec![0x01, 0x02]));

    client.send(Message::Text("hi".to_string())).await.unwrap();
    let echoed = timeout(WAIT, client.next()).await.unwrap().unwrap().unwrap();
    assert_eq!(echoed, Message::Text("hi".to_string()));

    client.close(None).await.unwrap();
    while let Ok(Some(Ok(_))) = timeout(WAIT, client.next()).await {}

    let closed_id = running.next_close().await;
    assert_eq!(closed_id, 1);

    let log = running.stop().await;
    assert_eq!(
        log,
        vec![
            "open".to_string(),
            "msg [1, 2] true".to_string(),
            "msg [104, 105] false".to_string(),
            "close client-conn#1".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_wrong_path_is_rejected() {
    let running = start(local_options("/ws", 30, 5, 3)).await;

    let url = format!("ws://127.0.0.1:{}/other", running.port);
    match connect_async(url).await {
        Err(WsError::Http(response)) => assert_eq!(response.status().as_u16(), 404),
        Err(other) => panic!("unexpected handshake error: {other}"),
        Ok(_) => panic!("handshake on the wrong path succeeded"),
    }

    let url = format!("ws://127.0.0.1:{}/ws", running.port);
    let (mut client, _) = connect_async(url).await.expect("right path accepted");
    client.send(Message::Text("still here".to_string())).await.unwrap();
    let _ = timeout(WAIT, client.next()).await.unwrap();

    let log = running.stop().await;
    assert_eq!(log.iter().filter(|e| *e == "open").count(), 1);
}

#[tokio::test]
async fn test_silent_peer_closed_by_keep_alive() {
    let mut running = start(local_options("/ws", 1, 1, 1)).await;

    let url = format!("ws://127.0.0.1:{}/ws", running.port);
    // Never polled, so probes go unanswered.
    let (_client, _) = connect_async(url).await.expect("connect");

    running.next_close().await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(running.closed.try_recv().is_err());

    let log = running.stop().await;
    assert_eq!(log.iter().filter(|e| e.starts_with("close")).count(), 1);
}

#[tokio::test]
async fn test_shutdown_delivers_close_to_open_connections() {
    let running = start(local_options("/ws", 30, 5, 3)).await;

    let url = format!("ws://127.0.0.1:{}/ws", running.port);
    let (mut client, _) = connect_async(url).await.expect("connect");
    client.send(Message::Text("ping".to_string())).await.unwrap();
    let _ = timeout(WAIT, client.next()).await.unwrap();

    let log = running.stop().await;
    assert_eq!(log.last().map(String::as_str), Some("close client-conn#1"));

    // The client is told the session is over.
    let ended = timeout(WAIT, async {
        loop {
            match client.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await;
    assert!(ended.is_ok());
}

#[tokio::test]
async fn test_port_in_use_is_bind_error() {
    let options = local_options("/ws", 30, 5, 3);
    let _first = Server::bind(options.clone()).await.expect("first bind");

    let err = Server::bind(options).await.unwrap_err();
    assert!(matches!(err, ServerError::BindError(_)));
}

#[tokio::test]
async fn test_invalid_options_rejected_before_bind() {
    let options = ServerOptions::new(free_port(), "ws", 30, 5, 3).with_host("127.0.0.1");
    let err = Server::bind(options).await.unwrap_err();
    assert!(matches!(err, ServerError::ConfigurationError(_)));
}
