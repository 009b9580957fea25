//! Socket.IO transport integration tests
//!
//! Each test runs a minimal Engine.IO v4 / Socket.IO server on a local
//! `tokio-tungstenite` listener and drives `SocketIoTransport` against it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::json;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use contextform::transport::socketio::{SocketIoOptions, SocketIoTransport};
use contextform::transport::{Transport, TransportEvent};

const OPEN: &str =
    r#"0{"sid":"engine-sid","upgrades":[],"pingInterval":25000,"pingTimeout":20000,"maxPayload":1000000}"#;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn listen() -> (TcpListener, url::Url) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let url = url::Url::parse(&format!("http://{addr}")).expect("url");
    (listener, url)
}

/// Accept one websocket and complete the Socket.IO handshake.
async fn accept_socket(listener: &TcpListener) -> WebSocketStream<TcpStream> {
    let (stream, _) = listener.accept().await.expect("accept");
    let mut ws = tokio_tungstenite::accept_async(stream)
        .await
        .expect("websocket handshake");

    ws.send(Message::text(OPEN)).await.expect("send open");
    assert_eq!(next_text(&mut ws).await, "40");
    ws.send(Message::text(r#"40{"sid":"socket-sid"}"#))
        .await
        .expect("send connect");
    ws
}

async fn next_text(ws: &mut WebSocketStream<TcpStream>) -> String {
    loop {
        let frame = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for client frame")
            .expect("client hung up")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return text.as_str().to_string();
        }
    }
}

async fn next_event(
    events: &mut (impl futures::Stream<Item = TransportEvent> + Unpin),
) -> Option<TransportEvent> {
    tokio::time::timeout(Duration::from_secs(5), events.next())
        .await
        .expect("timed out waiting for transport event")
}

fn fast_options() -> SocketIoOptions {
    SocketIoOptions {
        reconnect: true,
        reconnect_delay: Duration::from_millis(50),
        max_reconnect_attempts: Some(3),
        connect_timeout: Duration::from_secs(5),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_handshake_then_events_flow_both_ways() {
    let (listener, url) = listen().await;
    let transport = SocketIoTransport::connect(&url, fast_options()).unwrap();
    let mut events = transport.events();

    let mut ws = accept_socket(&listener).await;
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));

    ws.send(Message::text(r#"42["bot_thinking",true]"#))
        .await
        .unwrap();
    assert_eq!(
        next_event(&mut events).await,
        Some(TransportEvent::Event {
            name: "bot_thinking".to_string(),
            payload: json!(true),
        })
    );

    transport
        .emit("chat_message", Some(json!({ "message": "hi" })))
        .await
        .unwrap();
    assert_eq!(
        next_text(&mut ws).await,
        r#"42["chat_message",{"message":"hi"}]"#
    );

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_answers_server_ping() {
    let (listener, url) = listen().await;
    let transport = SocketIoTransport::connect(&url, fast_options()).unwrap();

    let mut ws = accept_socket(&listener).await;
    ws.send(Message::text("2")).await.unwrap();
    assert_eq!(next_text(&mut ws).await, "3");

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_emits_before_connect_are_flushed_after_handshake() {
    let (listener, url) = listen().await;
    let transport = SocketIoTransport::connect(&url, fast_options()).unwrap();

    transport.emit("get_model_data", None).await.unwrap();

    let mut ws = accept_socket(&listener).await;
    assert_eq!(next_text(&mut ws).await, r#"42["get_model_data"]"#);

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_reconnects_after_connection_drop() {
    let (listener, url) = listen().await;
    let transport = SocketIoTransport::connect(&url, fast_options()).unwrap();
    let mut events = transport.events();

    let ws = accept_socket(&listener).await;
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));
    drop(ws);

    assert!(matches!(
        next_event(&mut events).await,
        Some(TransportEvent::Disconnected { .. })
    ));

    let _ws = accept_socket(&listener).await;
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_server_disconnect_is_final() {
    let (listener, url) = listen().await;
    let transport = SocketIoTransport::connect(&url, fast_options()).unwrap();
    let mut events = transport.events();

    let mut ws = accept_socket(&listener).await;
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));

    ws.send(Message::text("41")).await.unwrap();
    assert!(matches!(
        next_event(&mut events).await,
        Some(TransportEvent::Disconnected { .. })
    ));
    // The driver exits without reconnecting, which ends the stream.
    assert_eq!(next_event(&mut events).await, None);
}

#[tokio::test]
async fn test_close_sends_namespace_disconnect() {
    let (listener, url) = listen().await;
    let transport = SocketIoTransport::connect(&url, fast_options()).unwrap();
    let mut events = transport.events();

    let mut ws = accept_socket(&listener).await;
    assert_eq!(next_event(&mut events).await, Some(TransportEvent::Connected));

    transport.close().await.unwrap();
    assert_eq!(next_text(&mut ws).await, "41");
    assert!(transport.emit("chat_message", None).await.is_err());
}

#[tokio::test]
async fn test_gives_up_after_max_attempts() {
    // Accept TCP connections and hang up before the websocket upgrade, so
    // every attempt fails.
    let (listener, url) = listen().await;
    let accepted = Arc::new(AtomicUsize::new(0));
    let counter = accepted.clone();
    let server = tokio::spawn(async move {
        loop {
            let (stream, _) = listener.accept().await.expect("accept");
            counter.fetch_add(1, Ordering::SeqCst);
            drop(stream);
        }
    });

    let transport = SocketIoTransport::connect(
        &url,
        SocketIoOptions {
            max_reconnect_attempts: Some(2),
            ..fast_options()
        },
    )
    .unwrap();
    let mut events = transport.events();

    // No Connected or Disconnected is ever reported; the stream just ends.
    assert_eq!(next_event(&mut events).await, None);
    assert_eq!(accepted.load(Ordering::SeqCst), 2);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(accepted.load(Ordering::SeqCst), 2);
    server.abort();
}
