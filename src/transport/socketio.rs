//! Socket.IO client transport over a websocket
//!
//! [`SocketIoTransport`] speaks Engine.IO v4 directly over websocket (no
//! long-polling upgrade) and joins the default Socket.IO namespace. A
//! background driver task owns the connection and:
//!
//! - answers server pings and treats a silent server (no frame within
//!   `pingInterval + pingTimeout`) as a lost connection
//! - forwards decoded events to [`Transport::events`]
//! - buffers emits while disconnected and flushes them once connected
//! - reconnects with a fixed delay unless the server explicitly
//!   disconnected the client or the attempt budget is spent
//!
//! The session layer above never retries on its own; whatever resilience
//! exists lives here.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::config::TransportConfig;
use crate::error::{ContextformError, Result};
use crate::transport::codec::{
    self, EnginePacket, Handshake, SocketPacket, CONNECT_FRAME, ENGINE_IO_VERSION, PONG_FRAME,
};
use crate::transport::{Transport, TransportEvent};

/// Connection and reconnection behaviour.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketIoOptions {
    /// Reconnect after the connection drops
    pub reconnect: bool,
    /// Pause between reconnection attempts
    pub reconnect_delay: Duration,
    /// Give up after this many consecutive failed attempts (`None` = never)
    pub max_reconnect_attempts: Option<u32>,
    /// Upper bound for the websocket + Socket.IO handshake
    pub connect_timeout: Duration,
}

impl Default for SocketIoOptions {
    fn default() -> Self {
        Self {
            reconnect: true,
            reconnect_delay: Duration::from_millis(1000),
            max_reconnect_attempts: None,
            connect_timeout: Duration::from_secs(20),
        }
    }
}

impl From<&TransportConfig> for SocketIoOptions {
    fn from(config: &TransportConfig) -> Self {
        Self {
            reconnect: config.reconnect,
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            max_reconnect_attempts: config.max_reconnect_attempts,
            connect_timeout: Duration::from_secs(config.connect_timeout_seconds),
        }
    }
}

/// Build the Engine.IO websocket endpoint for a backend base URL.
///
/// `http://localhost:3000` becomes
/// `ws://localhost:3000/socket.io/?EIO=4&transport=websocket`.
///
/// # Errors
///
/// Returns [`ContextformError::Config`] for schemes other than
/// http, https, ws, and wss.
pub fn websocket_url(server: &Url) -> Result<Url> {
    let scheme = match server.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(
                ContextformError::Config(format!("unsupported server scheme '{other}'")).into(),
            )
        }
    };

    let mut url = server.clone();
    url.set_scheme(scheme)
        .map_err(|_| ContextformError::Config(format!("cannot use scheme '{scheme}'")))?;
    url.set_path("/socket.io/");
    url.set_query(Some(&format!(
        "EIO={ENGINE_IO_VERSION}&transport=websocket"
    )));
    Ok(url)
}

/// Socket.IO transport; see the module docs.
#[derive(Debug)]
pub struct SocketIoTransport {
    outbound_tx: mpsc::UnboundedSender<String>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
    cancellation: CancellationToken,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl SocketIoTransport {
    /// Start connecting to `server` in the background.
    ///
    /// Returns immediately; [`TransportEvent::Connected`] arrives on
    /// [`Transport::events`] once the handshake completes. Must be called
    /// from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`ContextformError::Config`] if `server` cannot be turned
    /// into a websocket URL.
    pub fn connect(server: &Url, options: SocketIoOptions) -> Result<Self> {
        let url = websocket_url(server)?;
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let cancellation = CancellationToken::new();

        tracing::info!(url = %url, "Connecting to backend");
        let driver = tokio::spawn(drive(
            url,
            options,
            outbound_rx,
            inbound_tx,
            cancellation.clone(),
        ));

        Ok(Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            cancellation,
            driver: std::sync::Mutex::new(Some(driver)),
        })
    }
}

impl Drop for SocketIoTransport {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

#[async_trait::async_trait]
impl Transport for SocketIoTransport {
    async fn emit(&self, event: &str, payload: Option<Value>) -> Result<()> {
        if self.cancellation.is_cancelled() {
            return Err(ContextformError::Transport("transport is closed".to_string()).into());
        }
        let frame = codec::encode_event(event, payload.as_ref())?;
        tracing::debug!(event, "Queueing outbound event");
        self.outbound_tx
            .send(frame)
            .map_err(|_| ContextformError::Transport("connection driver has exited".to_string()))?;
        Ok(())
    }

    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>> {
        let rx = Arc::clone(&self.inbound_rx);
        Box::pin(futures::stream::unfold(rx, |rx| async move {
            let mut guard = rx.lock().await;
            let item = guard.recv().await?;
            drop(guard);
            Some((item, rx))
        }))
    }

    async fn close(&self) -> Result<()> {
        self.cancellation.cancel();
        let driver = self.driver.lock().ok().and_then(|mut guard| guard.take());
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::warn!("Socket.IO driver task ended abnormally: {e}");
            }
        }
        Ok(())
    }
}

/// How a single connection ended.
#[derive(Debug)]
struct ConnectionEnd {
    /// The Socket.IO handshake completed before the end
    was_connected: bool,
    /// A reconnection attempt makes sense
    reconnect: bool,
    reason: String,
}

impl ConnectionEnd {
    fn failed(reason: impl Into<String>) -> Self {
        Self {
            was_connected: false,
            reconnect: true,
            reason: reason.into(),
        }
    }
}

/// Connection loop: connect, run, wait, reconnect.
async fn drive(
    url: Url,
    options: SocketIoOptions,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<TransportEvent>,
    cancellation: CancellationToken,
) {
    let mut failed_attempts: u32 = 0;

    loop {
        let connect = tokio::time::timeout(
            options.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        );
        let outcome = tokio::select! {
            _ = cancellation.cancelled() => break,
            outcome = connect => outcome,
        };

        let end = match outcome {
            Ok(Ok((ws, _response))) => {
                tracing::debug!("Websocket open, starting Engine.IO handshake");
                run_connection(
                    ws,
                    options.connect_timeout,
                    &mut outbound_rx,
                    &inbound_tx,
                    &cancellation,
                )
                .await
            }
            Ok(Err(e)) => ConnectionEnd::failed(format!("websocket connect failed: {e}")),
            Err(_) => ConnectionEnd::failed("websocket connect timed out"),
        };

        if end.was_connected {
            failed_attempts = 0;
            let _ = inbound_tx.send(TransportEvent::Disconnected {
                reason: end.reason.clone(),
            });
            tracing::info!(reason = %end.reason, "Disconnected from backend");
        } else {
            failed_attempts += 1;
            tracing::warn!(reason = %end.reason, attempt = failed_attempts, "Connection attempt failed");
        }

        if cancellation.is_cancelled() || !options.reconnect || !end.reconnect {
            break;
        }
        if let Some(max) = options.max_reconnect_attempts {
            if failed_attempts >= max {
                tracing::warn!(max, "Giving up after repeated connection failures");
                break;
            }
        }

        tokio::select! {
            _ = cancellation.cancelled() => break,
            _ = tokio::time::sleep(options.reconnect_delay) => {}
        }
        tracing::info!("Reconnecting to backend");
    }

    tracing::debug!("Socket.IO driver exiting");
}

/// Run the handshake and then the frame loop for one websocket.
async fn run_connection<S>(
    mut ws: S,
    handshake_timeout: Duration,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    inbound_tx: &mpsc::UnboundedSender<TransportEvent>,
    cancellation: &CancellationToken,
) -> ConnectionEnd
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let handshake = tokio::select! {
        _ = cancellation.cancelled() => {
            let _ = ws.close().await;
            return ConnectionEnd { was_connected: false, reconnect: false, reason: "client closed".to_string() };
        }
        result = tokio::time::timeout(handshake_timeout, handshake(&mut ws)) => match result {
            Ok(Ok(handshake)) => handshake,
            Ok(Err(e)) => return ConnectionEnd::failed(format!("handshake failed: {e}")),
            Err(_) => return ConnectionEnd::failed("handshake timed out"),
        },
    };

    tracing::info!(sid = %handshake.sid, "Connected to backend");
    let _ = inbound_tx.send(TransportEvent::Connected);

    let heartbeat = Duration::from_millis(handshake.ping_interval + handshake.ping_timeout);
    let mut deadline = Instant::now() + heartbeat;

    let end = |reconnect: bool, reason: String| ConnectionEnd {
        was_connected: true,
        reconnect,
        reason,
    };

    loop {
        tokio::select! {
            biased;

            _ = cancellation.cancelled() => {
                let _ = ws.send(Message::text("41")).await;
                let _ = ws.close().await;
                return end(false, "client closed".to_string());
            }

            _ = tokio::time::sleep_until(deadline) => {
                return end(true, "ping timeout".to_string());
            }

            frame = ws.next() => {
                let text = match frame {
                    None => return end(true, "websocket closed".to_string()),
                    Some(Err(e)) => return end(true, format!("websocket error: {e}")),
                    Some(Ok(Message::Close(_))) => return end(true, "server closed websocket".to_string()),
                    Some(Ok(Message::Text(text))) => text,
                    Some(Ok(_)) => continue,
                };
                deadline = Instant::now() + heartbeat;

                match handle_frame(text.as_str(), inbound_tx) {
                    FrameAction::Continue => {}
                    FrameAction::Reply(reply) => {
                        if let Err(e) = ws.send(Message::text(reply)).await {
                            return end(true, format!("websocket send failed: {e}"));
                        }
                    }
                    FrameAction::Close { reconnect, reason } => {
                        let _ = ws.close().await;
                        return end(reconnect, reason);
                    }
                }
            }

            Some(frame) = outbound_rx.recv() => {
                if let Err(e) = ws.send(Message::text(frame)).await {
                    return end(true, format!("websocket send failed: {e}"));
                }
            }
        }
    }
}

/// Wait for the Engine.IO open packet, join the default namespace, and
/// wait for the namespace CONNECT acknowledgement.
async fn handshake<S>(ws: &mut S) -> Result<Handshake>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Sink<Message, Error = WsError> + Unpin,
{
    let open = next_text(ws).await?;
    let handshake = match codec::decode_engine(&open)? {
        EnginePacket::Open(handshake) => handshake,
        other => {
            return Err(ContextformError::Protocol(format!(
                "expected engine.io open packet, got {other:?}"
            ))
            .into())
        }
    };

    ws.send(Message::text(CONNECT_FRAME)).await?;

    loop {
        let frame = next_text(ws).await?;
        match codec::decode_engine(&frame)? {
            EnginePacket::Ping(data) => {
                ws.send(Message::text(format!("{PONG_FRAME}{data}"))).await?;
            }
            EnginePacket::Message(body) => match codec::decode_socket(&body)? {
                SocketPacket::Connect(_) => return Ok(handshake),
                SocketPacket::ConnectError(data) => {
                    return Err(ContextformError::Transport(format!(
                        "namespace connect rejected: {data}"
                    ))
                    .into())
                }
                other => tracing::debug!("Ignoring packet before namespace connect: {other:?}"),
            },
            EnginePacket::Close => {
                return Err(ContextformError::Transport(
                    "server closed during handshake".to_string(),
                )
                .into())
            }
            _ => {}
        }
    }
}

async fn next_text<S>(ws: &mut S) -> Result<String>
where
    S: Stream<Item = std::result::Result<Message, WsError>> + Unpin,
{
    loop {
        match ws.next().await {
            Some(Ok(Message::Text(text))) => return Ok(text.as_str().to_string()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(ContextformError::Transport("websocket closed".to_string()).into())
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(ContextformError::WebSocket(e).into()),
        }
    }
}

#[derive(Debug, PartialEq)]
enum FrameAction {
    Continue,
    Reply(String),
    Close { reconnect: bool, reason: String },
}

/// React to one text frame received after the handshake.
fn handle_frame(frame: &str, inbound_tx: &mpsc::UnboundedSender<TransportEvent>) -> FrameAction {
    let packet = match codec::decode_engine(frame) {
        Ok(packet) => packet,
        Err(e) => {
            tracing::warn!("Dropping malformed frame: {e}");
            return FrameAction::Continue;
        }
    };

    match packet {
        EnginePacket::Ping(data) => FrameAction::Reply(format!("{PONG_FRAME}{data}")),
        EnginePacket::Close => FrameAction::Close {
            reconnect: true,
            reason: "server closed engine.io session".to_string(),
        },
        EnginePacket::Message(body) => match codec::decode_socket(&body) {
            Ok(SocketPacket::Event { name, data, .. }) => {
                tracing::debug!(event = %name, "Inbound event");
                let _ = inbound_tx.send(TransportEvent::Event {
                    name,
                    payload: data,
                });
                FrameAction::Continue
            }
            // The server kicked this client; socket.io clients do not
            // reconnect in that case.
            Ok(SocketPacket::Disconnect) => FrameAction::Close {
                reconnect: false,
                reason: "server disconnected client".to_string(),
            },
            Ok(SocketPacket::ConnectError(data)) => FrameAction::Close {
                reconnect: false,
                reason: format!("namespace connect rejected: {data}"),
            },
            Ok(other) => {
                tracing::debug!("Ignoring socket.io packet: {other:?}");
                FrameAction::Continue
            }
            Err(e) => {
                tracing::warn!("Dropping malformed socket.io packet: {e}");
                FrameAction::Continue
            }
        },
        EnginePacket::Open(_) | EnginePacket::Pong(_) | EnginePacket::Upgrade | EnginePacket::Noop => {
            FrameAction::Continue
        }
    }
}
