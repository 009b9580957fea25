//! In-process fake transport for session tests
//!
//! [`FakeTransport::new`] returns a `(FakeTransport, FakeTransportHandle)`
//! pair. Wire the transport into the code under test; from the test side
//! use the handle to:
//!
//! - Read what the client emitted: `handle.outbound_rx.recv().await` or
//!   [`FakeTransportHandle::drain`]
//! - Simulate the backend: [`FakeTransportHandle::connect`],
//!   [`FakeTransportHandle::push`], [`FakeTransportHandle::disconnect`]
//!
//! ```text
//! client emit() ------> outbound_tx -----> outbound_rx (handle reads)
//! handle inbound_tx --> inbound_rx  -----> events()    (client reads)
//! ```
//!
//! # Example
//!
//! ```
//! use contextform::transport::fake::FakeTransport;
//! use contextform::transport::Transport;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let (transport, mut handle) = FakeTransport::new();
//! transport.emit("get_model_data", None).await.unwrap();
//!
//! let sent = handle.outbound_rx.recv().await.unwrap();
//! assert_eq!(sent.name, "get_model_data");
//! # }
//! ```

use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::Stream;
use serde_json::Value;
use tokio::sync::{mpsc, Mutex};

use crate::error::{ContextformError, Result};
use crate::transport::{Transport, TransportEvent};

/// One event recorded by [`FakeTransport::emit`].
#[derive(Debug, Clone, PartialEq)]
pub struct EmittedEvent {
    pub name: String,
    pub payload: Option<Value>,
}

/// In-memory [`Transport`] driven by a [`FakeTransportHandle`].
#[derive(Debug)]
pub struct FakeTransport {
    outbound_tx: mpsc::UnboundedSender<EmittedEvent>,
    inbound_rx: Arc<Mutex<mpsc::UnboundedReceiver<TransportEvent>>>,
    closed: AtomicBool,
}

impl FakeTransport {
    /// Create a new `(FakeTransport, FakeTransportHandle)` pair.
    pub fn new() -> (Self, FakeTransportHandle) {
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();

        let transport = Self {
            outbound_tx,
            inbound_rx: Arc::new(Mutex::new(inbound_rx)),
            closed: AtomicBool::new(false),
        };
        let handle = FakeTransportHandle {
            outbound_rx,
            inbound_tx,
        };
        (transport, handle)
    }

    /// Whether [`Transport::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Test-side handle for a [`FakeTransport`].
#[derive(Debug)]
pub struct FakeTransportHandle {
    /// Events the client emitted, in order.
    pub outbound_rx: mpsc::UnboundedReceiver<EmittedEvent>,
    /// Feeds the client's [`Transport::events`] stream.
    pub inbound_tx: mpsc::UnboundedSender<TransportEvent>,
}

impl FakeTransportHandle {
    /// Signal that the connection is up.
    pub fn connect(&self) {
        let _ = self.inbound_tx.send(TransportEvent::Connected);
    }

    /// Signal that the connection dropped.
    pub fn disconnect(&self, reason: &str) {
        let _ = self.inbound_tx.send(TransportEvent::Disconnected {
            reason: reason.to_string(),
        });
    }

    /// Push a backend event.
    pub fn push(&self, name: &str, payload: Value) {
        let _ = self.inbound_tx.send(TransportEvent::Event {
            name: name.to_string(),
            payload,
        });
    }

    /// Take every event emitted so far without waiting.
    pub fn drain(&mut self) -> Vec<EmittedEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.outbound_rx.try_recv() {
            events.push(event);
        }
        events
    }
}

#[async_trait::async_trait]
impl Transport for FakeTransport {
    async fn emit(&self, event: &str, payload: Option<Value>) -> Result<()> {
        if self.is_closed() {
            return Err(ContextformError::Transport("FakeTransport is closed".to_string()).into());
        }
        self.outbound_tx
            .send(EmittedEvent {
                name: event.to_string(),
                payload,
            })
            .map_err(|e| {
                ContextformError::Transport(format!("FakeTransport outbound channel closed: {e}"))
                    .into()
            })
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
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use futures::StreamExt;
    use serde_json::json;

    #[tokio::test]
    async fn test_emit_delivers_to_handle() {
        let (transport, mut handle) = FakeTransport::new();
        transport
            .emit("chat_message", Some(json!({ "message": "hi" })))
            .await
            .unwrap();

        let sent = handle.outbound_rx.recv().await.unwrap();
        assert_eq!(sent.name, "chat_message");
        assert_eq!(sent.payload, Some(json!({ "message": "hi" })));
    }

    #[tokio::test]
    async fn test_events_yield_injected_signals_in_order() {
        let (transport, handle) = FakeTransport::new();
        handle.connect();
        handle.push("bot_thinking", json!(true));
        handle.disconnect("server gone");

        let mut stream = transport.events();
        let mut received = Vec::new();
        for _ in 0..3 {
            let event = tokio::time::timeout(Duration::from_secs(2), stream.next())
                .await
                .expect("timed out")
                .expect("stream ended");
            received.push(event);
        }
        assert_eq!(received[0], TransportEvent::Connected);
        assert!(matches!(received[1], TransportEvent::Event { ref name, .. } if name == "bot_thinking"));
        assert!(matches!(received[2], TransportEvent::Disconnected { .. }));
    }

    #[tokio::test]
    async fn test_emit_fails_after_close() {
        let (transport, _handle) = FakeTransport::new();
        transport.close().await.unwrap();
        assert!(transport.is_closed());
        assert!(transport.emit("get_model_data", None).await.is_err());
    }

    #[tokio::test]
    async fn test_drain_collects_without_blocking() {
        let (transport, mut handle) = FakeTransport::new();
        assert!(handle.drain().is_empty());
        transport.emit("a", None).await.unwrap();
        transport.emit("b", None).await.unwrap();
        let names: Vec<_> = handle.drain().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_fake_transport_is_object_safe() {
        let (transport, _handle) = FakeTransport::new();
        let _boxed: Box<dyn Transport> = Box::new(transport);
    }
}
