//! Transport abstraction and implementations
//!
//! This module defines the [`Transport`] trait the session layer talks to.
//! Concrete implementations live in submodules:
//!
//! - [`socketio::SocketIoTransport`] -- Socket.IO over a websocket
//!   (Engine.IO v4), with reconnection and send buffering.
//! - [`fake::FakeTransport`] -- in-process fake used in tests.
//!
//! # Design
//!
//! Callers `emit` an event name plus an optional JSON argument and consume
//! a stream of [`TransportEvent`]s. Framing, heartbeats, and reconnection
//! belong to each implementation; the session only sees connect and
//! disconnect signals and decoded events.

use std::pin::Pin;

use futures::Stream;
use serde_json::Value;

use crate::error::Result;

pub mod codec;
pub mod fake;
pub mod socketio;

/// Something a transport reports to its owner.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The connection (or a reconnection) is established and usable.
    Connected,
    /// The connection was lost or closed.
    Disconnected {
        /// Human-readable reason, for logging
        reason: String,
    },
    /// An event pushed by the backend.
    Event {
        name: String,
        payload: Value,
    },
}

/// Abstraction over event transports.
///
/// Used polymorphically through `Arc<dyn Transport>`.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Emit one event to the backend.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::ContextformError::Transport`] once the
    /// transport has been closed.
    async fn emit(&self, event: &str, payload: Option<Value>) -> Result<()>;

    /// Stream of connection signals and inbound events.
    ///
    /// The stream ends when the transport is closed for good.
    fn events(&self) -> Pin<Box<dyn Stream<Item = TransportEvent> + Send + '_>>;

    /// Close the connection and stop any reconnection attempts.
    async fn close(&self) -> Result<()>;
}
