//! Client-side conversation session
//!
//! A [`SessionManager`] owns one transport connection for one
//! (credentials, document) pair. A background driver task consumes the
//! transport's event stream and the thinking timer; user intents are async
//! methods on the manager. Both sides serialize through one lock around a
//! [`SessionState`], and every transition publishes a fresh
//! [`SessionSnapshot`] on a `watch` channel.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use contextform::session::{SessionManager, SessionOptions};
//! use contextform::transport::socketio::{SocketIoOptions, SocketIoTransport};
//! use contextform::types::{Document, UserCredentials};
//!
//! # async fn run(credentials: UserCredentials, document: Document) -> anyhow::Result<()> {
//! let url = url::Url::parse("http://localhost:3000")?;
//! let transport = SocketIoTransport::connect(&url, SocketIoOptions::default())?;
//! let session = SessionManager::start(
//!     Arc::new(transport),
//!     credentials,
//!     document,
//!     SessionOptions::default(),
//! );
//! session.send_message("make the base plate 10 mm thick").await?;
//! session.close().await?;
//! # Ok(())
//! # }
//! ```

pub mod state;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::{watch, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::error::Result;
use crate::protocol::{ClientEvent, IdentifyPayload, ModifyParameterRequest, ServerEvent};
use crate::transport::{Transport, TransportEvent};
use crate::types::{Document, UserCredentials};

pub use state::{SessionSnapshot, SessionState, ThinkingState, DEFAULT_THINKING_TIMEOUT};

/// Tunables for a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOptions {
    /// How long to wait for a reply once the backend starts thinking.
    pub thinking_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            thinking_timeout: DEFAULT_THINKING_TIMEOUT,
        }
    }
}

impl From<&SessionConfig> for SessionOptions {
    fn from(config: &SessionConfig) -> Self {
        Self {
            thinking_timeout: Duration::from_secs(config.thinking_timeout_seconds),
        }
    }
}

/// Shared pieces the driver task and the manager both touch.
#[derive(Debug)]
struct Shared {
    transport: Arc<dyn Transport>,
    state: Mutex<SessionState>,
    snapshots: watch::Sender<SessionSnapshot>,
}

impl Shared {
    fn publish(&self, state: &SessionState) {
        self.snapshots.send_replace(state.snapshot());
    }

    async fn emit(&self, event: ClientEvent) -> Result<()> {
        let name = event.name();
        let payload = event.payload()?;
        tracing::debug!(event = name, "Emitting");
        self.transport.emit(name, payload).await
    }
}

/// One live conversation with the backend about one document.
#[derive(Debug)]
pub struct SessionManager {
    shared: Arc<Shared>,
    cancellation: CancellationToken,
    driver: std::sync::Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl SessionManager {
    /// Start a session over `transport`.
    ///
    /// Identification and the initial model data request are sent each
    /// time the transport reports a connection. Must be called from inside
    /// a Tokio runtime.
    pub fn start(
        transport: Arc<dyn Transport>,
        credentials: UserCredentials,
        document: Document,
        options: SessionOptions,
    ) -> Self {
        let state = SessionState::new(options.thinking_timeout);
        let (snapshots, _) = watch::channel(state.snapshot());

        tracing::info!(document = %document.name, "Starting session");

        let shared = Arc::new(Shared {
            transport,
            state: Mutex::new(state),
            snapshots,
        });
        let identify = IdentifyPayload {
            user_credentials: credentials,
            selected_document: document,
        };
        let cancellation = CancellationToken::new();
        let driver = tokio::spawn(drive(
            Arc::clone(&shared),
            identify,
            cancellation.clone(),
        ));

        Self {
            shared,
            cancellation,
            driver: std::sync::Mutex::new(Some(driver)),
            closed: AtomicBool::new(false),
        }
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.shared.snapshots.subscribe()
    }

    /// Most recently published snapshot.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.shared.snapshots.borrow().clone()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Append a user message and send it to the backend.
    ///
    /// Blank input, or a closed session, is a no-op.
    pub async fn send_message(&self, text: &str) -> Result<()> {
        let Some(mut state) = self.lock_open().await else {
            tracing::debug!("Ignoring message on closed session");
            return Ok(());
        };
        let Some(event) = state.submit_message(text) else {
            return Ok(());
        };
        self.shared.publish(&state);
        self.shared.emit(event).await
    }

    /// Ask for the current feature list only.
    pub async fn refresh_features(&self) -> Result<()> {
        self.emit_if_open(ClientEvent::RequestFeatures).await
    }

    /// Ask for features and geometry together.
    pub async fn request_model_data(&self) -> Result<()> {
        self.emit_if_open(ClientEvent::RequestModelData).await
    }

    pub async fn request_geometry(&self) -> Result<()> {
        self.emit_if_open(ClientEvent::RequestGeometry).await
    }

    /// Ask for the modification history of the document.
    pub async fn request_design_memory(&self) -> Result<()> {
        self.emit_if_open(ClientEvent::RequestDesignMemory).await
    }

    /// Request a direct parameter change, bypassing the chat.
    pub async fn modify_parameter(
        &self,
        feature_id: &str,
        parameter_id: &str,
        new_value: &str,
        intent: Option<&str>,
    ) -> Result<()> {
        self.emit_if_open(ClientEvent::ModifyParameter(ModifyParameterRequest {
            feature_id: feature_id.to_string(),
            parameter_id: parameter_id.to_string(),
            new_value: new_value.to_string(),
            intent: intent.map(str::to_string),
        }))
        .await
    }

    /// Approve the pending modification. Without one this does nothing.
    ///
    /// The proposal stays pending until the backend reports success or
    /// failure.
    pub async fn approve_pending_modification(&self) -> Result<()> {
        let Some(state) = self.lock_open().await else {
            return Ok(());
        };
        match state.approve() {
            Some(event) => self.shared.emit(event).await,
            None => Ok(()),
        }
    }

    /// Reject the pending modification. Without one this does nothing.
    pub async fn reject_pending_modification(&self) -> Result<()> {
        let Some(mut state) = self.lock_open().await else {
            return Ok(());
        };
        match state.reject() {
            Some(event) => self.shared.emit(event).await,
            None => {
                self.shared.publish(&state);
                Ok(())
            }
        }
    }

    /// Close the transport and stop the driver. Idempotent.
    ///
    /// Any armed thinking deadline is dropped without a timeout message.
    pub async fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        tracing::info!("Closing session");

        self.cancellation.cancel();
        let driver = self
            .driver
            .lock()
            .map_err(|_| anyhow::anyhow!("session driver lock poisoned"))?
            .take();
        if let Some(driver) = driver {
            if let Err(e) = driver.await {
                tracing::warn!(error = %e, "Session driver ended abnormally");
            }
        }

        {
            let mut state = self.shared.state.lock().await;
            state.disarm();
            state.on_disconnected();
            self.shared.publish(&state);
        }
        self.shared.transport.close().await
    }

    /// Lock the state unless the session is closed. The guard is held
    /// across the emit so transitions and emissions stay in one order.
    async fn lock_open(&self) -> Option<MutexGuard<'_, SessionState>> {
        if self.is_closed() {
            return None;
        }
        Some(self.shared.state.lock().await)
    }

    async fn emit_if_open(&self, event: ClientEvent) -> Result<()> {
        let Some(_state) = self.lock_open().await else {
            return Ok(());
        };
        self.shared.emit(event).await
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.cancellation.cancel();
    }
}

/// Driver loop: transport events, the thinking timer, and cancellation.
async fn drive(shared: Arc<Shared>, identify: IdentifyPayload, cancellation: CancellationToken) {
    let transport = Arc::clone(&shared.transport);
    let mut events = transport.events();

    loop {
        let deadline = shared.state.lock().await.thinking_deadline();
        let timer = async move {
            match deadline {
                Some((at, token)) => {
                    tokio::time::sleep_until(at).await;
                    token
                }
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancellation.cancelled() => break,
            event = events.next() => match event {
                Some(event) => handle_transport_event(&shared, &identify, event).await,
                None => {
                    tracing::debug!("Transport event stream ended");
                    let mut state = shared.state.lock().await;
                    state.on_disconnected();
                    shared.publish(&state);
                    break;
                }
            },
            token = timer => {
                let mut state = shared.state.lock().await;
                if state.expire_thinking(token, Instant::now()) {
                    shared.publish(&state);
                }
            }
        }
    }
}

async fn handle_transport_event(shared: &Shared, identify: &IdentifyPayload, event: TransportEvent) {
    match event {
        TransportEvent::Connected => {
            tracing::info!("Connected to backend");
            let mut state = shared.state.lock().await;
            let outbound = state.on_connected(identify.clone());
            shared.publish(&state);
            for event in outbound {
                if let Err(e) = shared.emit(event).await {
                    tracing::warn!(error = %e, "Failed to send connect handshake event");
                }
            }
        }
        TransportEvent::Disconnected { reason } => {
            tracing::warn!(%reason, "Disconnected from backend");
            let mut state = shared.state.lock().await;
            state.on_disconnected();
            shared.publish(&state);
        }
        TransportEvent::Event { name, payload } => match ServerEvent::decode(&name, payload) {
            Ok(Some(event)) => {
                tracing::trace!(event = %name, "Applying backend event");
                let mut state = shared.state.lock().await;
                state.apply(event, Instant::now());
                shared.publish(&state);
            }
            Ok(None) => tracing::debug!(event = %name, "Ignoring unknown backend event"),
            Err(e) => tracing::warn!(event = %name, error = %e, "Dropping malformed backend event"),
        },
    }
}
