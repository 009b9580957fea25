//! Session state and its transitions
//!
//! [`SessionState`] is the synchronous core of a session: every inbound
//! event and every user intent is a method call that mutates the state and,
//! for intents, returns the [`ClientEvent`] to emit. It never performs I/O
//! and takes the current time as an argument, so it can be driven by the
//! async [`super::SessionManager`] and tested without a runtime.
//!
//! Invariants kept here:
//!
//! - the transcript is append-only, in append order
//! - at most one pending modification; a new preview replaces the old one
//! - `Thinking` always carries a deadline, `Idle` never does

use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::protocol::{
    self, ChatRequest, ChatResponse, ClientEvent, ExternalChange, IdentifyPayload, ModelData,
    ModificationFailure, ModificationPreview, ModificationSuccess, ServerEvent,
};
use crate::types::{
    ChatMessage, Feature, Geometry, MemoryContext, Modification, PendingModification,
};

/// How long the backend may think before the client gives up waiting.
pub const DEFAULT_THINKING_TIMEOUT: Duration = Duration::from_secs(30);

/// First message of every transcript.
pub const GREETING: &str = "Hello! I can help you modify your Onshape CAD model. Try asking me to change dimensions, add features, or ask about your current model.";

/// Appended when the thinking deadline passes without a reply.
pub const THINKING_TIMEOUT_MESSAGE: &str =
    "⚠️ I'm having trouble processing your request. Please try again or rephrase your question.";

/// Whether the backend is computing a reply.
///
/// `token` identifies one armed deadline; a timer that wakes up with an
/// older token was superseded and does nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingState {
    Idle,
    Thinking { deadline: Instant, token: u64 },
}

/// Observable view of a session, published after every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub connected: bool,
    pub messages: Vec<ChatMessage>,
    pub features: Vec<Feature>,
    pub geometry: Option<Geometry>,
    pub pending_modification: Option<PendingModification>,
    pub modifications: Vec<Modification>,
    pub modification_progress: String,
    pub thinking: bool,
}

/// Mutable state of one session.
#[derive(Debug)]
pub struct SessionState {
    connected: bool,
    messages: Vec<ChatMessage>,
    features: Vec<Feature>,
    geometry: Option<Geometry>,
    pending: Option<PendingModification>,
    modifications: Vec<Modification>,
    modification_progress: String,
    thinking: ThinkingState,
    thinking_timeout: Duration,
    next_token: u64,
    timed_out: bool,
}

impl SessionState {
    /// Fresh state with the greeting already in the transcript.
    pub fn new(thinking_timeout: Duration) -> Self {
        Self {
            connected: false,
            messages: vec![ChatMessage::ai(GREETING)],
            features: Vec::new(),
            geometry: None,
            pending: None,
            modifications: Vec::new(),
            modification_progress: String::new(),
            thinking: ThinkingState::Idle,
            thinking_timeout,
            next_token: 0,
            timed_out: false,
        }
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connected: self.connected,
            messages: self.messages.clone(),
            features: self.features.clone(),
            geometry: self.geometry.clone(),
            pending_modification: self.pending.clone(),
            modifications: self.modifications.clone(),
            modification_progress: self.modification_progress.clone(),
            thinking: self.is_thinking(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn features(&self) -> &[Feature] {
        &self.features
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        self.geometry.as_ref()
    }

    pub fn pending_modification(&self) -> Option<&PendingModification> {
        self.pending.as_ref()
    }

    pub fn modifications(&self) -> &[Modification] {
        &self.modifications
    }

    pub fn thinking(&self) -> ThinkingState {
        self.thinking
    }

    pub fn is_thinking(&self) -> bool {
        matches!(self.thinking, ThinkingState::Thinking { .. })
    }

    /// Deadline and token of the armed thinking timer, if any.
    pub fn thinking_deadline(&self) -> Option<(Instant, u64)> {
        match self.thinking {
            ThinkingState::Thinking { deadline, token } => Some((deadline, token)),
            ThinkingState::Idle => None,
        }
    }

    /// Transport connected: identify, then fetch features and geometry in
    /// one round trip.
    pub fn on_connected(&mut self, identify: IdentifyPayload) -> Vec<ClientEvent> {
        self.connected = true;
        vec![
            ClientEvent::Identify(identify),
            ClientEvent::RequestModelData,
        ]
    }

    pub fn on_disconnected(&mut self) {
        self.connected = false;
    }

    /// Apply one backend event.
    pub fn apply(&mut self, event: ServerEvent, now: Instant) {
        match event {
            ServerEvent::Thinking(true) => self.start_thinking(now),
            ServerEvent::Thinking(false) => self.stop_thinking(),
            ServerEvent::ChatResponse(response) => self.on_chat_response(response),
            ServerEvent::ChatError(error) => {
                self.stop_thinking();
                self.push(ChatMessage::ai(format!("❌ Error: {error}. Please try again.")));
            }
            ServerEvent::ModelData(ModelData { features, geometry }) => {
                self.features = features;
                self.geometry = geometry;
            }
            ServerEvent::Features(features) => self.features = features,
            ServerEvent::ModelDataError(error) | ServerEvent::FeaturesError(error) => {
                tracing::warn!(%error, "Model data request failed; clearing features and geometry");
                self.features.clear();
                self.geometry = None;
            }
            ServerEvent::Geometry(geometry) => self.geometry = Some(geometry),
            ServerEvent::GeometryError(error) => {
                tracing::warn!(%error, "Geometry request failed");
                self.geometry = None;
            }
            ServerEvent::ModificationProgress(status) => self.modification_progress = status,
            ServerEvent::ModificationPreview(preview) => self.on_preview(preview),
            ServerEvent::ModificationSuccess(success) => self.on_success(success),
            ServerEvent::ModificationError(failure) => self.on_modification_error(failure),
            ServerEvent::DesignMemory(memory) => self.modifications = memory.modifications,
            ServerEvent::ExternalChange(change) => self.on_external_change(change),
        }
    }

    /// Fire the thinking timeout if `token` is still the armed one and its
    /// deadline has passed. Returns whether it fired.
    pub fn expire_thinking(&mut self, token: u64, now: Instant) -> bool {
        match self.thinking {
            ThinkingState::Thinking {
                deadline,
                token: armed,
            } if armed == token && now >= deadline => {
                tracing::warn!(token, "No reply from backend before thinking deadline");
                self.thinking = ThinkingState::Idle;
                self.timed_out = true;
                self.push(ChatMessage::system(THINKING_TIMEOUT_MESSAGE));
                true
            }
            _ => false,
        }
    }

    /// Drop any armed deadline without a timeout message.
    pub fn disarm(&mut self) {
        self.thinking = ThinkingState::Idle;
    }

    /// Record a user chat turn. Returns `None` for blank input.
    pub fn submit_message(&mut self, text: &str) -> Option<ClientEvent> {
        if text.trim().is_empty() {
            return None;
        }
        self.push(ChatMessage::user(text));
        Some(ClientEvent::ChatMessage(ChatRequest {
            message: text.to_string(),
        }))
    }

    /// Approval event for the pending modification, if there is one.
    pub fn approve(&self) -> Option<ClientEvent> {
        self.pending
            .as_ref()
            .map(|pending| ClientEvent::ApproveModification(pending.clone()))
    }

    /// Reject the pending modification.
    ///
    /// A speculatively applied change with a captured original state is
    /// handed back to the backend for revert and stays pending until the
    /// backend answers. Anything else is dropped locally.
    pub fn reject(&mut self) -> Option<ClientEvent> {
        let pending = self.pending.as_ref()?;
        if let Some(revert) = protocol::revert_request_for(pending) {
            return Some(ClientEvent::RevertModification(revert));
        }

        let pending = self.pending.take()?;
        self.push(ChatMessage::system(format!(
            "Modification cancelled: {} on feature {} stays at {}.",
            pending.parameter_id, pending.feature_id, pending.old_value
        )));
        None
    }

    fn push(&mut self, message: ChatMessage) {
        self.messages.push(message);
    }

    fn start_thinking(&mut self, now: Instant) {
        self.next_token += 1;
        self.timed_out = false;
        self.thinking = ThinkingState::Thinking {
            deadline: now + self.thinking_timeout,
            token: self.next_token,
        };
    }

    fn stop_thinking(&mut self) {
        self.thinking = ThinkingState::Idle;
    }

    fn on_chat_response(&mut self, response: ChatResponse) {
        if self.timed_out && !self.is_thinking() {
            tracing::debug!("Reply arrived after the thinking timeout fired");
        }
        self.timed_out = false;
        self.stop_thinking();

        let content = match &response.memory_context {
            Some(context) => with_memory_footnote(&response.message, context),
            None => response.message,
        };
        let mut message = ChatMessage::ai(content);
        if let Some(timestamp) = response.timestamp {
            message = message.with_timestamp(timestamp);
        }
        self.push(message);

        if let Some(features) = response.features {
            self.features = features;
        }
    }

    fn on_preview(&mut self, preview: ModificationPreview) {
        let ModificationPreview {
            modification,
            geometry,
        } = preview;

        if let Some(previous) = &self.pending {
            tracing::warn!(
                feature = %previous.feature_id,
                parameter = %previous.parameter_id,
                "Unresolved modification replaced by a new preview"
            );
        }
        if let Some(geometry) = geometry {
            self.geometry = Some(geometry);
        }

        self.push(ChatMessage::ai(describe_preview(&modification)));
        self.pending = Some(modification);
    }

    fn on_success(&mut self, success: ModificationSuccess) {
        let ModificationSuccess {
            modification,
            features,
            geometry,
            message,
        } = success;

        self.pending = None;
        self.modification_progress.clear();
        self.modifications.push(modification);
        self.features = features;
        if let Some(geometry) = geometry {
            self.geometry = Some(geometry);
        }

        let text = if message.is_empty() {
            "Modification applied".to_string()
        } else {
            message
        };
        self.push(ChatMessage::ai(format!("✅ {text}")));
    }

    fn on_modification_error(&mut self, failure: ModificationFailure) {
        if let Some(error) = &failure.error {
            tracing::warn!(%error, "Modification failed");
        }
        self.modification_progress.clear();
        self.push(ChatMessage::ai(format!("❌ {}", failure.message)));
    }

    fn on_external_change(&mut self, change: ExternalChange) {
        self.features = change.features;
        self.geometry = change.geometry;

        let mut text = change
            .message
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| {
                "🔄 The model was changed outside this session. Features and geometry were refreshed."
                    .to_string()
            });
        if let Some(pending) = &self.pending {
            text.push_str(&format!(
                " The pending change to {} on feature {} was proposed against the previous model.",
                pending.parameter_id, pending.feature_id
            ));
        }
        self.push(ChatMessage::system(text));
    }
}

/// Append the prior design decisions a reply relied on.
pub fn with_memory_footnote(message: &str, context: &MemoryContext) -> String {
    if context.decisions.is_empty() {
        return message.to_string();
    }
    let count = if context.count > 0 {
        context.count
    } else {
        context.decisions.len()
    };
    let noun = if count == 1 { "decision" } else { "decisions" };

    let mut text = format!("{message}\n\n📝 Based on {count} previous design {noun}:");
    for decision in &context.decisions {
        text.push_str("\n• ");
        text.push_str(decision);
    }
    text
}

/// Transcript copy for a modification preview.
pub fn describe_preview(pending: &PendingModification) -> String {
    let change = format!(
        "{} on feature {}: {} → {}",
        pending.parameter_id, pending.feature_id, pending.old_value, pending.new_value
    );
    let reason = if pending.intent.is_empty() {
        String::new()
    } else {
        format!(" ({})", pending.intent)
    };

    if pending.applied {
        format!("🔧 I've applied a change to {change}{reason}. Keep it or revert it?")
    } else {
        format!("💡 Proposed change to {change}{reason}. Approve or reject it?")
    }
}
