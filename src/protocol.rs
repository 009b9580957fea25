//! Typed event contract between the client and the CAD-assistant backend
//!
//! The backend speaks Socket.IO: every message is an event name plus one
//! JSON argument. This module gives each event name a typed payload so the
//! session layer never handles untyped JSON. [`ClientEvent`] covers what
//! the client emits, [`ServerEvent`] what the backend pushes.
//!
//! Connect and disconnect are transport signals, not events, and live in
//! [`crate::transport::TransportEvent`].

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ContextformError, Result};
use crate::types::{
    DesignMemory, Document, Feature, Geometry, MemoryContext, Modification, OriginalState,
    PendingModification, UserCredentials,
};

// Outbound event names.
pub const EVENT_USER_CONNECTED: &str = "user_connected";
pub const EVENT_GET_MODEL_DATA: &str = "get_model_data";
pub const EVENT_GET_CURRENT_FEATURES: &str = "get_current_features";
pub const EVENT_GET_GEOMETRY: &str = "get_geometry";
pub const EVENT_CHAT_MESSAGE: &str = "chat_message";
pub const EVENT_MODIFY_PARAMETER: &str = "modify_parameter";
pub const EVENT_APPROVE_MODIFICATION: &str = "approve_modification";
pub const EVENT_REVERT_MODIFICATION: &str = "revert_modification";
pub const EVENT_GET_DESIGN_MEMORY: &str = "get_design_memory";

// Inbound event names.
pub const EVENT_BOT_THINKING: &str = "bot_thinking";
pub const EVENT_BOT_RESPONSE: &str = "bot_response";
pub const EVENT_MODEL_DATA_UPDATE: &str = "model_data_update";
pub const EVENT_MODEL_DATA_ERROR: &str = "model_data_error";
pub const EVENT_CURRENT_FEATURES: &str = "current_features";
pub const EVENT_FEATURES_ERROR: &str = "features_error";
pub const EVENT_CHAT_ERROR: &str = "chat_error";
pub const EVENT_MODIFICATION_PROGRESS: &str = "modification_progress";
pub const EVENT_MODIFICATION_PREVIEW: &str = "modification_preview";
pub const EVENT_MODIFICATION_SUCCESS: &str = "modification_success";
pub const EVENT_MODIFICATION_ERROR: &str = "modification_error";
pub const EVENT_DESIGN_MEMORY: &str = "design_memory";
pub const EVENT_MODEL_CHANGED_EXTERNALLY: &str = "model_changed_externally";
pub const EVENT_GEOMETRY_UPDATE: &str = "geometry_update";
pub const EVENT_GEOMETRY_ERROR: &str = "geometry_error";

/// Payload of `user_connected`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IdentifyPayload {
    pub user_credentials: UserCredentials,
    pub selected_document: Document,
}

/// Payload of `chat_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
}

/// Payload of `modify_parameter`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModifyParameterRequest {
    pub feature_id: String,
    pub parameter_id: String,
    pub new_value: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
}

/// Payload of `revert_modification`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevertRequest {
    pub feature_id: String,
    pub parameter_id: String,
    pub original_value: String,
    pub new_value: String,
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    Identify(IdentifyPayload),
    RequestModelData,
    RequestFeatures,
    RequestGeometry,
    ChatMessage(ChatRequest),
    ModifyParameter(ModifyParameterRequest),
    ApproveModification(PendingModification),
    RevertModification(RevertRequest),
    RequestDesignMemory,
}

impl ClientEvent {
    /// Socket.IO event name.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Identify(_) => EVENT_USER_CONNECTED,
            ClientEvent::RequestModelData => EVENT_GET_MODEL_DATA,
            ClientEvent::RequestFeatures => EVENT_GET_CURRENT_FEATURES,
            ClientEvent::RequestGeometry => EVENT_GET_GEOMETRY,
            ClientEvent::ChatMessage(_) => EVENT_CHAT_MESSAGE,
            ClientEvent::ModifyParameter(_) => EVENT_MODIFY_PARAMETER,
            ClientEvent::ApproveModification(_) => EVENT_APPROVE_MODIFICATION,
            ClientEvent::RevertModification(_) => EVENT_REVERT_MODIFICATION,
            ClientEvent::RequestDesignMemory => EVENT_GET_DESIGN_MEMORY,
        }
    }

    /// Serialized argument, `None` for argument-less requests.
    pub fn payload(&self) -> Result<Option<Value>> {
        let value = match self {
            ClientEvent::Identify(p) => Some(serde_json::to_value(p)?),
            ClientEvent::ChatMessage(p) => Some(serde_json::to_value(p)?),
            ClientEvent::ModifyParameter(p) => Some(serde_json::to_value(p)?),
            ClientEvent::ApproveModification(p) => Some(serde_json::to_value(p)?),
            ClientEvent::RevertModification(p) => Some(serde_json::to_value(p)?),
            ClientEvent::RequestModelData
            | ClientEvent::RequestFeatures
            | ClientEvent::RequestGeometry
            | ClientEvent::RequestDesignMemory => None,
        };
        Ok(value)
    }
}

/// Payload of `bot_response`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub message: String,
    /// Backend clock for the reply. Unparseable values are dropped and the
    /// message keeps its local receive time.
    #[serde(default, deserialize_with = "lenient_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub features: Option<Vec<Feature>>,
    #[serde(default)]
    pub memory_context: Option<MemoryContext>,
}

/// Payload of `model_data_update`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModelData {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// Payload of `modification_preview`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModificationPreview {
    #[serde(flatten)]
    pub modification: PendingModification,
    #[serde(default)]
    pub geometry: Option<Geometry>,
}

/// Payload of `modification_success`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ModificationSuccess {
    pub modification: Modification,
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub message: String,
}

/// Payload of `modification_error`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModificationFailure {
    pub message: String,
    pub error: Option<String>,
}

impl ModificationFailure {
    /// Accepts a bare string or an object with `message` and/or `error`.
    fn from_payload(payload: Value) -> Self {
        let error = payload
            .get("error")
            .and_then(Value::as_str)
            .map(str::to_string);
        let message = match payload.get("message").and_then(Value::as_str) {
            Some(message) => message.to_string(),
            None => error_text(payload),
        };
        Self { message, error }
    }
}

/// Payload of `model_changed_externally`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ExternalChange {
    #[serde(default)]
    pub features: Vec<Feature>,
    #[serde(default)]
    pub geometry: Option<Geometry>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Events the backend pushes.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    Thinking(bool),
    ChatResponse(ChatResponse),
    ChatError(String),
    ModelData(ModelData),
    ModelDataError(String),
    Features(Vec<Feature>),
    FeaturesError(String),
    ModificationProgress(String),
    ModificationPreview(ModificationPreview),
    ModificationSuccess(ModificationSuccess),
    ModificationError(ModificationFailure),
    DesignMemory(DesignMemory),
    ExternalChange(ExternalChange),
    Geometry(Geometry),
    GeometryError(String),
}

impl ServerEvent {
    /// Decode an inbound event by name.
    ///
    /// Returns `Ok(None)` for event names this client does not handle.
    ///
    /// # Errors
    ///
    /// Returns [`ContextformError::Protocol`] when the payload does not match
    /// the shape expected for a known event.
    pub fn decode(name: &str, payload: Value) -> Result<Option<Self>> {
        let event = match name {
            EVENT_BOT_THINKING => ServerEvent::Thinking(parse(name, payload)?),
            EVENT_BOT_RESPONSE => ServerEvent::ChatResponse(parse(name, payload)?),
            EVENT_CHAT_ERROR => ServerEvent::ChatError(error_text(payload)),
            EVENT_MODEL_DATA_UPDATE => ServerEvent::ModelData(parse(name, payload)?),
            EVENT_MODEL_DATA_ERROR => ServerEvent::ModelDataError(error_text(payload)),
            EVENT_CURRENT_FEATURES => ServerEvent::Features(parse(name, payload)?),
            EVENT_FEATURES_ERROR => ServerEvent::FeaturesError(error_text(payload)),
            EVENT_MODIFICATION_PROGRESS => ServerEvent::ModificationProgress(error_text(payload)),
            EVENT_MODIFICATION_PREVIEW => ServerEvent::ModificationPreview(parse(name, payload)?),
            EVENT_MODIFICATION_SUCCESS => ServerEvent::ModificationSuccess(parse(name, payload)?),
            EVENT_MODIFICATION_ERROR => {
                ServerEvent::ModificationError(ModificationFailure::from_payload(payload))
            }
            EVENT_DESIGN_MEMORY => ServerEvent::DesignMemory(parse(name, payload)?),
            EVENT_MODEL_CHANGED_EXTERNALLY => ServerEvent::ExternalChange(parse(name, payload)?),
            EVENT_GEOMETRY_UPDATE => ServerEvent::Geometry(Geometry(payload)),
            EVENT_GEOMETRY_ERROR => ServerEvent::GeometryError(error_text(payload)),
            _ => return Ok(None),
        };
        Ok(Some(event))
    }
}

fn parse<T: serde::de::DeserializeOwned>(name: &str, payload: Value) -> Result<T> {
    serde_json::from_value(payload).map_err(|e| {
        ContextformError::Protocol(format!("invalid '{name}' payload: {e}")).into()
    })
}

/// RFC 3339 strings and epoch milliseconds are understood; anything else
/// decodes to `None` rather than failing the whole event.
fn lenient_timestamp<'de, D>(deserializer: D) -> std::result::Result<Option<DateTime<Utc>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Option::<Value>::deserialize(deserializer)?;
    let parsed = match &raw {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(s)) => DateTime::parse_from_rfc3339(s)
            .ok()
            .map(|t| t.with_timezone(&Utc)),
        Some(Value::Number(n)) => n.as_i64().and_then(DateTime::from_timestamp_millis),
        Some(_) => None,
    };
    if parsed.is_none() {
        tracing::debug!(timestamp = ?raw, "Ignoring unparseable reply timestamp");
    }
    Ok(parsed)
}

/// Error events carry either a bare string or an object with `error`/`message`.
fn error_text(payload: Value) -> String {
    match payload {
        Value::String(s) => s,
        Value::Object(map) => map
            .get("error")
            .or_else(|| map.get("message"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Value::Object(map).to_string()),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Convert a previewed modification into the revert request for it.
///
/// Returns `None` unless the change was applied and its original state
/// was captured.
pub fn revert_request_for(pending: &PendingModification) -> Option<RevertRequest> {
    if !pending.applied {
        return None;
    }
    let OriginalState { original_value, .. } = pending.original_state.as_ref()?;
    Some(RevertRequest {
        feature_id: pending.feature_id.clone(),
        parameter_id: pending.parameter_id.clone(),
        original_value: original_value.clone(),
        new_value: pending.new_value.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn pending(applied: bool, original: Option<&str>) -> PendingModification {
        PendingModification {
            feature_id: "F1".to_string(),
            parameter_id: "width".to_string(),
            old_value: "5 mm".to_string(),
            new_value: "10 mm".to_string(),
            intent: "wider".to_string(),
            original_state: original.map(|v| OriginalState {
                original_value: v.to_string(),
                extra: Default::default(),
            }),
            applied,
        }
    }

    #[test]
    fn test_client_event_names() {
        assert_eq!(ClientEvent::RequestModelData.name(), "get_model_data");
        assert_eq!(ClientEvent::RequestFeatures.name(), "get_current_features");
        assert_eq!(ClientEvent::RequestDesignMemory.name(), "get_design_memory");
        assert_eq!(
            ClientEvent::ChatMessage(ChatRequest {
                message: "hi".to_string()
            })
            .name(),
            "chat_message"
        );
    }

    #[test]
    fn test_argumentless_requests_have_no_payload() {
        assert!(ClientEvent::RequestModelData.payload().unwrap().is_none());
        assert!(ClientEvent::RequestGeometry.payload().unwrap().is_none());
    }

    #[test]
    fn test_modify_parameter_omits_missing_intent() {
        let event = ClientEvent::ModifyParameter(ModifyParameterRequest {
            feature_id: "F1".to_string(),
            parameter_id: "depth".to_string(),
            new_value: "3 in".to_string(),
            intent: None,
        });
        let payload = event.payload().unwrap().unwrap();
        assert_eq!(payload["featureId"], "F1");
        assert!(payload.get("intent").is_none());
    }

    #[test]
    fn test_approve_carries_full_pending_payload() {
        let event = ClientEvent::ApproveModification(pending(true, Some("5 mm")));
        let payload = event.payload().unwrap().unwrap();
        assert_eq!(payload["applied"], true);
        assert_eq!(payload["originalState"]["originalValue"], "5 mm");
        assert_eq!(payload["intent"], "wider");
    }

    #[test]
    fn test_decode_thinking() {
        let event = ServerEvent::decode("bot_thinking", json!(true)).unwrap();
        assert_eq!(event, Some(ServerEvent::Thinking(true)));
    }

    #[test]
    fn test_decode_unknown_event_is_none() {
        assert!(ServerEvent::decode("something_new", json!({}))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_decode_malformed_payload_is_protocol_error() {
        let err = ServerEvent::decode("bot_thinking", json!("yes")).unwrap_err();
        assert!(err.to_string().contains("bot_thinking"));
    }

    #[test]
    fn test_decode_chat_response_with_memory_context() {
        let event = ServerEvent::decode(
            "bot_response",
            json!({
                "message": "Done",
                "timestamp": "2024-05-01T10:00:00Z",
                "memoryContext": { "count": 1, "decisions": ["Kept wall at 2 mm"] }
            }),
        )
        .unwrap()
        .unwrap();
        match event {
            ServerEvent::ChatResponse(resp) => {
                assert_eq!(resp.message, "Done");
                assert_eq!(resp.memory_context.unwrap().count, 1);
                assert!(resp.features.is_none());
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_preview_with_geometry() {
        let event = ServerEvent::decode(
            "modification_preview",
            json!({
                "featureId": "F1",
                "parameterId": "width",
                "oldValue": "5 mm",
                "newValue": "10 mm",
                "intent": "wider",
                "applied": false,
                "geometry": { "vertices": [] }
            }),
        )
        .unwrap()
        .unwrap();
        match event {
            ServerEvent::ModificationPreview(preview) => {
                assert!(!preview.modification.applied);
                assert_eq!(preview.geometry, Some(Geometry(json!({ "vertices": [] }))));
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn test_decode_chat_response_tolerates_odd_timestamps() {
        for timestamp in [json!("5/1/2024, 10:00:00 AM"), json!(true), Value::Null] {
            let event = ServerEvent::decode(
                "bot_response",
                json!({ "message": "Done", "timestamp": timestamp }),
            )
            .unwrap()
            .unwrap();
            match event {
                ServerEvent::ChatResponse(resp) => {
                    assert_eq!(resp.message, "Done");
                    assert!(resp.timestamp.is_none());
                }
                other => panic!("unexpected event {other:?}"),
            }
        }
    }

    #[test]
    fn test_decode_chat_response_timestamp_formats() {
        let decode = |timestamp: Value| match ServerEvent::decode(
            "bot_response",
            json!({ "message": "Done", "timestamp": timestamp }),
        )
        .unwrap()
        {
            Some(ServerEvent::ChatResponse(resp)) => resp.timestamp,
            other => panic!("unexpected event {other:?}"),
        };

        let expected = DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(decode(json!("2024-05-01T10:00:00Z")), Some(expected));
        assert_eq!(decode(json!(1714557600000i64)), Some(expected));
    }

    #[test]
    fn test_decode_modification_error_shapes() {
        let decode = |payload: Value| match ServerEvent::decode("modification_error", payload)
            .unwrap()
        {
            Some(ServerEvent::ModificationError(failure)) => failure,
            other => panic!("unexpected event {other:?}"),
        };

        let bare = decode(json!("Parameter is locked"));
        assert_eq!(bare.message, "Parameter is locked");
        assert!(bare.error.is_none());

        let full = decode(json!({ "message": "Could not update width", "error": "400" }));
        assert_eq!(full.message, "Could not update width");
        assert_eq!(full.error.as_deref(), Some("400"));

        let error_only = decode(json!({ "error": "Feature not found" }));
        assert_eq!(error_only.message, "Feature not found");
        assert_eq!(error_only.error.as_deref(), Some("Feature not found"));
    }

    #[test]
    fn test_error_text_variants() {
        assert_eq!(error_text(json!("boom")), "boom");
        assert_eq!(error_text(json!({ "error": "bad key" })), "bad key");
        assert_eq!(error_text(json!({ "message": "nope" })), "nope");
        assert_eq!(error_text(Value::Null), "");
    }

    #[test]
    fn test_revert_request_requires_applied_and_original_state() {
        assert!(revert_request_for(&pending(false, Some("5 mm"))).is_none());
        assert!(revert_request_for(&pending(true, None)).is_none());

        let revert = revert_request_for(&pending(true, Some("5 mm"))).unwrap();
        assert_eq!(revert.original_value, "5 mm");
        assert_eq!(revert.new_value, "10 mm");
    }
}
