//! Domain types shared by the session layer, the wire protocol, and the CLI
//!
//! Field names follow the backend's camelCase JSON so the same structs are
//! used on the wire and in the observable session snapshot.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Author of a transcript entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Ai,
    System,
}

impl fmt::Display for Sender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Sender::User => write!(f, "you"),
            Sender::Ai => write!(f, "ai"),
            Sender::System => write!(f, "system"),
        }
    }
}

/// A single transcript entry. Never mutated after it is appended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: String,
    pub content: String,
    pub sender: Sender,
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Create a message stamped with a fresh id and the current time.
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.into(),
            sender,
            timestamp: Utc::now(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Sender::User, content)
    }

    pub fn ai(content: impl Into<String>) -> Self {
        Self::new(Sender::Ai, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Sender::System, content)
    }

    /// Replace the timestamp, e.g. with the one reported by the backend.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Snapshot of a remote CAD feature (extrude, fillet, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Feature {
    pub id: String,
    #[serde(rename = "type")]
    pub feature_type: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<String>,
}

/// Geometry payload handed to a viewer. Never interpreted by this crate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Geometry(pub serde_json::Value);

/// Parameter state captured by the backend before it speculatively applied
/// a change. Unknown fields are preserved so the payload can be echoed back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OriginalState {
    #[serde(deserialize_with = "string_or_number")]
    pub original_value: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A backend-proposed parameter change awaiting approval or rejection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingModification {
    pub feature_id: String,
    pub parameter_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub old_value: String,
    #[serde(deserialize_with = "string_or_number")]
    pub new_value: String,
    #[serde(default)]
    pub intent: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub original_state: Option<OriginalState>,
    #[serde(default)]
    pub applied: bool,
}

impl PendingModification {
    /// The change was applied speculatively and can be undone by the backend.
    pub fn can_revert(&self) -> bool {
        self.applied && self.original_state.is_some()
    }
}

/// A confirmed modification record, as kept in the design memory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Modification {
    pub id: String,
    pub timestamp: String,
    pub feature_id: String,
    pub parameter_id: String,
    #[serde(deserialize_with = "string_or_number")]
    pub old_value: String,
    #[serde(deserialize_with = "string_or_number")]
    pub new_value: String,
    #[serde(default)]
    pub intent: String,
}

/// Modification history and recorded intents for the current document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignMemory {
    #[serde(default)]
    pub modifications: Vec<Modification>,
    #[serde(default)]
    pub intents: HashMap<String, String>,
    #[serde(default)]
    pub parameters: HashMap<String, String>,
}

/// Prior design decisions the backend consulted to produce a reply.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryContext {
    #[serde(default)]
    pub count: usize,
    #[serde(default, alias = "summaries")]
    pub decisions: Vec<String>,
}

/// Onshape API credentials plus the account they belong to.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCredentials {
    pub email: String,
    pub name: String,
    pub access_key: String,
    pub secret_key: String,
}

impl fmt::Debug for UserCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserCredentials")
            .field("email", &self.email)
            .field("name", &self.name)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .finish()
    }
}

/// A CAD document the credentials can access.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Document {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<String>,
}

/// Accept `"10"` and `10` alike; the backend is not consistent about it.
fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => Ok(s),
        serde_json::Value::Number(n) => Ok(n.to_string()),
        serde_json::Value::Bool(b) => Ok(b.to_string()),
        serde_json::Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number, got {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sender_serializes_lowercase() {
        assert_eq!(serde_json::to_value(Sender::Ai).unwrap(), json!("ai"));
        assert_eq!(serde_json::to_value(Sender::System).unwrap(), json!("system"));
    }

    #[test]
    fn test_chat_message_ids_are_unique() {
        let a = ChatMessage::user("one");
        let b = ChatMessage::user("one");
        assert_ne!(a.id, b.id);
        assert_eq!(a.sender, Sender::User);
    }

    #[test]
    fn test_feature_type_field_renamed() {
        let feature: Feature = serde_json::from_value(json!({
            "id": "F1",
            "type": "extrude",
            "name": "Extrude 1",
            "depth": "10 mm"
        }))
        .unwrap();
        assert_eq!(feature.feature_type, "extrude");
        assert_eq!(feature.depth.as_deref(), Some("10 mm"));
        assert!(feature.dimensions.is_none());
    }

    #[test]
    fn test_pending_modification_accepts_numeric_values() {
        let pending: PendingModification = serde_json::from_value(json!({
            "featureId": "F1",
            "parameterId": "depth",
            "oldValue": 5,
            "newValue": "10 mm",
            "intent": "make it deeper",
            "applied": true,
            "originalState": { "originalValue": 5, "units": "mm" }
        }))
        .unwrap();
        assert_eq!(pending.old_value, "5");
        assert!(pending.can_revert());
        let original = pending.original_state.as_ref().unwrap();
        assert_eq!(original.original_value, "5");
        assert_eq!(original.extra["units"], "mm");
    }

    #[test]
    fn test_pending_modification_without_original_state_cannot_revert() {
        let pending: PendingModification = serde_json::from_value(json!({
            "featureId": "F1",
            "parameterId": "depth",
            "oldValue": "5",
            "newValue": "10",
            "applied": true
        }))
        .unwrap();
        assert!(!pending.can_revert());
        assert_eq!(pending.intent, "");
    }

    #[test]
    fn test_memory_context_accepts_summaries_alias() {
        let ctx: MemoryContext = serde_json::from_value(json!({
            "count": 2,
            "summaries": ["a", "b"]
        }))
        .unwrap();
        assert_eq!(ctx.decisions, vec!["a", "b"]);
    }

    #[test]
    fn test_credentials_debug_redacts_secret() {
        let creds = UserCredentials {
            email: "a@b.c".to_string(),
            name: "A".to_string(),
            access_key: "ak".to_string(),
            secret_key: "very-secret".to_string(),
        };
        let debug = format!("{creds:?}");
        assert!(!debug.contains("very-secret"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_credentials_wire_names() {
        let creds = UserCredentials {
            email: "a@b.c".to_string(),
            name: "A".to_string(),
            access_key: "ak".to_string(),
            secret_key: "sk".to_string(),
        };
        let value = serde_json::to_value(&creds).unwrap();
        assert_eq!(value["accessKey"], "ak");
        assert_eq!(value["secretKey"], "sk");
    }
}
