use std::sync::Arc;

use serde_json::{json, Value};

use contextform::session::{SessionManager, SessionOptions};
use contextform::transport::fake::{FakeTransport, FakeTransportHandle};
use contextform::types::{Document, UserCredentials};

#[allow(dead_code)]
pub fn credentials() -> UserCredentials {
    UserCredentials {
        email: "ada@example.com".to_string(),
        name: "Ada".to_string(),
        access_key: "AK-123".to_string(),
        secret_key: "SK-456".to_string(),
    }
}

#[allow(dead_code)]
pub fn document() -> Document {
    Document {
        id: "doc-1".to_string(),
        name: "Mounting Bracket".to_string(),
        created_at: None,
        modified_at: None,
    }
}

/// Session over a fake transport, plus the handle that plays the backend.
#[allow(dead_code)]
pub fn start_session() -> (Arc<FakeTransport>, SessionManager, FakeTransportHandle) {
    let (transport, handle) = FakeTransport::new();
    let transport = Arc::new(transport);
    let session = SessionManager::start(
        transport.clone(),
        credentials(),
        document(),
        SessionOptions::default(),
    );
    (transport, session, handle)
}

/// Let spawned tasks drain their queues without advancing a paused clock.
#[allow(dead_code)]
pub async fn settle() {
    for _ in 0..50 {
        tokio::task::yield_now().await;
    }
}

#[allow(dead_code)]
pub fn preview_payload(applied: bool, with_original: bool) -> Value {
    let mut payload = json!({
        "featureId": "F1",
        "parameterId": "width",
        "oldValue": "5 mm",
        "newValue": "10 mm",
        "intent": "make it wider",
        "applied": applied,
    });
    if with_original {
        payload["originalState"] = json!({ "originalValue": "5 mm" });
    }
    payload
}
