//! Document listing over the backend REST endpoint
//!
//! The backend proxies Onshape: it takes the user's API keys in the request
//! body and answers with the documents those keys can see. HTTP failures
//! are classified into [`DocumentFetchError`], whose `Display` is the copy
//! shown to the user. Nothing is retried automatically.

use std::time::Duration;

use chrono::{DateTime, Local, NaiveDate};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{ContextformError, DocumentFetchError, Result};
use crate::types::{Document, UserCredentials};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DocumentsRequest<'a> {
    access_key: &'a str,
    secret_key: &'a str,
}

#[derive(Debug, Deserialize)]
struct DocumentsResponse {
    #[serde(default)]
    items: Vec<Document>,
}

/// HTTP client for the document listing endpoint.
#[derive(Debug, Clone)]
pub struct DocumentClient {
    client: Client,
    endpoint: Url,
}

impl DocumentClient {
    /// Create a client posting to `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`ContextformError::Http`] if the HTTP client cannot be built.
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("contextform/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ContextformError::from)?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Fetch the documents visible to `credentials`.
    ///
    /// # Errors
    ///
    /// Returns a [`DocumentFetchError`] (wrapped in [`ContextformError::Documents`])
    /// classified from the HTTP status, or `Network` if the server could not
    /// be reached.
    pub async fn list(&self, credentials: &UserCredentials) -> Result<Vec<Document>> {
        let response = self
            .client
            .post(self.endpoint.clone())
            .json(&DocumentsRequest {
                access_key: &credentials.access_key,
                secret_key: &credentials.secret_key,
            })
            .send()
            .await
            .map_err(|e| {
                tracing::warn!("Document request failed: {}", e);
                ContextformError::Documents(classify_send_error(&e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(status = status.as_u16(), %body, "Document listing rejected");
            return Err(
                ContextformError::Documents(DocumentFetchError::from_status(status.as_u16()))
                    .into(),
            );
        }

        let body: DocumentsResponse = response.json().await.map_err(|e| {
            tracing::warn!("Unreadable document listing: {}", e);
            ContextformError::Documents(DocumentFetchError::Other { status: None })
        })?;

        tracing::debug!(count = body.items.len(), "Fetched documents");
        Ok(body.items)
    }
}

fn classify_send_error(error: &reqwest::Error) -> DocumentFetchError {
    if error.is_connect() || error.is_timeout() || error.is_request() {
        DocumentFetchError::Network
    } else {
        DocumentFetchError::Other { status: None }
    }
}

/// Render an ISO-8601 timestamp as a local calendar date.
///
/// Unparsable input is returned unchanged.
pub fn format_local_date(raw: &str) -> String {
    if let Ok(at) = DateTime::parse_from_rfc3339(raw) {
        return at.with_timezone(&Local).format("%Y-%m-%d").to_string();
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return date.format("%Y-%m-%d").to_string();
    }
    raw.to_string()
}

/// One-line summary of a document for pickers and listings.
pub fn summarize(document: &Document) -> String {
    let mut line = document.name.clone();
    if let Some(modified) = &document.modified_at {
        line.push_str(&format!("  (modified {})", format_local_date(modified)));
    } else if let Some(created) = &document.created_at {
        line.push_str(&format!("  (created {})", format_local_date(created)));
    }
    line
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_local_date_accepts_plain_dates() {
        assert_eq!(format_local_date("2024-03-09"), "2024-03-09");
    }

    #[test]
    fn test_format_local_date_passes_through_garbage() {
        assert_eq!(format_local_date("last tuesday"), "last tuesday");
    }

    #[test]
    fn test_format_local_date_converts_timestamps() {
        let rendered = format_local_date("2024-03-09T12:00:00Z");
        // Any timezone keeps noon UTC on the 9th or an adjacent day.
        assert!(
            ["2024-03-08", "2024-03-09", "2024-03-10"].contains(&rendered.as_str()),
            "{rendered}"
        );
    }

    #[test]
    fn test_summarize_prefers_modified_date() {
        let document = Document {
            id: "d1".to_string(),
            name: "Bracket".to_string(),
            created_at: Some("2024-01-01".to_string()),
            modified_at: Some("2024-02-02".to_string()),
        };
        assert_eq!(summarize(&document), "Bracket  (modified 2024-02-02)");
    }

    #[test]
    fn test_summarize_without_dates() {
        let document = Document {
            id: "d1".to_string(),
            name: "Bracket".to_string(),
            created_at: None,
            modified_at: None,
        };
        assert_eq!(summarize(&document), "Bracket");
    }

    #[test]
    fn test_request_body_uses_camel_case_keys() {
        let body = serde_json::to_value(DocumentsRequest {
            access_key: "AK",
            secret_key: "SK",
        })
        .unwrap();
        assert_eq!(body, serde_json::json!({ "accessKey": "AK", "secretKey": "SK" }));
    }
}
