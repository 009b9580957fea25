//! Error types for Contextform
//!
//! This module defines the error types used throughout the crate,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Contextform operations
///
/// Covers configuration loading, the Socket.IO transport, protocol
/// decoding, session operations, document fetching, and credential
/// persistence.
#[derive(Error, Debug)]
pub enum ContextformError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport-level failures (websocket connect, closed channels)
    #[error("Transport error: {0}")]
    Transport(String),

    /// Malformed Socket.IO / Engine.IO packets or event payloads
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Session operation errors (e.g. operating on a closed session)
    #[error("Session error: {0}")]
    Session(String),

    /// Document listing failures, carrying the user-facing copy
    #[error(transparent)]
    Documents(#[from] DocumentFetchError),

    /// Credential persistence errors
    #[error("Credentials error: {0}")]
    Credentials(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Websocket errors
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// Classified failure of the document listing endpoint.
///
/// The `Display` output is the copy shown to the user.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentFetchError {
    #[error("Failed to fetch documents. Invalid API credentials. Please check your access and secret keys.")]
    Unauthorized,

    #[error("Failed to fetch documents. Access denied. Your API credentials may not have the required permissions.")]
    Forbidden,

    #[error("Failed to fetch documents. Rate limit exceeded. Please wait a moment and try again.")]
    RateLimited,

    #[error("Failed to fetch documents. Onshape server error. Please try again later.")]
    ServerError,

    #[error("Failed to fetch documents. Network error. Please check your internet connection.")]
    Network,

    /// Any other status or an unreadable response body
    #[error("Failed to fetch documents. Please check your API credentials and try again.")]
    Other {
        /// HTTP status, when one was received
        status: Option<u16>,
    },
}

impl DocumentFetchError {
    /// Classify an HTTP status code returned by the documents endpoint.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 => Self::Unauthorized,
            403 => Self::Forbidden,
            429 => Self::RateLimited,
            500 => Self::ServerError,
            other => Self::Other {
                status: Some(other),
            },
        }
    }
}

/// Result type alias for Contextform operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;
