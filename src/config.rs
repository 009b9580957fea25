//! Configuration management for contextform
//!
//! This module handles loading, parsing, validating, and managing
//! configuration from files, environment variables, and CLI overrides.

use crate::error::{ContextformError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use url::Url;

/// Main configuration structure for contextform
///
/// Every section has defaults, so an empty or missing file is valid.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Backend server location
    #[serde(default)]
    pub server: ServerConfig,
    /// Conversation behavior
    #[serde(default)]
    pub session: SessionConfig,
    /// Socket.IO connection behavior
    #[serde(default)]
    pub transport: TransportConfig,
    /// Local persistence
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Backend server configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Base URL of the assistant backend (HTTP and Socket.IO)
    #[serde(default = "default_server_url")]
    pub url: String,

    /// Path of the document listing endpoint, relative to `url`
    #[serde(default = "default_documents_path")]
    pub documents_path: String,
}

fn default_server_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_documents_path() -> String {
    "/api/documents".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            documents_path: default_documents_path(),
        }
    }
}

impl ServerConfig {
    /// Parsed base URL.
    ///
    /// # Errors
    ///
    /// Returns [`ContextformError::Config`] if `url` is not a valid URL.
    pub fn base_url(&self) -> Result<Url> {
        Url::parse(&self.url).map_err(|e| {
            ContextformError::Config(format!("Invalid server url '{}': {}", self.url, e)).into()
        })
    }

    /// Full URL of the document listing endpoint.
    pub fn documents_url(&self) -> Result<Url> {
        self.base_url()?.join(&self.documents_path).map_err(|e| {
            ContextformError::Config(format!(
                "Invalid documents path '{}': {}",
                self.documents_path, e
            ))
            .into()
        })
    }
}

/// Session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Seconds to wait for a reply after the backend starts thinking
    #[serde(default = "default_thinking_timeout")]
    pub thinking_timeout_seconds: u64,
}

fn default_thinking_timeout() -> u64 {
    30
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            thinking_timeout_seconds: default_thinking_timeout(),
        }
    }
}

/// Socket.IO transport configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Reconnect automatically after the connection drops
    #[serde(default = "default_reconnect")]
    pub reconnect: bool,

    /// Delay between reconnection attempts (milliseconds)
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Give up after this many consecutive failed attempts (unlimited if unset)
    #[serde(default)]
    pub max_reconnect_attempts: Option<u32>,

    /// Timeout for the websocket and Socket.IO handshake (seconds)
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_seconds: u64,
}

fn default_reconnect() -> bool {
    true
}

fn default_reconnect_delay() -> u64 {
    1000
}

fn default_connect_timeout() -> u64 {
    20
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            reconnect: default_reconnect(),
            reconnect_delay_ms: default_reconnect_delay(),
            max_reconnect_attempts: None,
            connect_timeout_seconds: default_connect_timeout(),
        }
    }
}

/// Local storage configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Override for the credentials file; defaults to the platform data dir
    #[serde(default)]
    pub credentials_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from file with environment and CLI overrides
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the YAML configuration file
    /// * `cli` - CLI arguments for overrides
    ///
    /// # Returns
    ///
    /// Returns the loaded and merged configuration
    ///
    /// # Errors
    ///
    /// Returns error if file cannot be read or parsed
    pub fn load(path: &str, cli: &crate::cli::Cli) -> Result<Self> {
        let mut config = if Path::new(path).exists() {
            Self::from_file(path)?
        } else {
            tracing::debug!("Config file not found at {}, using defaults", path);
            Self::default()
        };

        config.apply_env_vars();
        config.apply_cli_overrides(cli);

        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ContextformError::Config(format!("Failed to read config file: {}", e)))?;
        if contents.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&contents)
            .map_err(|e| ContextformError::Config(format!("Failed to parse config: {}", e)).into())
    }

    fn apply_env_vars(&mut self) {
        if let Ok(url) = std::env::var("CONTEXTFORM_SERVER_URL") {
            self.server.url = url;
        }

        if let Ok(path) = std::env::var("CONTEXTFORM_DOCUMENTS_PATH") {
            self.server.documents_path = path;
        }

        if let Ok(timeout) = std::env::var("CONTEXTFORM_THINKING_TIMEOUT_SECONDS") {
            if let Ok(value) = timeout.parse() {
                self.session.thinking_timeout_seconds = value;
            } else {
                tracing::warn!("Invalid CONTEXTFORM_THINKING_TIMEOUT_SECONDS: {}", timeout);
            }
        }

        if let Ok(reconnect) = std::env::var("CONTEXTFORM_RECONNECT") {
            match reconnect.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.transport.reconnect = true,
                "0" | "false" | "no" => self.transport.reconnect = false,
                _ => tracing::warn!("Invalid CONTEXTFORM_RECONNECT: {}", reconnect),
            }
        }

        if let Ok(delay) = std::env::var("CONTEXTFORM_RECONNECT_DELAY_MS") {
            if let Ok(value) = delay.parse() {
                self.transport.reconnect_delay_ms = value;
            } else {
                tracing::warn!("Invalid CONTEXTFORM_RECONNECT_DELAY_MS: {}", delay);
            }
        }

        if let Ok(path) = std::env::var("CONTEXTFORM_CREDENTIALS_PATH") {
            self.storage.credentials_path = Some(PathBuf::from(path));
        }
    }

    fn apply_cli_overrides(&mut self, cli: &crate::cli::Cli) {
        if cli.verbose {
            tracing::debug!("Verbose mode enabled");
        }

        if let Some(server) = &cli.server {
            self.server.url = server.clone();
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns error if any validation check fails
    pub fn validate(&self) -> Result<()> {
        let url = self.server.base_url()?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ContextformError::Config(format!(
                "server.url must use http or https, got '{}'",
                url.scheme()
            ))
            .into());
        }

        if !self.server.documents_path.starts_with('/') {
            return Err(ContextformError::Config(
                "server.documents_path must start with '/'".to_string(),
            )
            .into());
        }

        if self.session.thinking_timeout_seconds == 0 {
            return Err(ContextformError::Config(
                "session.thinking_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.transport.connect_timeout_seconds == 0 {
            return Err(ContextformError::Config(
                "transport.connect_timeout_seconds must be greater than 0".to_string(),
            )
            .into());
        }

        if self.transport.max_reconnect_attempts == Some(0) && self.transport.reconnect {
            return Err(ContextformError::Config(
                "transport.max_reconnect_attempts must be greater than 0 when reconnect is enabled"
                    .to_string(),
            )
            .into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn cli() -> crate::cli::Cli {
        crate::cli::Cli {
            config: None,
            verbose: false,
            server: None,
            command: crate::cli::Commands::Documents,
        }
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server.url, "http://localhost:3000");
        assert_eq!(config.server.documents_path, "/api/documents");
        assert_eq!(config.session.thinking_timeout_seconds, 30);
        assert!(config.transport.reconnect);
        assert_eq!(config.transport.max_reconnect_attempts, None);
    }

    #[test]
    fn test_config_validation_success() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_config_validation_bad_url() {
        let mut config = Config::default();
        config.server.url = "not a url".to_string();
        assert!(config.validate().is_err());

        config.server.url = "ftp://example.com".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_timeout() {
        let mut config = Config::default();
        config.session.thinking_timeout_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_zero_reconnect_attempts() {
        let mut config = Config::default();
        config.transport.max_reconnect_attempts = Some(0);
        assert!(config.validate().is_err());

        config.transport.reconnect = false;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_documents_url_joins_path() {
        let mut config = Config::default();
        config.server.url = "https://assist.example.com".to_string();
        assert_eq!(
            config.server.documents_url().unwrap().as_str(),
            "https://assist.example.com/api/documents"
        );
    }

    #[test]
    fn test_partial_yaml_uses_defaults() {
        let yaml = r#"
server:
  url: https://assist.example.com
transport:
  reconnect_delay_ms: 250
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.url, "https://assist.example.com");
        assert_eq!(config.server.documents_path, "/api/documents");
        assert_eq!(config.transport.reconnect_delay_ms, 250);
        assert_eq!(config.session.thinking_timeout_seconds, 30);
    }

    #[test]
    fn test_shipped_config_matches_defaults() {
        let path = concat!(env!("CARGO_MANIFEST_DIR"), "/config/config.yaml");
        let config = Config::from_file(path).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_load_missing_file_uses_defaults() {
        let config = Config::load("/nonexistent/contextform.yaml", &cli()).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    #[serial]
    fn test_load_from_file_and_cli_override() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "session:\n  thinking_timeout_seconds: 45\n").unwrap();

        let mut cli = cli();
        cli.server = Some("http://10.0.0.2:3000".to_string());
        let config = Config::load(path.to_str().unwrap(), &cli).unwrap();
        assert_eq!(config.session.thinking_timeout_seconds, 45);
        assert_eq!(config.server.url, "http://10.0.0.2:3000");
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        std::env::set_var("CONTEXTFORM_SERVER_URL", "https://env.example.com");
        std::env::set_var("CONTEXTFORM_THINKING_TIMEOUT_SECONDS", "12");
        std::env::set_var("CONTEXTFORM_RECONNECT", "false");

        let mut config = Config::default();
        config.apply_env_vars();

        std::env::remove_var("CONTEXTFORM_SERVER_URL");
        std::env::remove_var("CONTEXTFORM_THINKING_TIMEOUT_SECONDS");
        std::env::remove_var("CONTEXTFORM_RECONNECT");

        assert_eq!(config.server.url, "https://env.example.com");
        assert_eq!(config.session.thinking_timeout_seconds, 12);
        assert!(!config.transport.reconnect);
    }

    #[test]
    #[serial]
    fn test_invalid_env_value_is_ignored() {
        std::env::set_var("CONTEXTFORM_RECONNECT_DELAY_MS", "soon");
        let mut config = Config::default();
        config.apply_env_vars();
        std::env::remove_var("CONTEXTFORM_RECONNECT_DELAY_MS");

        assert_eq!(config.transport.reconnect_delay_ms, 1000);
    }
}
