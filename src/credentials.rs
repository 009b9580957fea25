//! Persisted user credentials
//!
//! Credentials live as a single JSON file named after the
//! `contextform_auth` key, in the user's data directory unless a path is
//! configured. A file that cannot be parsed is deleted and treated as
//! absent, so a corrupt save never blocks signing in again.

use std::path::{Path, PathBuf};

use anyhow::Context;
use directories::ProjectDirs;

use crate::error::{ContextformError, Result};
use crate::types::UserCredentials;

/// Storage key, also the file stem.
pub const CREDENTIALS_KEY: &str = "contextform_auth";

/// File-backed credential storage.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    /// Store in the platform data directory.
    ///
    /// # Errors
    ///
    /// Returns [`ContextformError::Credentials`] if no data directory can be
    /// determined for the current user.
    pub fn new() -> Result<Self> {
        let proj_dirs = ProjectDirs::from("com", "contextform", "contextform").ok_or_else(|| {
            ContextformError::Credentials("Could not determine data directory".into())
        })?;
        Ok(Self::with_path(
            proj_dirs.data_dir().join(format!("{CREDENTIALS_KEY}.json")),
        ))
    }

    /// Store at an explicit file path.
    pub fn with_path<P: Into<PathBuf>>(path: P) -> Self {
        Self { path: path.into() }
    }

    /// Configured path if any, else the platform default.
    pub fn from_config(config: &crate::config::StorageConfig) -> Result<Self> {
        match &config.credentials_path {
            Some(path) => Ok(Self::with_path(path.clone())),
            None => Self::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load saved credentials, if any.
    ///
    /// # Errors
    ///
    /// Returns an error only if the file exists but cannot be read. Corrupt
    /// contents are removed and reported as `None`.
    pub fn load(&self) -> Result<Option<UserCredentials>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(ContextformError::Credentials(format!(
                    "Failed to read {}: {}",
                    self.path.display(),
                    e
                ))
                .into())
            }
        };

        match serde_json::from_str::<UserCredentials>(&contents) {
            Ok(credentials) => Ok(Some(credentials)),
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Discarding corrupt credentials");
                if let Err(e) = std::fs::remove_file(&self.path) {
                    tracing::debug!("Failed to remove corrupt credentials: {}", e);
                }
                Ok(None)
            }
        }
    }

    /// Persist `credentials`, replacing any previous save.
    pub fn save(&self, credentials: &UserCredentials) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .context("Failed to create credentials directory")
                .map_err(|e| ContextformError::Credentials(e.to_string()))?;
        }
        let json = serde_json::to_string_pretty(credentials)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write {}", self.path.display()))
            .map_err(|e| ContextformError::Credentials(format!("{e:#}")))?;
        restrict_permissions(&self.path);

        tracing::info!(email = %credentials.email, "Saved credentials");
        Ok(())
    }

    /// Remove saved credentials. Missing files are not an error.
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!("Cleared saved credentials");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ContextformError::Io(e).into()),
        }
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        tracing::debug!("Failed to restrict credentials permissions: {}", e);
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn credentials() -> UserCredentials {
        UserCredentials {
            email: "ada@example.com".to_string(),
            name: "Ada".to_string(),
            access_key: "AK".to_string(),
            secret_key: "SK".to_string(),
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::with_path(dir.path().join("auth.json"));
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::with_path(dir.path().join("nested/deeper/auth.json"));
        store.save(&credentials()).unwrap();
        assert!(store.path().exists());
    }

    #[test]
    fn test_saved_file_uses_camel_case_keys() {
        let dir = tempdir().unwrap();
        let store = CredentialStore::with_path(dir.path().join("auth.json"));
        store.save(&credentials()).unwrap();
        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(raw.contains("\"accessKey\""));
        assert!(raw.contains("\"secretKey\""));
    }

    #[cfg(unix)]
    #[test]
    fn test_saved_file_is_owner_only() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let store = CredentialStore::with_path(dir.path().join("auth.json"));
        store.save(&credentials()).unwrap();
        let mode = std::fs::metadata(store.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}
