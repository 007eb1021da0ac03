//! Credential source backed by a session file.
//!
//! Sign-in happens elsewhere; the authentication helper keeps a small JSON
//! file with the current bearer token and owner id up to date. Refreshing
//! means reading that file again.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::models::{Credentials, SessionError};

/// Reads credentials from a JSON session file.
#[derive(Debug, Clone)]
pub struct SessionFile {
    path: PathBuf,
}

impl SessionFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the current credentials.
    pub async fn read(&self) -> Result<Credentials, SessionError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            SessionError::Credentials(format!("cannot read {:?}: {}", self.path, e))
        })?;

        let credentials: Credentials = serde_json::from_str(&content).map_err(|e| {
            SessionError::Credentials(format!("cannot parse {:?}: {}", self.path, e))
        })?;

        if credentials.bearer_token.trim().is_empty() {
            return Err(SessionError::Credentials(format!(
                "{:?} has an empty bearer token",
                self.path
            )));
        }
        if credentials.owner_id.trim().is_empty() {
            return Err(SessionError::Credentials(format!(
                "{:?} has an empty owner id",
                self.path
            )));
        }

        debug!("Read credentials for owner {}", credentials.owner_id);
        Ok(credentials)
    }
}
