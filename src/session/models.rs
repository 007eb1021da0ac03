//! Types exchanged with the remote session.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Bearer credential plus the identity of the archive owner.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
    pub bearer_token: String,
    pub owner_id: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("bearer_token", &"<redacted>")
            .field("owner_id", &self.owner_id)
            .finish()
    }
}

/// A payload written to a local file by one of the download strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactHandle {
    /// Where the payload was written
    pub path: PathBuf,
    /// Number of bytes written
    pub bytes: u64,
    /// Declared content type, if the remote sent one
    pub content_type: Option<String>,
}

/// Errors that can occur while talking to the remote service.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Unauthorized (status {0})")]
    Unauthorized(u16),

    #[error("Request failed with status {0}")]
    Status(u16),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("No download link found on {0}")]
    NoDownloadLink(String),

    #[error("Credentials unavailable: {0}")]
    Credentials(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SessionError {
    /// Returns true for 401/403-class failures that a credential refresh may fix.
    pub fn is_authorization(&self) -> bool {
        matches!(self, SessionError::Unauthorized(_))
    }

    /// Classify an HTTP status code that is not a success.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => SessionError::Unauthorized(status),
            _ => SessionError::Status(status),
        }
    }
}

impl From<reqwest::Error> for SessionError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            SessionError::Timeout(e.to_string())
        } else if let Some(status) = e.status() {
            SessionError::from_status(status.as_u16())
        } else if e.is_decode() {
            SessionError::InvalidPayload(e.to_string())
        } else {
            SessionError::Transport(e.to_string())
        }
    }
}
