//! Remote session module
//!
//! The archiver core talks to the remote service only through the
//! [`RemoteSession`] capability. `HttpSession` is the production
//! implementation; tests substitute in-memory mocks.

mod credentials;
mod http_session;
mod models;

use std::path::Path;

use async_trait::async_trait;

pub use credentials::SessionFile;
pub use http_session::{extract_download_link, HttpSession};
pub use models::*;

/// Narrow capability interface over the remote service.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Fetch a JSON document.
    async fn request_json(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<serde_json::Value, SessionError>;

    /// Fetch an item's binary payload directly and write it to `dest`.
    async fn request_binary(
        &self,
        item_id: &str,
        credentials: &Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, SessionError>;

    /// Obtain the payload through the item's own page and write it to `dest`.
    ///
    /// Slower and less reliable than [`RemoteSession::request_binary`].
    async fn drive_interactive_download(
        &self,
        item_uri: &str,
        credentials: &Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, SessionError>;

    /// Read the current credentials.
    async fn read_credentials(&self) -> Result<Credentials, SessionError>;

    /// Ask the authentication collaborator for fresh credentials.
    async fn refresh_credentials(&self) -> Result<Credentials, SessionError>;
}
