use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use track_archiver::session::{ArtifactHandle, Credentials, RemoteSession, SessionError};

pub const MB: usize = 1024 * 1024;

/// Remote session replaying scripted listing pages and payloads.
///
/// Listing pages are served in order regardless of the requested URL.
/// Items without a scripted payload fail both download strategies.
#[derive(Default)]
pub struct ScriptedSession {
    pages: Mutex<VecDeque<Result<Value, u16>>>,
    payloads: Mutex<HashMap<String, usize>>,
    credentials: Option<Credentials>,
    listing_urls: Mutex<Vec<String>>,
    direct_calls: Mutex<Vec<String>>,
}

impl ScriptedSession {
    pub fn new() -> Self {
        Self {
            credentials: Some(Credentials {
                bearer_token: "token".to_string(),
                owner_id: "owner-1".to_string(),
            }),
            ..Default::default()
        }
    }

    /// A session whose credential source has nothing to offer.
    pub fn without_credentials() -> Self {
        Self::default()
    }

    pub fn with_page(self, page: Value) -> Self {
        self.pages.lock().unwrap().push_back(Ok(page));
        self
    }

    pub fn with_failing_page(self, status: u16) -> Self {
        self.pages.lock().unwrap().push_back(Err(status));
        self
    }

    pub fn with_payload(self, id: &str, bytes: usize) -> Self {
        self.payloads.lock().unwrap().insert(id.to_string(), bytes);
        self
    }

    pub fn listing_urls(&self) -> Vec<String> {
        self.listing_urls.lock().unwrap().clone()
    }

    pub fn direct_calls(&self) -> Vec<String> {
        self.direct_calls.lock().unwrap().clone()
    }

    fn write_payload(&self, id: &str, dest: &Path) -> Result<ArtifactHandle, SessionError> {
        let bytes = *self
            .payloads
            .lock()
            .unwrap()
            .get(id)
            .ok_or(SessionError::Status(404))?;
        let mut body = b"ID3\x04\x00\x00\x00\x00\x00\x00".to_vec();
        body.resize(bytes, 0);
        std::fs::create_dir_all(dest.parent().unwrap())?;
        std::fs::write(dest, body)?;
        Ok(ArtifactHandle {
            path: dest.to_path_buf(),
            bytes: bytes as u64,
            content_type: Some("audio/mpeg".to_string()),
        })
    }
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn request_json(
        &self,
        url: &str,
        _credentials: &Credentials,
    ) -> Result<Value, SessionError> {
        self.listing_urls.lock().unwrap().push(url.to_string());
        match self.pages.lock().unwrap().pop_front() {
            Some(Ok(page)) => Ok(page),
            Some(Err(status)) => Err(SessionError::from_status(status)),
            None => Ok(Value::Array(Vec::new())),
        }
    }

    async fn request_binary(
        &self,
        item_id: &str,
        _credentials: &Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, SessionError> {
        self.direct_calls.lock().unwrap().push(item_id.to_string());
        self.write_payload(item_id, dest)
    }

    async fn drive_interactive_download(
        &self,
        item_uri: &str,
        _credentials: &Credentials,
        _dest: &Path,
    ) -> Result<ArtifactHandle, SessionError> {
        Err(SessionError::NoDownloadLink(item_uri.to_string()))
    }

    async fn read_credentials(&self) -> Result<Credentials, SessionError> {
        self.credentials
            .clone()
            .ok_or_else(|| SessionError::Credentials("no session".to_string()))
    }

    async fn refresh_credentials(&self) -> Result<Credentials, SessionError> {
        self.read_credentials().await
    }
}
