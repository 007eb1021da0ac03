//! HTTP implementation of the remote session.

use std::path::Path;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures::StreamExt;
use regex::Regex;
use reqwest::{Client, Response, Url};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::credentials::SessionFile;
use super::models::{ArtifactHandle, Credentials, SessionError};
use super::RemoteSession;
use crate::config::ArchiverSettings;

static OG_AUDIO_PROPERTY_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta[^>]+property=["']og:audio(?::url)?["'][^>]*content=["']([^"']+)["']"#)
        .expect("valid og:audio pattern")
});

static OG_AUDIO_CONTENT_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<meta[^>]+content=["']([^"']+)["'][^>]*property=["']og:audio(?::url)?["']"#)
        .expect("valid og:audio pattern")
});

static AUDIO_TAG_SRC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"<audio[^>]+src=["']([^"']+)["']"#).expect("valid audio tag pattern")
});

static EMBEDDED_AUDIO_URL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\\?"audio_url\\?"\s*:\s*\\?"([^"\\]+(?:\\/[^"\\]*)*)\\?""#)
        .expect("valid audio_url pattern")
});

/// Session that talks to the remote service over HTTPS.
pub struct HttpSession {
    client: Client,
    interactive_client: Client,
    base_url: String,
    artifact_path_template: String,
    session_file: SessionFile,
}

impl HttpSession {
    /// Create a new HttpSession.
    ///
    /// Direct requests use the regular request timeout, the interactive
    /// strategy the longer interactive timeout.
    pub fn new(settings: &ArchiverSettings, session_file: SessionFile) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()?;
        let interactive_client = Client::builder()
            .timeout(Duration::from_secs(settings.interactive_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            interactive_client,
            base_url: settings.remote_base_uri.trim_end_matches('/').to_string(),
            artifact_path_template: settings.artifact_path_template.clone(),
            session_file,
        })
    }

    /// Get the base URL of the remote service.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// URL of an item's direct download endpoint.
    pub fn artifact_url(&self, item_id: &str) -> String {
        format!(
            "{}{}",
            self.base_url,
            self.artifact_path_template
                .replace("{id}", &urlencoding::encode(item_id))
        )
    }

    async fn get_checked(
        client: &Client,
        url: &str,
        credentials: &Credentials,
    ) -> Result<Response, SessionError> {
        let response = client
            .get(url)
            .bearer_auth(&credentials.bearer_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SessionError::from_status(status.as_u16()));
        }
        Ok(response)
    }
}

#[async_trait]
impl RemoteSession for HttpSession {
    async fn request_json(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<serde_json::Value, SessionError> {
        let response = Self::get_checked(&self.client, url, credentials).await?;
        response
            .json()
            .await
            .map_err(|e| SessionError::InvalidPayload(e.to_string()))
    }

    async fn request_binary(
        &self,
        item_id: &str,
        credentials: &Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, SessionError> {
        let url = self.artifact_url(item_id);
        debug!("Direct download of {} from {}", item_id, url);
        let response = Self::get_checked(&self.client, &url, credentials).await?;
        stream_to_file(response, dest).await
    }

    async fn drive_interactive_download(
        &self,
        item_uri: &str,
        credentials: &Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, SessionError> {
        let page = Self::get_checked(&self.interactive_client, item_uri, credentials)
            .await?
            .text()
            .await?;

        let link = extract_download_link(&page)
            .ok_or_else(|| SessionError::NoDownloadLink(item_uri.to_string()))?;
        let link = resolve_link(item_uri, &link)?;

        info!("Following download link on {}", item_uri);
        let response =
            Self::get_checked(&self.interactive_client, &link, credentials).await?;
        stream_to_file(response, dest).await
    }

    async fn read_credentials(&self) -> Result<Credentials, SessionError> {
        self.session_file.read().await
    }

    async fn refresh_credentials(&self) -> Result<Credentials, SessionError> {
        info!(
            "Re-reading credentials from {:?}",
            self.session_file.path()
        );
        self.session_file.read().await
    }
}

/// Stream a response body into `dest`.
///
/// Creates parent directories if they don't exist. On error the partially
/// written file is left for the caller to discard.
async fn stream_to_file(response: Response, dest: &Path) -> Result<ArtifactHandle, SessionError> {
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.to_string());

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    let mut file = File::create(dest).await?;
    let mut bytes: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await?;
        bytes += chunk.len() as u64;
    }
    file.flush().await?;

    Ok(ArtifactHandle {
        path: dest.to_path_buf(),
        bytes,
        content_type,
    })
}

/// Find the target of an item page's download affordance.
///
/// Looks at the `og:audio` meta tag, then an `<audio src>` element, then an
/// `audio_url` field embedded in page data.
pub fn extract_download_link(html: &str) -> Option<String> {
    [
        &*OG_AUDIO_PROPERTY_FIRST,
        &*OG_AUDIO_CONTENT_FIRST,
        &*AUDIO_TAG_SRC,
        &*EMBEDDED_AUDIO_URL,
    ]
    .iter()
    .find_map(|re| re.captures(html))
    .and_then(|caps| caps.get(1))
    .map(|m| {
        m.as_str()
            .replace("\\/", "/")
            .replace("\\u002F", "/")
            .replace("&amp;", "&")
    })
    .filter(|link| !link.is_empty())
}

fn resolve_link(page_uri: &str, link: &str) -> Result<String, SessionError> {
    let base = Url::parse(page_uri)
        .map_err(|e| SessionError::InvalidPayload(format!("bad page uri {}: {}", page_uri, e)))?;
    base.join(link)
        .map(|url| url.to_string())
        .map_err(|e| SessionError::InvalidPayload(format!("bad download link {}: {}", link, e)))
}
