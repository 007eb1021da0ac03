mod file_config;

pub use file_config::{AcquisitionConfig, FileConfig, ListingConfig};

use crate::manifest::SourceMode;
use anyhow::{anyhow, bail, Result};
use std::path::PathBuf;

/// CLI arguments that can be used for config resolution.
/// This struct mirrors the CLI arguments that can be overridden by TOML config.
#[derive(Debug, Clone, Default)]
pub struct CliConfig {
    pub manifest_path: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
    pub session_file: Option<PathBuf>,
    pub source_mode: Option<SourceMode>,
    pub remote_base_uri: Option<String>,
    pub promotion_batch_size: Option<usize>,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub manifest_path: PathBuf,
    pub output_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub session_file: PathBuf,
    pub source_mode: SourceMode,
    pub archiver: ArchiverSettings,
}

impl AppConfig {
    /// Resolve configuration from CLI arguments and optional TOML file config.
    /// TOML values override CLI values where present.
    pub fn resolve(cli: &CliConfig, file_config: Option<FileConfig>) -> Result<Self> {
        let file = file_config.unwrap_or_default();

        let output_dir = file
            .output_dir
            .map(PathBuf::from)
            .or_else(|| cli.output_dir.clone())
            .ok_or_else(|| {
                anyhow!("output_dir must be specified via --output-dir or in config file")
            })?;

        if output_dir.exists() && !output_dir.is_dir() {
            bail!("output_dir is not a directory: {:?}", output_dir);
        }

        let manifest_path = file
            .manifest_path
            .map(PathBuf::from)
            .or_else(|| cli.manifest_path.clone())
            .unwrap_or_else(|| output_dir.join("manifest.json"));

        let staging_dir = file
            .staging_dir
            .map(PathBuf::from)
            .or_else(|| cli.staging_dir.clone())
            .unwrap_or_else(|| output_dir.join(".staging"));

        let session_file = file
            .session_file
            .map(PathBuf::from)
            .or_else(|| cli.session_file.clone())
            .ok_or_else(|| {
                anyhow!("session_file must be specified via --session-file or in config file")
            })?;

        let source_mode = match file.source_mode {
            Some(mode) => SourceMode::from_str(&mode)
                .ok_or_else(|| anyhow!("Unknown source_mode in config file: {}", mode))?,
            None => cli.source_mode.unwrap_or_default(),
        };

        let remote_base_uri = file
            .remote_base_uri
            .or_else(|| cli.remote_base_uri.clone())
            .ok_or_else(|| {
                anyhow!("remote_base_uri must be specified via --base-uri or in config file")
            })?;

        // Archiver settings - merge file config with defaults
        let defaults = ArchiverSettings::default();
        let listing = file.listing.unwrap_or_default();
        let acquisition = file.acquisition.unwrap_or_default();
        let archiver = ArchiverSettings {
            remote_base_uri: remote_base_uri.trim_end_matches('/').to_string(),
            page_size: listing.page_size.unwrap_or(defaults.page_size),
            library_path_template: listing
                .library_path_template
                .unwrap_or(defaults.library_path_template),
            favorites_path_template: listing
                .favorites_path_template
                .unwrap_or(defaults.favorites_path_template),
            item_path_template: listing
                .item_path_template
                .unwrap_or(defaults.item_path_template),
            max_pages: listing.max_pages.unwrap_or(defaults.max_pages),
            max_stale_pages: listing.max_stale_pages.unwrap_or(defaults.max_stale_pages),
            artifact_path_template: acquisition
                .artifact_path_template
                .unwrap_or(defaults.artifact_path_template),
            file_extension: acquisition
                .file_extension
                .map(|ext| ext.trim_start_matches('.').to_string())
                .unwrap_or(defaults.file_extension),
            consecutive_failure_limit: acquisition
                .consecutive_failure_limit
                .unwrap_or(defaults.consecutive_failure_limit),
            min_artifact_bytes: acquisition
                .min_artifact_bytes
                .unwrap_or(defaults.min_artifact_bytes),
            request_timeout_secs: acquisition
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
            interactive_timeout_secs: acquisition
                .interactive_timeout_secs
                .unwrap_or(defaults.interactive_timeout_secs),
            promotion_batch_size: acquisition
                .promotion_batch_size
                .or(cli.promotion_batch_size)
                .filter(|n| *n > 0),
            throttle_min_ms: acquisition
                .throttle_min_ms
                .unwrap_or(defaults.throttle_min_ms),
            throttle_max_ms: acquisition
                .throttle_max_ms
                .unwrap_or(defaults.throttle_max_ms),
        };
        archiver.validate()?;

        Ok(Self {
            manifest_path,
            output_dir,
            staging_dir,
            session_file,
            source_mode,
            archiver,
        })
    }
}

/// Explicit configuration passed to each archiver component.
#[derive(Debug, Clone)]
pub struct ArchiverSettings {
    pub remote_base_uri: String,
    pub page_size: usize,
    /// Path of the page-number listing; `{page}` and `{size}` are substituted
    pub library_path_template: String,
    /// Path of the offset listing; `{owner}`, `{offset}` and `{size}` are substituted
    pub favorites_path_template: String,
    /// Path of an item's canonical page; `{id}` is substituted
    pub item_path_template: String,
    /// Upper bound on listing pages requested in one run
    pub max_pages: usize,
    /// Consecutive full pages without a new id before enumeration gives up
    pub max_stale_pages: usize,
    /// Path of an item's direct download endpoint; `{id}` is substituted
    pub artifact_path_template: String,
    pub file_extension: String,
    pub consecutive_failure_limit: u32,
    /// Payloads at or below this size are treated as error pages
    pub min_artifact_bytes: u64,
    pub request_timeout_secs: u64,
    pub interactive_timeout_secs: u64,
    /// Promote staged artifacts in batches of this size (None = immediately)
    pub promotion_batch_size: Option<usize>,
    // Throttle settings
    pub throttle_min_ms: u64,
    pub throttle_max_ms: u64,
}

impl ArchiverSettings {
    /// Check the settings for values the archiver cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.remote_base_uri.is_empty() {
            bail!("remote_base_uri must not be empty");
        }
        if self.page_size == 0 {
            bail!("page_size must be greater than zero");
        }
        if self.max_pages == 0 || self.max_stale_pages == 0 {
            bail!("max_pages and max_stale_pages must be greater than zero");
        }
        if self.consecutive_failure_limit == 0 {
            bail!("consecutive_failure_limit must be greater than zero");
        }
        if self.file_extension.is_empty() {
            bail!("file_extension must not be empty");
        }
        if self.throttle_max_ms == 0 {
            bail!("throttle_max_ms must be greater than zero");
        }
        if self.throttle_max_ms < self.throttle_min_ms {
            bail!(
                "throttle_max_ms ({}) must not be below throttle_min_ms ({})",
                self.throttle_max_ms,
                self.throttle_min_ms
            );
        }
        Ok(())
    }

    /// Canonical page address of an item.
    pub fn item_uri(&self, id: &str) -> String {
        format!(
            "{}{}",
            self.remote_base_uri,
            self.item_path_template.replace("{id}", id)
        )
    }
}

impl Default for ArchiverSettings {
    fn default() -> Self {
        Self {
            remote_base_uri: "http://localhost:8080".to_string(),
            page_size: 20,
            library_path_template: "/api/feed?page={page}&page_size={size}".to_string(),
            favorites_path_template: "/api/users/{owner}/favorites?offset={offset}&limit={size}"
                .to_string(),
            item_path_template: "/song/{id}".to_string(),
            max_pages: 10_000,
            max_stale_pages: 3,
            artifact_path_template: "/api/items/{id}/download".to_string(),
            file_extension: "mp3".to_string(),
            consecutive_failure_limit: 5,
            min_artifact_bytes: 100 * 1024,
            request_timeout_secs: 30,
            interactive_timeout_secs: 120,
            promotion_batch_size: None,
            // Throttle defaults
            throttle_min_ms: 1500,
            throttle_max_ms: 4000,
        }
    }
}
