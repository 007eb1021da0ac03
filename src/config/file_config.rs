use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct FileConfig {
    // Core settings (can override CLI)
    pub manifest_path: Option<String>,
    pub output_dir: Option<String>,
    pub staging_dir: Option<String>,
    pub session_file: Option<String>,
    pub source_mode: Option<String>,
    pub remote_base_uri: Option<String>,

    // Feature configs
    pub listing: Option<ListingConfig>,
    pub acquisition: Option<AcquisitionConfig>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct ListingConfig {
    pub page_size: Option<usize>,
    pub library_path_template: Option<String>,
    pub favorites_path_template: Option<String>,
    pub item_path_template: Option<String>,
    pub max_pages: Option<usize>,
    pub max_stale_pages: Option<usize>,
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct AcquisitionConfig {
    pub file_extension: Option<String>,
    pub consecutive_failure_limit: Option<u32>,
    pub min_artifact_bytes: Option<u64>,
    pub request_timeout_secs: Option<u64>,
    pub interactive_timeout_secs: Option<u64>,
    pub promotion_batch_size: Option<usize>,
    pub artifact_path_template: Option<String>,
    // Throttle settings
    pub throttle_min_ms: Option<u64>,
    pub throttle_max_ms: Option<u64>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        toml::from_str(&content).with_context(|| format!("Failed to parse config file: {:?}", path))
    }
}
