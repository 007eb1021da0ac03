//! Durable JSON storage for the archive manifest.
//!
//! Loading never fails: a missing or unreadable manifest is replaced by an
//! empty one. Saving writes a sibling temp file and renames it over the
//! manifest, so readers observe either the old or the new file.

use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Utc;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use super::models::{ArchiveManifest, SourceMode};

/// File-backed manifest store.
///
/// The running process is the only writer of the manifest file.
#[derive(Debug, Clone)]
pub struct ManifestStore {
    path: PathBuf,
}

impl ManifestStore {
    /// Create a store for the manifest at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the manifest, falling back to an empty one.
    pub fn load(&self, default_mode: SourceMode) -> ArchiveManifest {
        load(&self.path, default_mode)
    }

    /// Save the manifest, stamping `last_run_at`.
    pub fn save(&self, manifest: &mut ArchiveManifest) -> Result<()> {
        save(&self.path, manifest)
    }
}

/// Load a manifest from `path`.
///
/// Returns an empty manifest for `default_mode` when the file does not exist
/// or cannot be parsed.
pub fn load(path: &Path, default_mode: SourceMode) -> ArchiveManifest {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!("No manifest at {:?}, starting with an empty one", path);
            return ArchiveManifest::new(default_mode);
        }
        Err(e) => {
            warn!(
                "Failed to read manifest {:?}: {}, starting with an empty one",
                path, e
            );
            return ArchiveManifest::new(default_mode);
        }
    };

    match serde_json::from_str::<ArchiveManifest>(&content) {
        Ok(manifest) => {
            debug!("Loaded manifest {:?} with {} items", path, manifest.len());
            manifest
        }
        Err(e) => {
            warn!(
                "Manifest {:?} is corrupt ({}), starting with an empty one",
                path, e
            );
            ArchiveManifest::new(default_mode)
        }
    }
}

/// Atomically write `manifest` to `path`.
///
/// Creates the parent directory if needed and updates `last_run_at`.
pub fn save(path: &Path, manifest: &mut ArchiveManifest) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    std::fs::create_dir_all(&parent)
        .with_context(|| format!("Failed to create manifest directory {:?}", parent))?;

    manifest.last_run_at = Some(Utc::now());
    let bytes = serde_json::to_vec_pretty(manifest).context("Failed to serialize manifest")?;

    // The temp file must live on the same filesystem for the rename to be atomic
    let mut temp = NamedTempFile::new_in(&parent)
        .with_context(|| format!("Failed to create temp manifest in {:?}", parent))?;
    temp.write_all(&bytes)
        .context("Failed to write temp manifest")?;
    temp.as_file()
        .sync_all()
        .context("Failed to flush temp manifest")?;
    temp.persist(path)
        .with_context(|| format!("Failed to move manifest into place at {:?}", path))?;

    debug!("Saved manifest {:?} ({} items)", path, manifest.len());
    Ok(())
}
