//! Temporary holding area for freshly downloaded artifacts.

use std::io;
use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};

use super::naming::id_stem;

/// Suffix of files being written in the staging area.
const STAGING_SUFFIX: &str = "part";

/// Staging directory for downloads that are not yet in the output directory.
#[derive(Debug, Clone)]
pub struct StagingArea {
    dir: PathBuf,
    extension: String,
}

impl StagingArea {
    pub fn new(dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            dir: dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Create the staging directory.
    pub async fn init(&self) -> io::Result<()> {
        fs::create_dir_all(&self.dir).await
    }

    /// Staging path for an item's payload.
    pub fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!(
            "{}.{}.{}",
            id_stem(id),
            self.extension,
            STAGING_SUFFIX
        ))
    }

    /// Size of a staged file, or None if it does not exist.
    pub async fn staged_size(&self, path: &Path) -> Option<u64> {
        match fs::metadata(path).await {
            Ok(meta) if meta.is_file() => Some(meta.len()),
            _ => None,
        }
    }

    /// Delete a staged file if present.
    pub async fn discard(&self, path: &Path) {
        match fs::remove_file(path).await {
            Ok(()) => debug!("Discarded staged file {:?}", path),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to discard staged file {:?}: {}", path, e),
        }
    }

    /// Move a staged file to `dest`.
    ///
    /// Tries a rename first and falls back to copy-then-remove across
    /// filesystems. The copy goes to a temporary name next to `dest` and is
    /// renamed into place, so `dest` never holds a partial file. On failure
    /// the staged file is left untouched.
    pub async fn promote(&self, staged: &Path, dest: &Path) -> io::Result<u64> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent).await?;
        }

        let size = fs::metadata(staged).await?.len();

        if fs::rename(staged, dest).await.is_ok() {
            debug!("Promoted {:?} -> {:?}", staged, dest);
            return Ok(size);
        }

        let partial = partial_path(dest);
        if let Err(e) = copy_into_place(staged, &partial, dest).await {
            let _ = fs::remove_file(&partial).await;
            return Err(e);
        }

        if let Err(e) = fs::remove_file(staged).await {
            warn!(
                "Promoted {:?} but could not remove the staged copy: {}",
                dest, e
            );
        }
        debug!("Promoted {:?} -> {:?} by copy", staged, dest);
        Ok(size)
    }
}

async fn copy_into_place(staged: &Path, partial: &Path, dest: &Path) -> io::Result<()> {
    fs::copy(staged, partial).await?;
    fs::rename(partial, dest).await
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".");
    name.push(STAGING_SUFFIX);
    dest.with_file_name(name)
}
