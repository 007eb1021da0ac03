use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use track_archiver::config::{AppConfig, ArchiverSettings};
use track_archiver::throttle::NoOpThrottle;
use track_archiver::{ArchiveManifest, Archiver, ManifestStore, RemoteSession, SourceMode};

/// A throwaway archive directory with its resolved configuration.
pub struct TestArchive {
    // Held so the directory outlives the test
    _dir: TempDir,
    pub config: AppConfig,
}

impl TestArchive {
    pub fn new(page_size: usize, extension: &str) -> Self {
        let dir = TempDir::new().unwrap();
        let output_dir = dir.path().join("archive");
        std::fs::create_dir_all(&output_dir).unwrap();

        let config = AppConfig {
            manifest_path: output_dir.join("manifest.json"),
            staging_dir: dir.path().join("staging"),
            session_file: dir.path().join("session.json"),
            output_dir,
            source_mode: SourceMode::Library,
            archiver: ArchiverSettings {
                remote_base_uri: "https://music.example.com".to_string(),
                page_size,
                file_extension: extension.to_string(),
                consecutive_failure_limit: 3,
                ..Default::default()
            },
        };
        Self { _dir: dir, config }
    }

    pub fn archiver(&self, session: Arc<dyn RemoteSession>) -> Archiver {
        Archiver::new(&self.config, session, Arc::new(NoOpThrottle))
    }

    pub fn artifact_path(&self, name: &str) -> PathBuf {
        self.config.output_dir.join(name)
    }

    pub fn manifest_exists(&self) -> bool {
        self.config.manifest_path.exists()
    }

    pub fn load_manifest(&self) -> ArchiveManifest {
        ManifestStore::new(self.config.manifest_path.clone()).load(self.config.source_mode)
    }

    pub fn save_manifest(&self, manifest: &mut ArchiveManifest) {
        ManifestStore::new(self.config.manifest_path.clone())
            .save(manifest)
            .unwrap();
    }
}
