//! End-to-end archive runs.
//!
//! Wires the components together in run order: load the manifest, read the
//! credentials, fetch the listing, merge it, persist, acquire, and optionally
//! verify.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::acquisition::{AcquisitionEngine, AcquisitionReport, RunOutcome};
use crate::artifacts::{ArtifactLocator, StagingArea};
use crate::config::{AppConfig, ArchiverSettings};
use crate::listing::{labels_from_listing, ListingFetcher};
use crate::manifest::{ArchiveManifest, ManifestStats, ManifestStore, SourceMode};
use crate::reconciler::{self, MergeReport};
use crate::session::RemoteSession;
use crate::throttle::RequestThrottle;
use crate::verifier::{Verifier, VerifyMode, VerifyReport};

/// Options of a sync run.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyncOptions {
    /// Fetch and merge in memory only; no downloads, no manifest writes
    pub dry_run: bool,
    /// Run a verification pass after acquisition
    pub verify_after: bool,
    /// Move failed items back to pending before acquiring
    pub retry_failed: bool,
}

/// What a sync run did.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub fetched: usize,
    pub merge: MergeReport,
    pub reset_failed: usize,
    /// Queue in processing order, filled for dry runs
    pub planned: Vec<String>,
    pub acquisition: Option<AcquisitionReport>,
    pub verification: Option<VerifyReport>,
    pub stats: ManifestStats,
}

impl RunSummary {
    pub fn circuit_tripped(&self) -> bool {
        self.acquisition
            .as_ref()
            .map(|report| report.circuit_tripped())
            .unwrap_or(false)
    }
}

/// Runs syncs and maintenance passes over one archive.
pub struct Archiver {
    session: Arc<dyn RemoteSession>,
    throttle: Arc<dyn RequestThrottle>,
    store: ManifestStore,
    locator: ArtifactLocator,
    staging: StagingArea,
    source_mode: SourceMode,
    settings: ArchiverSettings,
}

impl Archiver {
    pub fn new(
        config: &AppConfig,
        session: Arc<dyn RemoteSession>,
        throttle: Arc<dyn RequestThrottle>,
    ) -> Self {
        let extension = config.archiver.file_extension.clone();
        Self {
            session,
            throttle,
            store: ManifestStore::new(config.manifest_path.clone()),
            locator: ArtifactLocator::new(config.output_dir.clone(), extension.clone()),
            staging: StagingArea::new(config.staging_dir.clone(), extension),
            source_mode: config.source_mode,
            settings: config.archiver.clone(),
        }
    }

    pub fn store(&self) -> &ManifestStore {
        &self.store
    }

    /// Bring the archive up to date with the remote listing.
    ///
    /// Fails only on fatal conditions: no credentials, an unreachable
    /// listing, or a manifest that cannot be written. A circuit-breaker trip
    /// or a cancellation is reported in the summary.
    pub async fn sync(&self, options: SyncOptions, shutdown: &CancellationToken) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        let mut manifest = self.load_manifest();

        if options.retry_failed {
            summary.reset_failed = reconciler::reset_failed(&mut manifest);
        }

        let credentials = self
            .session
            .read_credentials()
            .await
            .context("No usable credentials")?;

        let fetcher = ListingFetcher::new(
            self.session.clone(),
            self.throttle.clone(),
            self.settings.clone(),
        );
        let remote = fetcher.fetch_all(self.source_mode, &credentials).await?;
        summary.fetched = remote.len();

        let labels = labels_from_listing(&remote);
        summary.merge = reconciler::merge(
            &mut manifest,
            &remote,
            &labels,
            &self.locator,
            &self.settings,
        );

        if options.dry_run {
            summary.planned = manifest.acquisition_queue();
            summary.stats = manifest.stats();
            info!(
                "Dry run: {} items would be acquired, manifest not written",
                summary.planned.len()
            );
            return Ok(summary);
        }

        self.store.save(&mut manifest)?;

        let engine = AcquisitionEngine::new(
            self.session.clone(),
            self.throttle.clone(),
            self.locator.clone(),
            self.staging.clone(),
            self.settings.clone(),
        );
        let report = engine
            .run(&mut manifest, credentials, &self.store, shutdown)
            .await?;
        let cancelled = report.outcome == RunOutcome::Cancelled;
        summary.acquisition = Some(report);

        if options.verify_after && !cancelled {
            let verification = Verifier::new(self.locator.clone())
                .verify(&mut manifest, VerifyMode::Apply);
            self.store.save(&mut manifest)?;
            summary.verification = Some(verification);
        }

        summary.stats = manifest.stats();
        Ok(summary)
    }

    /// Check acquired items against the output directory.
    pub fn verify(&self, mode: VerifyMode) -> Result<VerifyReport> {
        let mut manifest = self.load_manifest();
        let report = Verifier::new(self.locator.clone()).verify(&mut manifest, mode);
        if mode == VerifyMode::Apply {
            self.store.save(&mut manifest)?;
        }
        Ok(report)
    }

    /// Move failed items back to pending without running a sync.
    pub fn retry_failed(&self) -> Result<usize> {
        let mut manifest = self.load_manifest();
        let reset = reconciler::reset_failed(&mut manifest);
        if reset > 0 {
            self.store.save(&mut manifest)?;
        }
        Ok(reset)
    }

    fn load_manifest(&self) -> ArchiveManifest {
        let mut manifest = self.store.load(self.source_mode);
        if manifest.source_mode != self.source_mode {
            warn!(
                "Manifest was populated from the {} listing, now syncing the {} listing",
                manifest.source_mode.as_str(),
                self.source_mode.as_str()
            );
            manifest.source_mode = self.source_mode;
        }
        manifest
    }
}
