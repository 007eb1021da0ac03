//! Sequential acquisition of outstanding catalog items.
//!
//! Items are processed one at a time in queue order. Each item tries the
//! direct strategy (with one credential refresh on an authorization failure)
//! and falls back to the interactive strategy. Outcomes are written to the
//! manifest and persisted after every item.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::AsyncReadExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::circuit_breaker::{BreakerAction, CircuitBreaker};
use super::models::{
    AcquisitionError, AcquisitionErrorType, AcquisitionReport, RunOutcome, Strategy,
};
use crate::artifacts::{ArtifactLocator, StagingArea};
use crate::config::ArchiverSettings;
use crate::manifest::{ArchiveManifest, ItemStatus, ManifestStore};
use crate::session::{ArtifactHandle, Credentials, RemoteSession};
use crate::throttle::RequestThrottle;

/// Bytes read from the head of a payload to identify its type.
const SNIFF_LEN: usize = 512;

/// A downloaded artifact waiting in the staging area.
#[derive(Debug, Clone)]
struct StagedArtifact {
    id: String,
    staged: PathBuf,
    file_name: String,
}

/// Acquires outstanding items and records the outcome in the manifest.
pub struct AcquisitionEngine {
    session: Arc<dyn RemoteSession>,
    throttle: Arc<dyn RequestThrottle>,
    locator: ArtifactLocator,
    staging: StagingArea,
    settings: ArchiverSettings,
}

impl AcquisitionEngine {
    pub fn new(
        session: Arc<dyn RemoteSession>,
        throttle: Arc<dyn RequestThrottle>,
        locator: ArtifactLocator,
        staging: StagingArea,
        settings: ArchiverSettings,
    ) -> Self {
        Self {
            session,
            throttle,
            locator,
            staging,
            settings,
        }
    }

    /// Process every pending and failed item of `manifest`.
    ///
    /// The manifest is saved through `store` after each item. The run stops
    /// early when the circuit breaker trips or `shutdown` is cancelled; both
    /// are reported in the returned [`AcquisitionReport`], not as errors.
    /// Errors are returned only when the manifest or the staging area cannot
    /// be written.
    pub async fn run(
        &self,
        manifest: &mut ArchiveManifest,
        credentials: Credentials,
        store: &ManifestStore,
        shutdown: &CancellationToken,
    ) -> Result<AcquisitionReport> {
        let queue = manifest.acquisition_queue();
        let mut report = AcquisitionReport {
            queued: queue.len(),
            ..Default::default()
        };

        self.staging
            .init()
            .await
            .with_context(|| format!("Failed to create staging area {:?}", self.staging.dir()))?;
        tokio::fs::create_dir_all(self.locator.output_dir())
            .await
            .with_context(|| {
                format!(
                    "Failed to create output directory {:?}",
                    self.locator.output_dir()
                )
            })?;

        if self.resume_promotions(manifest, &mut report).await > 0 {
            store.save(manifest)?;
        }

        if queue.is_empty() {
            info!("Nothing to acquire");
            return Ok(report);
        }
        info!("Acquiring {} items", queue.len());

        let batch_size = self.settings.promotion_batch_size.unwrap_or(1).max(1);
        let mut credentials = credentials;
        let mut breaker = CircuitBreaker::new(self.settings.consecutive_failure_limit);
        let mut held: Vec<StagedArtifact> = Vec::new();

        for (index, id) in queue.iter().enumerate() {
            if shutdown.is_cancelled() {
                report.outcome = RunOutcome::Cancelled;
                break;
            }
            if index > 0 {
                let cancelled = tokio::select! {
                    _ = shutdown.cancelled() => true,
                    _ = self.throttle.pause() => false,
                };
                if cancelled {
                    report.outcome = RunOutcome::Cancelled;
                    break;
                }
            }

            let Some(item) = manifest.get_mut(id) else {
                continue;
            };
            item.begin_attempt();
            let remote_uri = item.remote_uri.clone();
            info!(
                "[{}/{}] Acquiring {} \"{}\" (attempt {})",
                index + 1,
                queue.len(),
                item.id,
                item.title,
                item.attempt_count
            );
            report.attempted += 1;

            match self.acquire(id, &remote_uri, &mut credentials).await {
                Ok((staged, handle, strategy)) => {
                    breaker.record_success();
                    if let Some(item) = manifest.get_mut(id) {
                        item.mark_acquired(staged.file_name.clone(), handle.bytes);
                    }
                    info!(
                        "Acquired {} via {} strategy ({} bytes)",
                        id,
                        strategy.as_str(),
                        handle.bytes
                    );
                    report.acquired += 1;
                    held.push(staged);

                    if held.len() >= batch_size {
                        self.flush_promotions(manifest, &mut held, &mut breaker, &mut report)
                            .await;
                    }
                }
                Err(e) => {
                    warn!("Failed to acquire {}: {}", id, e);
                    if let Some(item) = manifest.get_mut(id) {
                        item.mark_failed(e.to_string());
                    }
                    report.failed += 1;
                    breaker.record_failure();
                }
            }

            store.save(manifest)?;

            if breaker.is_tripped() {
                report.outcome = RunOutcome::CircuitTripped;
                break;
            }
        }

        if !held.is_empty() {
            self.flush_promotions(manifest, &mut held, &mut breaker, &mut report)
                .await;
            store.save(manifest)?;
        }
        if breaker.is_tripped() {
            report.outcome = RunOutcome::CircuitTripped;
        }

        match report.outcome {
            RunOutcome::Completed => info!(
                "Acquisition finished: {} acquired, {} failed",
                report.acquired, report.failed
            ),
            RunOutcome::CircuitTripped => warn!(
                "Acquisition stopped after {} consecutive failures, {} items left for the next run",
                breaker.consecutive_failures(),
                report.remaining()
            ),
            RunOutcome::Cancelled => info!(
                "Acquisition cancelled, {} items left for the next run",
                report.remaining()
            ),
        }
        Ok(report)
    }

    /// Acquire one item into the staging area.
    async fn acquire(
        &self,
        id: &str,
        remote_uri: &str,
        credentials: &mut Credentials,
    ) -> Result<(StagedArtifact, ArtifactHandle, Strategy), AcquisitionError> {
        let staged = StagedArtifact {
            id: id.to_string(),
            staged: self.staging.path_for(id),
            file_name: self.locator.id_file_name(id),
        };
        self.staging.discard(&staged.staged).await;

        let direct_error = match self.try_direct(id, credentials, &staged.staged).await {
            Ok(handle) => return Ok((staged, handle, Strategy::Direct)),
            Err(e) => e,
        };
        debug!(
            "Direct strategy failed for {} ({}), trying interactive strategy",
            id, direct_error
        );
        self.staging.discard(&staged.staged).await;

        match self
            .try_interactive(remote_uri, credentials, &staged.staged)
            .await
        {
            Ok(handle) => Ok((staged, handle, Strategy::Interactive)),
            Err(e) => {
                self.staging.discard(&staged.staged).await;
                Err(AcquisitionError::new(
                    e.error_type,
                    format!("{} (direct strategy: {})", e.message, direct_error),
                ))
            }
        }
    }

    /// Direct strategy with a single credential refresh on an authorization failure.
    async fn try_direct(
        &self,
        id: &str,
        credentials: &mut Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, AcquisitionError> {
        match self.direct_once(id, credentials, dest).await {
            Err(e) if e.error_type == AcquisitionErrorType::Authorization => {
                info!("Authorization rejected for {}, refreshing credentials", id);
                match self.session.refresh_credentials().await {
                    Ok(fresh) => {
                        *credentials = fresh;
                        self.staging.discard(dest).await;
                        self.direct_once(id, credentials, dest).await
                    }
                    Err(refresh_error) => Err(AcquisitionError::new(
                        AcquisitionErrorType::Authorization,
                        format!("{} (refresh failed: {})", e.message, refresh_error),
                    )),
                }
            }
            other => other,
        }
    }

    async fn direct_once(
        &self,
        id: &str,
        credentials: &Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, AcquisitionError> {
        let handle = self
            .session
            .request_binary(id, credentials, dest)
            .await
            .map_err(|e| AcquisitionError::from(&e))?;
        check_content_type(handle.content_type.as_deref())?;
        self.validate_payload(&handle).await?;
        Ok(handle)
    }

    async fn try_interactive(
        &self,
        remote_uri: &str,
        credentials: &Credentials,
        dest: &Path,
    ) -> Result<ArtifactHandle, AcquisitionError> {
        let handle = self
            .session
            .drive_interactive_download(remote_uri, credentials, dest)
            .await
            .map_err(|e| AcquisitionError::from(&e))?;
        self.validate_payload(&handle).await?;
        Ok(handle)
    }

    /// Reject payloads that are too small or look like something other than audio.
    async fn validate_payload(&self, handle: &ArtifactHandle) -> Result<(), AcquisitionError> {
        if handle.bytes <= self.settings.min_artifact_bytes {
            return Err(AcquisitionError::integrity(format!(
                "payload too small ({} bytes, minimum {})",
                handle.bytes, self.settings.min_artifact_bytes
            )));
        }

        let head = read_head(&handle.path).await.map_err(|e| {
            AcquisitionError::new(
                AcquisitionErrorType::Storage,
                format!("cannot read staged payload: {}", e),
            )
        })?;
        sniff_payload(&head)
    }

    /// Move held artifacts from staging into the output directory.
    ///
    /// A failed move marks the item failed with a promotion diagnostic and
    /// leaves the staged bytes in place.
    async fn flush_promotions(
        &self,
        manifest: &mut ArchiveManifest,
        held: &mut Vec<StagedArtifact>,
        breaker: &mut CircuitBreaker,
        report: &mut AcquisitionReport,
    ) {
        if held.len() > 1 {
            info!("Promoting {} staged artifacts", held.len());
        }
        for artifact in held.drain(..) {
            let dest = self.locator.path_of(&artifact.file_name);
            match self.staging.promote(&artifact.staged, &dest).await {
                Ok(_) => debug!("Promoted {} to {:?}", artifact.id, dest),
                Err(e) => {
                    let error = AcquisitionError::promotion(e.to_string());
                    warn!(
                        "Could not promote {}: {}, staged file kept at {:?}",
                        artifact.id, error, artifact.staged
                    );
                    if let Some(item) = manifest.get_mut(&artifact.id) {
                        item.mark_failed(error.to_string());
                    }
                    report.acquired = report.acquired.saturating_sub(1);
                    report.failed += 1;
                    report.promotion_failures += 1;
                    if breaker.record_failure() == BreakerAction::Trip {
                        report.outcome = RunOutcome::CircuitTripped;
                    }
                }
            }
        }
    }

    /// Promote artifacts an interrupted run left in the staging area.
    ///
    /// Returns the number of manifest items changed.
    async fn resume_promotions(
        &self,
        manifest: &mut ArchiveManifest,
        report: &mut AcquisitionReport,
    ) -> usize {
        let mut changed = 0;
        for item in manifest.items.values_mut() {
            if item.status != ItemStatus::Acquired {
                continue;
            }
            let Some(file_name) = item.local_artifact_name.as_deref() else {
                continue;
            };
            if file_name != self.locator.id_file_name(&item.id) || self.locator.is_present(file_name)
            {
                continue;
            }
            let staged = self.staging.path_for(&item.id);
            if self.staging.staged_size(&staged).await.is_none() {
                continue;
            }

            let dest = self.locator.path_of(file_name);
            match self.staging.promote(&staged, &dest).await {
                Ok(_) => info!("Promoted {} left over from a previous run", item.id),
                Err(e) => {
                    let error = AcquisitionError::promotion(e.to_string());
                    warn!("Could not promote leftover {}: {}", item.id, error);
                    item.mark_failed(error.to_string());
                    report.promotion_failures += 1;
                    changed += 1;
                }
            }
        }
        changed
    }
}

/// Accept audio, generic binary or an undeclared content type.
fn check_content_type(content_type: Option<&str>) -> Result<(), AcquisitionError> {
    let Some(raw) = content_type else {
        return Ok(());
    };
    let essence = raw
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();

    if essence.starts_with("audio/")
        || essence == "application/octet-stream"
        || essence == "binary/octet-stream"
    {
        Ok(())
    } else {
        Err(AcquisitionError::integrity(format!(
            "unexpected content type {}",
            raw
        )))
    }
}

/// Reject markup and recognisable non-media file types.
fn sniff_payload(head: &[u8]) -> Result<(), AcquisitionError> {
    let first = head.iter().find(|b| !b.is_ascii_whitespace());
    if first == Some(&b'<') {
        return Err(AcquisitionError::integrity("payload is markup, not audio"));
    }

    match infer::get(head) {
        Some(kind)
            if !matches!(
                kind.matcher_type(),
                infer::MatcherType::Audio | infer::MatcherType::Video
            ) =>
        {
            Err(AcquisitionError::integrity(format!(
                "payload is {}, not audio",
                kind.mime_type()
            )))
        }
        _ => Ok(()),
    }
}

async fn read_head(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut head = vec![0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = file.read(&mut head[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    head.truncate(filled);
    Ok(head)
}
