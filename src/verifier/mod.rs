//! Filesystem verification.
//!
//! Audits acquired items against the output directory. An item whose
//! artifact has disappeared goes back to pending so the next run acquires it
//! again. Apart from the manifest nothing is written or deleted.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::artifacts::ArtifactLocator;
use crate::manifest::{ArchiveManifest, ItemStatus};
use crate::reconciler::build_label_index;

/// Reason recorded on items reset by the verifier.
pub const MISSING_ARTIFACT_REASON: &str = "artifact missing from output directory";

/// Whether the verifier may change the manifest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyMode {
    /// Report only
    DryRun,
    /// Reset items with missing artifacts
    Apply,
}

/// An acquired item whose artifact was not found.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MissingArtifact {
    pub id: String,
    pub title: String,
    pub expected_name: Option<String>,
}

/// Result of a verification pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VerifyReport {
    pub mode: VerifyMode,
    pub verified: usize,
    pub missing: usize,
    /// Items found under a different name than the one recorded
    pub relinked: usize,
    pub missing_items: Vec<MissingArtifact>,
    pub duration_ms: u64,
}

/// Checks that every acquired item has its artifact on disk.
pub struct Verifier {
    locator: ArtifactLocator,
}

impl Verifier {
    pub fn new(locator: ArtifactLocator) -> Self {
        Self { locator }
    }

    /// Run a verification pass over `manifest`.
    ///
    /// An acquired item is verified if its recorded artifact, its id-named
    /// file or its label-named file exists. Label names shared by several
    /// items are not accepted as evidence. In `Apply` mode, missing items are
    /// reset to pending and items found under another name get the name
    /// updated.
    pub fn verify(&self, manifest: &mut ArchiveManifest, mode: VerifyMode) -> VerifyReport {
        let start = Instant::now();
        info!("Verifying acquired artifacts in {:?} mode", mode);

        let label_index = build_label_index(manifest, &[], &HashMap::new(), &self.locator);
        let mut verified = 0;
        let mut relinked = 0;
        let mut missing_items = Vec::new();

        for item in manifest.items.values_mut() {
            if item.status != ItemStatus::Acquired {
                continue;
            }

            let recorded = item
                .local_artifact_name
                .as_deref()
                .filter(|name| self.locator.is_present(name))
                .map(|name| name.to_string());

            let found = recorded.or_else(|| {
                let label_name =
                    self.locator
                        .label_file_name(&item.creator_label, &item.title, &item.id);
                let trusted = (!label_index.is_ambiguous(&label_name)).then_some(label_name);
                self.locator.locate(&item.id, trusted.as_deref())
            });

            match found {
                Some(name) => {
                    verified += 1;
                    if item.local_artifact_name.as_deref() != Some(name.as_str()) {
                        debug!("{} found as {:?}", item.id, name);
                        relinked += 1;
                        if mode == VerifyMode::Apply {
                            item.local_artifact_name = Some(name);
                        }
                    }
                }
                None => {
                    warn!(
                        "Artifact for {} \"{}\" is missing ({:?})",
                        item.id, item.title, item.local_artifact_name
                    );
                    missing_items.push(MissingArtifact {
                        id: item.id.clone(),
                        title: item.title.clone(),
                        expected_name: item.local_artifact_name.clone(),
                    });
                    if mode == VerifyMode::Apply {
                        item.reset_to_pending(MISSING_ARTIFACT_REASON);
                    }
                }
            }
        }

        let missing = missing_items.len();
        match mode {
            VerifyMode::DryRun => info!(
                "Dry-run: {} verified, {} missing would be reset to pending",
                verified, missing
            ),
            VerifyMode::Apply => info!(
                "Verified {} artifacts, reset {} missing to pending",
                verified, missing
            ),
        }

        VerifyReport {
            mode,
            verified,
            missing,
            relinked,
            missing_items,
            duration_ms: start.elapsed().as_millis() as u64,
        }
    }
}
