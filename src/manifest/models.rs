//! Data models for the archive manifest.
//!
//! Defines catalog items, their acquisition status and the manifest that
//! holds them. Field names are serialized in camelCase and form the on-disk
//! contract other tooling reads.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Acquisition status of a catalog item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Pending,
    Acquired,
    Failed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Acquired => "acquired",
            ItemStatus::Failed => "failed",
        }
    }

    /// Returns true if the item still needs to be acquired.
    pub fn is_outstanding(&self) -> bool {
        !matches!(self, ItemStatus::Acquired)
    }
}

/// Which remote listing variant populates the manifest.
///
/// The variant decides how pages are addressed: the library listing is
/// paged by page number, the favorites listing by running offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SourceMode {
    #[default]
    Library,
    Favorites,
}

impl SourceMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceMode::Library => "library",
            SourceMode::Favorites => "favorites",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "library" => Some(SourceMode::Library),
            "favorites" => Some(SourceMode::Favorites),
            _ => None,
        }
    }
}

/// One remote item tracked for archival.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogItem {
    /// Stable remote identifier, primary key
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub creator_label: String,
    #[serde(default)]
    pub category: String,

    // Generation parameters, present only when the remote record has them
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lyrics: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_tag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub play_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub favorite_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,

    /// Canonical address of the item, derived from `id`
    pub remote_uri: String,
    pub status: ItemStatus,
    /// Set only while `status` is `Acquired`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_artifact_name: Option<String>,
    #[serde(
        default,
        rename = "artifactSizeMB",
        skip_serializing_if = "Option::is_none"
    )]
    pub artifact_size_mb: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(default)]
    pub attempt_count: u32,
    /// When the item was first merged into the manifest
    #[serde(default = "Utc::now")]
    pub first_seen_at: DateTime<Utc>,
}

impl CatalogItem {
    /// Create a new pending item.
    pub fn new(id: String, remote_uri: String) -> Self {
        Self {
            id,
            title: String::new(),
            creator_label: String::new(),
            category: String::new(),
            prompt: None,
            lyrics: None,
            model_tag: None,
            seed: None,
            play_count: None,
            favorite_count: None,
            created_at: None,
            remote_uri,
            status: ItemStatus::Pending,
            local_artifact_name: None,
            artifact_size_mb: None,
            last_attempt_at: None,
            last_error: None,
            attempt_count: 0,
            first_seen_at: Utc::now(),
        }
    }

    /// Record the start of an acquisition attempt.
    pub fn begin_attempt(&mut self) {
        self.attempt_count += 1;
        self.last_attempt_at = Some(Utc::now());
    }

    /// Transition to `Acquired`, clearing the diagnostic trail.
    pub fn mark_acquired(&mut self, artifact_name: String, size_bytes: u64) {
        self.status = ItemStatus::Acquired;
        self.local_artifact_name = Some(artifact_name);
        self.artifact_size_mb = Some(bytes_to_mb(size_bytes));
        self.last_attempt_at = None;
        self.last_error = None;
    }

    /// Transition to `Failed` with a diagnostic message.
    ///
    /// Normally entered from `Pending` or `Failed`. An `Acquired` item also
    /// lands here when its artifact passed validation but could not be moved
    /// out of the staging area (batched or resumed promotion); the staged
    /// bytes are kept and the item is retried like any other failure.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = ItemStatus::Failed;
        self.local_artifact_name = None;
        self.artifact_size_mb = None;
        self.last_error = Some(reason.into());
    }

    /// Transition back to `Pending`, recording why.
    pub fn reset_to_pending(&mut self, reason: impl Into<String>) {
        self.status = ItemStatus::Pending;
        self.local_artifact_name = None;
        self.artifact_size_mb = None;
        self.last_error = Some(reason.into());
    }

    /// Timestamp used to order items newest-first.
    pub fn recency_key(&self) -> DateTime<Utc> {
        self.created_at.unwrap_or(self.first_seen_at)
    }
}

/// Convert a byte count to megabytes, rounded to two decimals.
pub fn bytes_to_mb(bytes: u64) -> f64 {
    ((bytes as f64 / BYTES_PER_MB) * 100.0).round() / 100.0
}

/// The persisted ledger of every item ever seen remotely.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveManifest {
    /// Time of the last successful save
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    pub source_mode: SourceMode,
    #[serde(default)]
    pub items: BTreeMap<String, CatalogItem>,
}

impl ArchiveManifest {
    /// Create an empty manifest for the given listing variant.
    pub fn new(source_mode: SourceMode) -> Self {
        Self {
            last_run_at: None,
            source_mode,
            items: BTreeMap::new(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&CatalogItem> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: &str) -> Option<&mut CatalogItem> {
        self.items.get_mut(id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Ids of items still to be acquired, in processing order.
    ///
    /// Pending items come before failed ones; within each group the newest
    /// item comes first. Ties fall back to the id so the order is stable.
    pub fn acquisition_queue(&self) -> Vec<String> {
        let mut outstanding: Vec<&CatalogItem> = self
            .items
            .values()
            .filter(|item| item.status.is_outstanding())
            .collect();

        outstanding.sort_by(|a, b| {
            status_rank(a.status)
                .cmp(&status_rank(b.status))
                .then_with(|| b.recency_key().cmp(&a.recency_key()))
                .then_with(|| a.id.cmp(&b.id))
        });

        outstanding.into_iter().map(|item| item.id.clone()).collect()
    }

    /// Counts of items per status.
    pub fn stats(&self) -> ManifestStats {
        let mut stats = ManifestStats::default();
        for item in self.items.values() {
            match item.status {
                ItemStatus::Pending => stats.pending += 1,
                ItemStatus::Acquired => stats.acquired += 1,
                ItemStatus::Failed => stats.failed += 1,
            }
        }
        stats
    }
}

fn status_rank(status: ItemStatus) -> u8 {
    match status {
        ItemStatus::Pending => 0,
        ItemStatus::Failed => 1,
        ItemStatus::Acquired => 2,
    }
}

/// Per-status item counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ManifestStats {
    pub pending: usize,
    pub acquired: usize,
    pub failed: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn item(id: &str, status: ItemStatus, created_secs: i64) -> CatalogItem {
        let mut item = CatalogItem::new(id.to_string(), format!("https://example.com/song/{}", id));
        item.status = status;
        item.created_at = Some(Utc.timestamp_opt(created_secs, 0).unwrap());
        item
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&ItemStatus::Acquired).unwrap(),
            "\"acquired\""
        );
        let parsed: ItemStatus = serde_json::from_str("\"failed\"").unwrap();
        assert_eq!(parsed, ItemStatus::Failed);
    }

    #[test]
    fn test_source_mode_conversion() {
        assert_eq!(SourceMode::from_str("library"), Some(SourceMode::Library));
        assert_eq!(SourceMode::from_str("favorites"), Some(SourceMode::Favorites));
        assert_eq!(SourceMode::from_str("feed"), None);
        assert_eq!(SourceMode::Favorites.as_str(), "favorites");
    }

    #[test]
    fn test_mark_acquired_clears_diagnostics() {
        let mut item = item("a1", ItemStatus::Failed, 0);
        item.begin_attempt();
        item.last_error = Some("transport: timed out".to_string());

        item.mark_acquired("a1.mp3".to_string(), 12 * 1024 * 1024);

        assert_eq!(item.status, ItemStatus::Acquired);
        assert_eq!(item.local_artifact_name.as_deref(), Some("a1.mp3"));
        assert_eq!(item.artifact_size_mb, Some(12.0));
        assert!(item.last_error.is_none());
        assert!(item.last_attempt_at.is_none());
        assert_eq!(item.attempt_count, 1);
    }

    #[test]
    fn test_mark_failed_and_reset_clear_artifact() {
        let mut item = item("a1", ItemStatus::Pending, 0);
        item.mark_acquired("a1.mp3".to_string(), 1024);

        item.reset_to_pending("artifact missing");
        assert_eq!(item.status, ItemStatus::Pending);
        assert!(item.local_artifact_name.is_none());
        assert!(item.artifact_size_mb.is_none());
        assert_eq!(item.last_error.as_deref(), Some("artifact missing"));

        item.mark_failed("integrity: payload too small");
        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.local_artifact_name.is_none());
    }

    #[test]
    fn test_failed_promotion_requeues_acquired_item() {
        let mut item = item("a1", ItemStatus::Pending, 0);
        item.begin_attempt();
        item.mark_acquired("a1.mp3".to_string(), 4 * 1024 * 1024);

        item.mark_failed("promotion failed: disk full");

        assert_eq!(item.status, ItemStatus::Failed);
        assert!(item.local_artifact_name.is_none());
        assert!(item.artifact_size_mb.is_none());
        assert_eq!(item.attempt_count, 1);
        assert_eq!(item.last_error.as_deref(), Some("promotion failed: disk full"));

        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        manifest.items.insert(item.id.clone(), item);
        assert_eq!(manifest.acquisition_queue(), vec!["a1".to_string()]);
    }

    #[test]
    fn test_acquisition_queue_order() {
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        for item in [
            item("old-pending", ItemStatus::Pending, 100),
            item("new-pending", ItemStatus::Pending, 300),
            item("new-failed", ItemStatus::Failed, 400),
            item("old-failed", ItemStatus::Failed, 50),
            item("done", ItemStatus::Acquired, 500),
        ] {
            manifest.items.insert(item.id.clone(), item);
        }

        assert_eq!(
            manifest.acquisition_queue(),
            vec!["new-pending", "old-pending", "new-failed", "old-failed"]
        );
    }

    #[test]
    fn test_queue_uses_first_seen_when_created_at_missing() {
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        let mut a = item("a", ItemStatus::Pending, 0);
        a.created_at = None;
        a.first_seen_at = Utc.timestamp_opt(1_000, 0).unwrap();
        let b = item("b", ItemStatus::Pending, 500);
        manifest.items.insert(a.id.clone(), a);
        manifest.items.insert(b.id.clone(), b);

        assert_eq!(manifest.acquisition_queue(), vec!["a", "b"]);
    }

    #[test]
    fn test_serialized_field_names() {
        let mut item = item("a1", ItemStatus::Pending, 0);
        item.mark_acquired("a1.mp3".to_string(), 2 * 1024 * 1024);
        let json = serde_json::to_value(&item).unwrap();

        assert_eq!(json["creatorLabel"], "");
        assert_eq!(json["remoteUri"], "https://example.com/song/a1");
        assert_eq!(json["localArtifactName"], "a1.mp3");
        assert_eq!(json["artifactSizeMB"], 2.0);
        assert!(json.get("prompt").is_none());
    }

    #[test]
    fn test_stats() {
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        for item in [
            item("a", ItemStatus::Pending, 0),
            item("b", ItemStatus::Acquired, 0),
            item("c", ItemStatus::Acquired, 0),
            item("d", ItemStatus::Failed, 0),
        ] {
            manifest.items.insert(item.id.clone(), item);
        }
        let stats = manifest.stats();
        assert_eq!(stats.pending, 1);
        assert_eq!(stats.acquired, 2);
        assert_eq!(stats.failed, 1);
    }

    #[test]
    fn test_bytes_to_mb_rounding() {
        assert_eq!(bytes_to_mb(0), 0.0);
        assert_eq!(bytes_to_mb(1024 * 1024), 1.0);
        assert_eq!(bytes_to_mb(1_572_864), 1.5);
    }
}
