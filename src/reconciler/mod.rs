//! Catalog reconciliation.
//!
//! Merges a freshly fetched remote listing into the manifest. New ids become
//! new items; known ids only get their descriptive metadata refreshed, so
//! acquisition state survives any number of merges.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::artifacts::{ArtifactLocator, LabelNameIndex};
use crate::config::ArchiverSettings;
use crate::listing::RemoteItem;
use crate::manifest::{ArchiveManifest, CatalogItem, ItemStatus};

/// Label used when the listing carries none for an item.
pub const UNKNOWN_LABEL: &str = "Unknown";

/// Outcome of a [`merge`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeReport {
    /// Items seen for the first time
    pub created: usize,
    /// New items recorded as acquired because their artifact was already on disk
    pub recovered: usize,
    /// Known items whose descriptive metadata changed
    pub refreshed: usize,
    /// Label-derived file names shared by more than one item
    pub collisions: Vec<String>,
}

/// Merge `remote` into `manifest`.
///
/// `labels` maps item ids to creator labels. An item seen for the first time
/// is created pending, or acquired if an id-named or unambiguous label-named
/// artifact already exists in the output directory. Known items keep their
/// status, artifact, error and attempt history.
pub fn merge(
    manifest: &mut ArchiveManifest,
    remote: &[RemoteItem],
    labels: &HashMap<String, String>,
    locator: &ArtifactLocator,
    settings: &ArchiverSettings,
) -> MergeReport {
    let mut report = MergeReport::default();
    let label_index = build_label_index(manifest, remote, labels, locator);

    for collision in label_index.collisions() {
        warn!(
            "Several items map to the file name {:?}, it will not be used to recognise artifacts",
            collision
        );
        report.collisions.push(collision.to_string());
    }

    for remote_item in remote {
        let label = resolve_label(labels, &remote_item.id);

        if let Some(existing) = manifest.get_mut(&remote_item.id) {
            let before = existing.clone();
            refresh_descriptive(existing, remote_item, label);
            existing.remote_uri = settings.item_uri(&existing.id);
            if *existing != before {
                report.refreshed += 1;
            }
            continue;
        }

        let mut item = CatalogItem::new(remote_item.id.clone(), settings.item_uri(&remote_item.id));
        refresh_descriptive(&mut item, remote_item, label);

        let label_name = locator.label_file_name(&item.creator_label, &item.title, &item.id);
        let trusted_label_name = if label_index.is_ambiguous(&label_name) {
            None
        } else {
            Some(label_name.as_str())
        };

        if let Some(found) = locator.locate(&item.id, trusted_label_name) {
            let size = std::fs::metadata(locator.path_of(&found))
                .map(|meta| meta.len())
                .unwrap_or(0);
            info!("Found existing artifact {:?} for new item {}", found, item.id);
            item.mark_acquired(found, size);
            report.recovered += 1;
        } else {
            debug!("New item {} ({})", item.id, item.title);
        }

        manifest.items.insert(item.id.clone(), item);
        report.created += 1;
    }

    info!(
        "Merged {} remote items: {} new ({} already on disk), {} refreshed",
        remote.len(),
        report.created,
        report.recovered,
        report.refreshed
    );
    report
}

/// Move every failed item back to pending so the next run retries it.
///
/// `lastError` is kept until the next attempt overwrites or clears it.
pub fn reset_failed(manifest: &mut ArchiveManifest) -> usize {
    let mut reset = 0;
    for item in manifest.items.values_mut() {
        if item.status == ItemStatus::Failed {
            item.status = ItemStatus::Pending;
            reset += 1;
        }
    }
    if reset > 0 {
        info!("Reset {} failed items to pending", reset);
    }
    reset
}

/// Index every known and incoming item by its label-derived file name.
pub fn build_label_index(
    manifest: &ArchiveManifest,
    remote: &[RemoteItem],
    labels: &HashMap<String, String>,
    locator: &ArtifactLocator,
) -> LabelNameIndex {
    let mut index = LabelNameIndex::new();
    for item in manifest.items.values() {
        index.insert(
            locator.label_file_name(&item.creator_label, &item.title, &item.id),
            &item.id,
        );
    }
    for item in remote {
        // Known items are indexed under their refreshed name as well
        let title = item.title.as_deref().unwrap_or_default();
        let label = resolve_label(labels, &item.id);
        index.insert(locator.label_file_name(label, title, &item.id), &item.id);
    }
    index
}

fn resolve_label<'a>(labels: &'a HashMap<String, String>, id: &str) -> &'a str {
    labels
        .get(id)
        .map(|label| label.as_str())
        .filter(|label| !label.trim().is_empty())
        .unwrap_or(UNKNOWN_LABEL)
}

fn refresh_descriptive(item: &mut CatalogItem, remote: &RemoteItem, label: &str) {
    item.title = remote.title.clone().unwrap_or_default();
    item.creator_label = label.to_string();
    item.category = remote.category.clone().unwrap_or_default();

    // Optional parameters are only replaced when the listing supplies them
    if remote.prompt.is_some() {
        item.prompt = remote.prompt.clone();
    }
    if remote.lyrics.is_some() {
        item.lyrics = remote.lyrics.clone();
    }
    if remote.model_tag.is_some() {
        item.model_tag = remote.model_tag.clone();
    }
    if remote.seed.is_some() {
        item.seed = remote.seed;
    }
    if remote.play_count.is_some() {
        item.play_count = remote.play_count;
    }
    if remote.favorite_count.is_some() {
        item.favorite_count = remote.favorite_count;
    }
    if remote.created_at.is_some() {
        item.created_at = remote.created_at;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::SourceMode;
    use tempfile::TempDir;

    struct Fixture {
        dir: TempDir,
        locator: ArtifactLocator,
        settings: ArchiverSettings,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let locator = ArtifactLocator::new(dir.path(), "mp3");
            let settings = ArchiverSettings {
                remote_base_uri: "https://music.example.com".to_string(),
                ..Default::default()
            };
            Self {
                dir,
                locator,
                settings,
            }
        }

        fn write_artifact(&self, name: &str, bytes: usize) {
            std::fs::write(self.dir.path().join(name), vec![0u8; bytes]).unwrap();
        }

        fn merge(
            &self,
            manifest: &mut ArchiveManifest,
            remote: &[RemoteItem],
            labels: &HashMap<String, String>,
        ) -> MergeReport {
            merge(manifest, remote, labels, &self.locator, &self.settings)
        }
    }

    fn labels(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(id, label)| (id.to_string(), label.to_string()))
            .collect()
    }

    #[test]
    fn test_merge_creates_pending_items() {
        let fx = Fixture::new();
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        let remote = vec![RemoteItem::new("a1", "Song"), RemoteItem::new("b2", "Other")];

        let report = fx.merge(&mut manifest, &remote, &labels(&[("a1", "Artist")]));

        assert_eq!(report.created, 2);
        assert_eq!(report.recovered, 0);
        let a1 = manifest.get("a1").unwrap();
        assert_eq!(a1.status, ItemStatus::Pending);
        assert_eq!(a1.creator_label, "Artist");
        assert_eq!(a1.remote_uri, "https://music.example.com/song/a1");
        assert_eq!(manifest.get("b2").unwrap().creator_label, UNKNOWN_LABEL);
    }

    #[test]
    fn test_merge_twice_is_idempotent() {
        let fx = Fixture::new();
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        let mut song = RemoteItem::new("a1", "Song");
        song.prompt = Some("lofi beat".to_string());
        let remote = vec![song, RemoteItem::new("b2", "Other")];
        let labels = labels(&[("a1", "Artist")]);

        fx.merge(&mut manifest, &remote, &labels);
        let first = serde_json::to_string(&manifest.items).unwrap();

        let report = fx.merge(&mut manifest, &remote, &labels);
        let second = serde_json::to_string(&manifest.items).unwrap();

        assert_eq!(report.created, 0);
        assert_eq!(report.refreshed, 0);
        assert_eq!(first, second);
    }

    #[test]
    fn test_duplicate_ids_in_listing_create_one_item() {
        let fx = Fixture::new();
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        let remote = vec![RemoteItem::new("a1", "Song"), RemoteItem::new("a1", "Song")];

        let report = fx.merge(&mut manifest, &remote, &HashMap::new());

        assert_eq!(report.created, 1);
        assert_eq!(manifest.len(), 1);
    }

    #[test]
    fn test_merge_never_touches_acquisition_state() {
        let fx = Fixture::new();
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        fx.merge(
            &mut manifest,
            &[RemoteItem::new("a1", "Song"), RemoteItem::new("b2", "Other")],
            &HashMap::new(),
        );

        {
            let a1 = manifest.get_mut("a1").unwrap();
            a1.begin_attempt();
            a1.mark_acquired("a1.mp3".to_string(), 5 * 1024 * 1024);
            let b2 = manifest.get_mut("b2").unwrap();
            b2.begin_attempt();
            b2.mark_failed("transport: connection reset");
        }
        let a1_before = manifest.get("a1").unwrap().clone();
        let b2_before = manifest.get("b2").unwrap().clone();

        let mut renamed = RemoteItem::new("a1", "Song (Remastered)");
        renamed.play_count = Some(42);
        let report = fx.merge(
            &mut manifest,
            &[renamed, RemoteItem::new("b2", "Other")],
            &labels(&[("a1", "New Name")]),
        );

        assert_eq!(report.refreshed, 1);
        let a1 = manifest.get("a1").unwrap();
        assert_eq!(a1.title, "Song (Remastered)");
        assert_eq!(a1.creator_label, "New Name");
        assert_eq!(a1.play_count, Some(42));
        assert_eq!(a1.status, a1_before.status);
        assert_eq!(a1.local_artifact_name, a1_before.local_artifact_name);
        assert_eq!(a1.artifact_size_mb, a1_before.artifact_size_mb);
        assert_eq!(a1.attempt_count, a1_before.attempt_count);

        let b2 = manifest.get("b2").unwrap();
        assert_eq!(b2.status, ItemStatus::Failed);
        assert_eq!(b2.last_error, b2_before.last_error);
        assert_eq!(b2.last_attempt_at, b2_before.last_attempt_at);
        assert_eq!(b2.attempt_count, 1);
    }

    #[test]
    fn test_absent_optional_fields_keep_previous_values() {
        let fx = Fixture::new();
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        let mut full = RemoteItem::new("a1", "Song");
        full.seed = Some(1234);
        full.lyrics = Some("la la".to_string());
        fx.merge(&mut manifest, &[full], &HashMap::new());

        fx.merge(&mut manifest, &[RemoteItem::new("a1", "Song")], &HashMap::new());

        let a1 = manifest.get("a1").unwrap();
        assert_eq!(a1.seed, Some(1234));
        assert_eq!(a1.lyrics.as_deref(), Some("la la"));
    }

    #[test]
    fn test_first_run_recovers_id_named_artifact() {
        let fx = Fixture::new();
        fx.write_artifact("a1.mp3", 2 * 1024 * 1024);
        let mut manifest = ArchiveManifest::new(SourceMode::Library);

        let report = fx.merge(&mut manifest, &[RemoteItem::new("a1", "Song")], &HashMap::new());

        assert_eq!(report.recovered, 1);
        let a1 = manifest.get("a1").unwrap();
        assert_eq!(a1.status, ItemStatus::Acquired);
        assert_eq!(a1.local_artifact_name.as_deref(), Some("a1.mp3"));
        assert_eq!(a1.artifact_size_mb, Some(2.0));
    }

    #[test]
    fn test_first_run_recovers_label_named_artifact() {
        let fx = Fixture::new();
        fx.write_artifact("Artist - Song.mp3", 1024);
        let mut manifest = ArchiveManifest::new(SourceMode::Library);

        fx.merge(
            &mut manifest,
            &[RemoteItem::new("a1", "Song")],
            &labels(&[("a1", "Artist")]),
        );

        let a1 = manifest.get("a1").unwrap();
        assert_eq!(a1.status, ItemStatus::Acquired);
        assert_eq!(a1.local_artifact_name.as_deref(), Some("Artist - Song.mp3"));
    }

    #[test]
    fn test_colliding_label_names_are_not_trusted() {
        let fx = Fixture::new();
        fx.write_artifact("Artist - Song.mp3", 1024);
        let mut manifest = ArchiveManifest::new(SourceMode::Library);

        let report = fx.merge(
            &mut manifest,
            &[RemoteItem::new("a1", "Song"), RemoteItem::new("a2", "Song")],
            &labels(&[("a1", "Artist"), ("a2", "Artist")]),
        );

        assert_eq!(report.recovered, 0);
        assert_eq!(report.collisions, vec!["Artist - Song.mp3".to_string()]);
        assert_eq!(manifest.get("a1").unwrap().status, ItemStatus::Pending);
        assert_eq!(manifest.get("a2").unwrap().status, ItemStatus::Pending);
    }

    #[test]
    fn test_existing_item_is_not_recovered_from_disk() {
        let fx = Fixture::new();
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        fx.merge(&mut manifest, &[RemoteItem::new("a1", "Song")], &HashMap::new());

        fx.write_artifact("a1.mp3", 1024);
        fx.merge(&mut manifest, &[RemoteItem::new("a1", "Song")], &HashMap::new());

        assert_eq!(manifest.get("a1").unwrap().status, ItemStatus::Pending);
    }

    #[test]
    fn test_reset_failed() {
        let fx = Fixture::new();
        let mut manifest = ArchiveManifest::new(SourceMode::Library);
        fx.merge(
            &mut manifest,
            &[
                RemoteItem::new("a", "A"),
                RemoteItem::new("b", "B"),
                RemoteItem::new("c", "C"),
            ],
            &HashMap::new(),
        );
        manifest.get_mut("a").unwrap().mark_failed("integrity: payload too small");
        manifest.get_mut("b").unwrap().mark_acquired("b.mp3".to_string(), 1);

        assert_eq!(reset_failed(&mut manifest), 1);

        let a = manifest.get("a").unwrap();
        assert_eq!(a.status, ItemStatus::Pending);
        assert_eq!(a.last_error.as_deref(), Some("integrity: payload too small"));
        assert_eq!(manifest.get("b").unwrap().status, ItemStatus::Acquired);
        assert_eq!(reset_failed(&mut manifest), 0);
    }
}
