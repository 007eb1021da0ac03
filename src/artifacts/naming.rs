//! Artifact file naming and lookup in the output directory.
//!
//! An item's artifact is either id-named (`<id>.<ext>`) or label-named
//! (`<label> - <title>.<ext>`, sanitized). Label-named files come from
//! archives populated by hand and can collide between items.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Longest file stem produced by [`sanitize_component`], in characters.
const MAX_STEM_CHARS: usize = 180;

/// Make a string safe to use as a single file name component.
///
/// Path separators and characters reserved on common filesystems become
/// `_`, whitespace runs collapse to one space, and leading/trailing dots
/// and spaces are removed.
pub fn sanitize_component(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_space = false;

    for c in raw.chars() {
        let mapped = match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => ' ',
            c if c.is_whitespace() => ' ',
            c => c,
        };
        if mapped == ' ' {
            if last_was_space {
                continue;
            }
            last_was_space = true;
        } else {
            last_was_space = false;
        }
        out.push(mapped);
    }

    let trimmed: String = out
        .trim_matches(|c: char| c == '.' || c == ' ')
        .chars()
        .take(MAX_STEM_CHARS)
        .collect();
    let trimmed = trimmed.trim_end_matches([' ', '.']).to_string();

    if trimmed.is_empty() {
        "untitled".to_string()
    } else {
        trimmed
    }
}

/// File stem for an id.
///
/// Ids that are already safe file names are used as they are. Any other id
/// is percent-encoded (dots included), which keeps distinct ids on distinct
/// stems: `a:b` and `a?b` would both sanitize to `a_b`.
pub fn id_stem(id: &str) -> String {
    if !id.contains('%') && sanitize_component(id) == id {
        return id.to_string();
    }
    urlencoding::encode(id).replace('.', "%2E")
}

/// Finds artifacts in the output directory.
#[derive(Debug, Clone)]
pub struct ArtifactLocator {
    output_dir: PathBuf,
    extension: String,
}

impl ArtifactLocator {
    pub fn new(output_dir: impl Into<PathBuf>, extension: impl Into<String>) -> Self {
        let extension: String = extension.into();
        Self {
            output_dir: output_dir.into(),
            extension: extension.trim_start_matches('.').to_string(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    /// `<id>.<ext>`
    pub fn id_file_name(&self, id: &str) -> String {
        format!("{}.{}", id_stem(id), self.extension)
    }

    /// `<label> - <title>.<ext>`, falling back to the id for an empty title.
    pub fn label_file_name(&self, label: &str, title: &str, id: &str) -> String {
        let title = if title.trim().is_empty() { id } else { title };
        format!(
            "{}.{}",
            sanitize_component(&format!("{} - {}", label, title)),
            self.extension
        )
    }

    pub fn path_of(&self, file_name: &str) -> PathBuf {
        self.output_dir.join(file_name)
    }

    /// Returns true if a regular file with this name exists in the output directory.
    pub fn is_present(&self, file_name: &str) -> bool {
        self.path_of(file_name).is_file()
    }

    /// Find an existing artifact for an item.
    ///
    /// The id-named file wins; the label-named file is only considered when
    /// `label_name` is given.
    pub fn locate(&self, id: &str, label_name: Option<&str>) -> Option<String> {
        let id_name = self.id_file_name(id);
        if self.is_present(&id_name) {
            return Some(id_name);
        }
        label_name
            .filter(|name| self.is_present(name))
            .map(|name| name.to_string())
    }
}

/// Tracks which items map to each label-derived file name.
#[derive(Debug, Default)]
pub struct LabelNameIndex {
    owners: HashMap<String, HashSet<String>>,
}

impl LabelNameIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file_name: String, id: &str) {
        self.owners
            .entry(file_name)
            .or_default()
            .insert(id.to_string());
    }

    /// Returns true if more than one item maps to `file_name`.
    pub fn is_ambiguous(&self, file_name: &str) -> bool {
        self.owners
            .get(file_name)
            .map(|ids| ids.len() > 1)
            .unwrap_or(false)
    }

    /// Label file names shared by several items.
    pub fn collisions(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .owners
            .iter()
            .filter(|(_, ids)| ids.len() > 1)
            .map(|(name, _)| name.as_str())
            .collect();
        names.sort_unstable();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_sanitize_component() {
        assert_eq!(sanitize_component("Song"), "Song");
        assert_eq!(sanitize_component("AC/DC: Live?"), "AC_DC_ Live_");
        assert_eq!(sanitize_component("  lots   of\tspace  "), "lots of space");
        assert_eq!(sanitize_component("..hidden."), "hidden");
        assert_eq!(sanitize_component("line\nbreak"), "line break");
        assert_eq!(sanitize_component(""), "untitled");
        assert_eq!(sanitize_component("..."), "untitled");
    }

    #[test]
    fn test_sanitize_truncates_long_names() {
        let long = "x".repeat(500);
        assert_eq!(sanitize_component(&long).chars().count(), MAX_STEM_CHARS);
    }

    #[test]
    fn test_file_names() {
        let locator = ArtifactLocator::new("/out", ".mp3");
        assert_eq!(locator.extension(), "mp3");
        assert_eq!(locator.id_file_name("a1"), "a1.mp3");
        assert_eq!(
            locator.label_file_name("Artist", "My Song", "a1"),
            "Artist - My Song.mp3"
        );
        assert_eq!(locator.label_file_name("Artist", "  ", "a1"), "Artist - a1.mp3");
    }

    #[test]
    fn test_id_names_stay_distinct() {
        let locator = ArtifactLocator::new("/out", "mp3");
        assert_eq!(locator.id_file_name("song-01_b"), "song-01_b.mp3");
        assert_eq!(locator.id_file_name("a:b"), "a%3Ab.mp3");
        assert_eq!(locator.id_file_name("a?b"), "a%3Fb.mp3");
        assert_eq!(locator.id_file_name("a%3Ab"), "a%253Ab.mp3");
        assert_eq!(locator.id_file_name("../x"), "%2E%2E%2Fx.mp3");
        assert_eq!(locator.id_file_name(".hidden"), "%2Ehidden.mp3");
    }

    #[test]
    fn test_locate_does_not_confuse_ids_sharing_a_sanitized_name() {
        let dir = TempDir::new().unwrap();
        let locator = ArtifactLocator::new(dir.path(), "mp3");
        std::fs::write(dir.path().join(locator.id_file_name("a:b")), b"x").unwrap();

        assert_eq!(locator.locate("a:b", None).as_deref(), Some("a%3Ab.mp3"));
        assert_eq!(locator.locate("a?b", None), None);
        assert_eq!(locator.locate("a_b", None), None);
    }

    #[test]
    fn test_locate_prefers_id_name() {
        let dir = TempDir::new().unwrap();
        let locator = ArtifactLocator::new(dir.path(), "mp3");
        std::fs::write(dir.path().join("a1.mp3"), b"x").unwrap();
        std::fs::write(dir.path().join("Artist - Song.mp3"), b"x").unwrap();

        assert_eq!(
            locator.locate("a1", Some("Artist - Song.mp3")).as_deref(),
            Some("a1.mp3")
        );
        assert_eq!(
            locator.locate("b2", Some("Artist - Song.mp3")).as_deref(),
            Some("Artist - Song.mp3")
        );
        assert_eq!(locator.locate("b2", None), None);
        assert_eq!(locator.locate("c3", Some("Other - Song.mp3")), None);
    }

    #[test]
    fn test_directories_are_not_artifacts() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir(dir.path().join("a1.mp3")).unwrap();
        let locator = ArtifactLocator::new(dir.path(), "mp3");
        assert!(!locator.is_present("a1.mp3"));
    }

    #[test]
    fn test_label_index_collisions() {
        let mut index = LabelNameIndex::new();
        index.insert("Artist - Song.mp3".to_string(), "a");
        index.insert("Artist - Song.mp3".to_string(), "b");
        index.insert("Artist - Other.mp3".to_string(), "c");
        index.insert("Artist - Other.mp3".to_string(), "c");

        assert!(index.is_ambiguous("Artist - Song.mp3"));
        assert!(!index.is_ambiguous("Artist - Other.mp3"));
        assert!(!index.is_ambiguous("unknown.mp3"));
        assert_eq!(index.collisions(), vec!["Artist - Song.mp3"]);
    }
}
