//! Artifact files on disk: naming, lookup, staging and promotion.

mod naming;
mod staging;

pub use naming::{id_stem, sanitize_component, ArtifactLocator, LabelNameIndex};
pub use staging::StagingArea;
