//! Track Archiver Library
//!
//! Keeps a local archive of a remote track catalog in sync, resuming
//! interrupted runs from a persisted manifest.

pub mod acquisition;
pub mod archiver;
pub mod artifacts;
pub mod config;
pub mod listing;
pub mod manifest;
pub mod reconciler;
pub mod session;
pub mod throttle;
pub mod verifier;

// Re-export commonly used types for convenience
pub use archiver::{Archiver, RunSummary, SyncOptions};
pub use manifest::{ArchiveManifest, CatalogItem, ItemStatus, ManifestStore, SourceMode};
pub use session::{Credentials, HttpSession, RemoteSession, SessionFile};
pub use verifier::{VerifyMode, VerifyReport};
