//! Common test infrastructure
//!
//! In-memory remote session and temporary archive fixtures for end-to-end
//! tests. Tests should only import from this module, not from internal
//! submodules.

mod fixtures;
mod session;

// Public API - this is what tests import
pub use fixtures::TestArchive;
pub use session::{ScriptedSession, MB};
