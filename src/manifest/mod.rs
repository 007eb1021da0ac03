//! Archive manifest module
//!
//! The manifest is the durable ledger of every item seen remotely and its
//! acquisition status.

mod models;
mod store;

pub use models::*;
pub use store::{load, save, ManifestStore};
