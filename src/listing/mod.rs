//! Remote listing module
//!
//! Enumerates the remote catalog page by page and normalizes both paging
//! schemes into a single deduplicated sequence of [`RemoteItem`]s.

mod fetcher;
mod models;

pub use fetcher::{ListingError, ListingFetcher, PageCursor};
pub use models::{labels_from_listing, parse_page, ListingPage, RemoteItem};
