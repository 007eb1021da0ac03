//! Paginated enumeration of the remote listing.

use std::collections::HashSet;
use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, info, warn};

use super::models::{parse_page, ListingPage, RemoteItem};
use crate::config::ArchiverSettings;
use crate::manifest::SourceMode;
use crate::session::{Credentials, RemoteSession, SessionError};
use crate::throttle::RequestThrottle;

/// Errors that end a listing run.
#[derive(Debug, Error)]
pub enum ListingError {
    /// The very first page could not be fetched.
    #[error("Remote listing unreachable: {0}")]
    Unreachable(#[source] SessionError),
}

/// Position in a paginated listing.
///
/// The library listing is addressed by page number, the favorites listing by
/// a running offset into the result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    PageIndex(usize),
    Offset(usize),
}

impl PageCursor {
    /// The first page for a listing variant.
    pub fn start(mode: SourceMode) -> Self {
        match mode {
            SourceMode::Library => PageCursor::PageIndex(0),
            SourceMode::Favorites => PageCursor::Offset(0),
        }
    }

    /// Move past a page that contained `received` items.
    pub fn advance(&mut self, received: usize) {
        match self {
            PageCursor::PageIndex(page) => *page += 1,
            PageCursor::Offset(offset) => *offset += received,
        }
    }
}

/// Fetches the complete remote listing, one page at a time.
pub struct ListingFetcher {
    session: Arc<dyn RemoteSession>,
    throttle: Arc<dyn RequestThrottle>,
    settings: ArchiverSettings,
}

impl ListingFetcher {
    pub fn new(
        session: Arc<dyn RemoteSession>,
        throttle: Arc<dyn RequestThrottle>,
        settings: ArchiverSettings,
    ) -> Self {
        Self {
            session,
            throttle,
            settings,
        }
    }

    /// URL of the page at `cursor`.
    pub fn page_url(&self, cursor: PageCursor, credentials: &Credentials) -> String {
        let size = self.settings.page_size.to_string();
        let path = match cursor {
            PageCursor::PageIndex(page) => self
                .settings
                .library_path_template
                .replace("{page}", &page.to_string())
                .replace("{size}", &size),
            PageCursor::Offset(offset) => self
                .settings
                .favorites_path_template
                .replace("{owner}", &urlencoding::encode(&credentials.owner_id))
                .replace("{offset}", &offset.to_string())
                .replace("{size}", &size),
        };
        format!("{}{}", self.settings.remote_base_uri, path)
    }

    /// Enumerate every item of the listing, deduplicated by id.
    ///
    /// Stops at the first empty or short page, counting raw entries so a
    /// skipped malformed entry never shortens a page. A failure after the
    /// first page ends enumeration early and returns what was collected; a
    /// failure on the first page is returned as [`ListingError::Unreachable`].
    ///
    /// A full page with no new id is normal when items are inserted at the
    /// head during enumeration. Only `max_stale_pages` such pages in a row,
    /// or reaching `max_pages`, end the run early.
    pub async fn fetch_all(
        &self,
        mode: SourceMode,
        credentials: &Credentials,
    ) -> Result<Vec<RemoteItem>, ListingError> {
        let page_size = self.settings.page_size;
        let mut cursor = PageCursor::start(mode);
        let mut seen: HashSet<String> = HashSet::new();
        let mut items = Vec::new();
        let mut pages_fetched = 0usize;
        let mut stale_pages = 0usize;

        info!("Fetching {} listing", mode.as_str());

        loop {
            if pages_fetched >= self.settings.max_pages {
                warn!(
                    "Reached the limit of {} listing pages, stopping with {} items",
                    self.settings.max_pages,
                    items.len()
                );
                break;
            }
            if pages_fetched > 0 {
                self.throttle.pause().await;
            }

            let url = self.page_url(cursor, credentials);
            debug!("Requesting listing page {:?}: {}", cursor, url);

            let page = match self.fetch_page(&url, credentials).await {
                Ok(page) => page,
                Err(e) if pages_fetched == 0 => return Err(ListingError::Unreachable(e)),
                Err(e) => {
                    warn!(
                        "Listing page {:?} failed ({}), keeping {} items collected so far",
                        cursor,
                        e,
                        items.len()
                    );
                    break;
                }
            };
            pages_fetched += 1;

            let received = page.raw_count;
            if received == 0 {
                debug!("Empty page {:?}, listing complete", cursor);
                break;
            }

            let mut fresh = 0usize;
            for item in page.items {
                if seen.insert(item.id.clone()) {
                    items.push(item);
                    fresh += 1;
                }
            }
            debug!("Page {:?}: {} entries, {} new", cursor, received, fresh);

            if received < page_size {
                break;
            }

            if fresh == 0 {
                stale_pages += 1;
                if stale_pages >= self.settings.max_stale_pages {
                    warn!(
                        "{} consecutive pages repeated items already seen, stopping at {:?}",
                        stale_pages, cursor
                    );
                    break;
                }
            } else {
                stale_pages = 0;
            }

            cursor.advance(received);
        }

        info!(
            "Fetched {} unique items over {} pages",
            items.len(),
            pages_fetched
        );
        Ok(items)
    }

    async fn fetch_page(
        &self,
        url: &str,
        credentials: &Credentials,
    ) -> Result<ListingPage, SessionError> {
        let body = self.session.request_json(url, credentials).await?;
        parse_page(body).map_err(SessionError::InvalidPayload)
    }
}
