//! Source crawler: turns a platform source into a clean item list.
//!
//! Pages through the source listing, fetches details in batches, runs each
//! raw item through validation, then dedups and orders the survivors. The
//! `complete` flag on the outcome records whether every page and batch was
//! fetched; the reconciliation engine only retires absentees from sources
//! it saw completely.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::validate::{self, NormalizedItem};

use super::{RetryPolicy, VideoPlatform, DETAIL_BATCH_SIZE};

/// Result of crawling one source.
#[derive(Debug)]
pub struct CrawlOutcome {
    /// Valid items, deduplicated and ordered by publish time ascending.
    pub items: Vec<NormalizedItem>,
    /// True only if every listing page and every detail batch succeeded.
    /// A partial crawl is still usable for inserts and updates, but never
    /// as evidence of absence.
    pub complete: bool,
}

/// Crawls a single source through a [`VideoPlatform`].
pub struct SourceCrawler<'a, P: VideoPlatform> {
    platform: &'a P,
    retry: &'a RetryPolicy,
}

impl<'a, P: VideoPlatform> SourceCrawler<'a, P> {
    pub fn new(platform: &'a P, retry: &'a RetryPolicy) -> Self {
        Self { platform, retry }
    }

    pub async fn crawl(&self, source_id: &str) -> CrawlOutcome {
        let mut complete = true;

        let (ids, listing_complete) = self.list_all(source_id).await;
        complete &= listing_complete;
        debug!(source_id, listed = ids.len(), complete, "source listing done");

        let mut items = Vec::with_capacity(ids.len());
        for batch in ids.chunks(DETAIL_BATCH_SIZE) {
            let fetched = self
                .retry
                .execute(|| self.platform.get_items(batch))
                .await;
            match fetched {
                Ok(raw_items) => {
                    for raw in &raw_items {
                        match validate::validate(raw) {
                            Ok(item) => items.push(item),
                            Err(reason) => {
                                debug!(id = %raw.id, %reason, "skipping invalid item");
                            }
                        }
                    }
                }
                Err(err) => {
                    warn!(source_id, error = %err, "detail batch failed, crawl incomplete");
                    complete = false;
                }
            }
        }

        // the same item can be listed twice; keep the first occurrence
        let mut seen = HashSet::new();
        items.retain(|item| seen.insert(item.external_id.clone()));
        items.sort_by(|a, b| a.published_at.cmp(&b.published_at));

        CrawlOutcome { items, complete }
    }

    /// Collect every item id the listing yields. Stops early on a failed
    /// page, marking the listing incomplete.
    async fn list_all(&self, source_id: &str) -> (Vec<String>, bool) {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page = self
                .retry
                .execute(|| self.platform.list_page(source_id, page_token.as_deref()))
                .await;
            match page {
                Ok(page) => {
                    ids.extend(page.video_ids);
                    match page.next_page_token {
                        Some(token) => page_token = Some(token),
                        None => return (ids, true),
                    }
                }
                Err(err) => {
                    warn!(source_id, error = %err, "listing page failed, crawl incomplete");
                    return (ids, false);
                }
            }
        }
    }
}
