//! Reconciliation engine.
//!
//! One run crawls every registered source, diffs the result against the
//! stored catalog, and applies inserts, updates and retirements. The
//! engine is the only writer of video rows; the search index follows the
//! change bus on its own.

pub mod scheduler;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::enrich::EnrichClient;
use crate::error::{Error, Result};
use crate::models::Video;
use crate::platform::{RawItem, RetryPolicy, SourceCrawler, VideoPlatform};
use crate::repository::{
    DieselCategoryRepository, DieselSourceRepository, DieselTombstoneRepository,
    DieselVideoRepository, VideoDraft,
};
use crate::search::SearchIndex;
use crate::validate::{self, NormalizedItem};

/// How many related videos to attach to each entry.
pub const DEFAULT_NUM_RELATED: usize = 4;

/// Mutation counts from one reconciliation run.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub inserted: usize,
    pub updated: usize,
    pub deleted: usize,
    pub sources: usize,
    pub complete_sources: usize,
}

/// What became of one absent video after asking the platform directly.
enum Revalidation {
    Valid,
    Gone(String),
    Unknowable,
}

/// Drives the full crawl/diff/retire cycle.
pub struct ReconcileService<P: VideoPlatform> {
    platform: Arc<P>,
    videos: DieselVideoRepository,
    sources: DieselSourceRepository,
    categories: DieselCategoryRepository,
    tombstones: DieselTombstoneRepository,
    enrich: Arc<EnrichClient>,
    index: Arc<SearchIndex>,
    retry: RetryPolicy,
    num_related: usize,
    running: AtomicBool,
}

impl<P: VideoPlatform> ReconcileService<P> {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        platform: Arc<P>,
        videos: DieselVideoRepository,
        sources: DieselSourceRepository,
        categories: DieselCategoryRepository,
        tombstones: DieselTombstoneRepository,
        enrich: Arc<EnrichClient>,
        index: Arc<SearchIndex>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            platform,
            videos,
            sources,
            categories,
            tombstones,
            enrich,
            index,
            retry,
            num_related: DEFAULT_NUM_RELATED,
            running: AtomicBool::new(false),
        }
    }

    pub fn with_num_related(mut self, num_related: usize) -> Self {
        self.num_related = num_related;
        self
    }

    /// Run one reconciliation cycle, unless one is already in flight, in
    /// which case `Ok(None)` is returned immediately.
    pub async fn try_run(&self) -> Result<Option<RunReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("reconciliation already running, skipping");
            return Ok(None);
        }

        let result = self.run().await;
        self.running.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    async fn run(&self) -> Result<RunReport> {
        let mut report = RunReport::default();

        // setup failures abort the run outright
        let sources = self.sources.get_all().await?;
        let tombstoned = self.tombstones.all_ids().await?;
        report.sources = sources.len();
        info!(sources = sources.len(), "reconciliation run starting");

        // crawl every source, remembering which crawls were total
        let crawler = SourceCrawler::new(self.platform.as_ref(), &self.retry);
        let mut complete: HashMap<String, bool> = HashMap::new();
        let mut crawled: Vec<(String, NormalizedItem)> = Vec::new();

        for source in &sources {
            self.refresh_source_metadata(&source.external_id).await;

            let outcome = crawler.crawl(&source.external_id).await;
            if outcome.complete {
                report.complete_sources += 1;
            }
            info!(
                source = %source.external_id,
                items = outcome.items.len(),
                complete = outcome.complete,
                "source crawled"
            );
            complete.insert(source.external_id.clone(), outcome.complete);
            crawled.extend(
                outcome
                    .items
                    .into_iter()
                    .map(|item| (source.external_id.clone(), item)),
            );
        }

        // the same item can appear under several sources; first one wins
        let mut seen: HashSet<String> = HashSet::new();
        crawled.retain(|(_, item)| seen.insert(item.external_id.clone()));
        crawled.sort_by(|(_, a), (_, b)| a.published_at.cmp(&b.published_at));

        for (source_id, item) in &crawled {
            if tombstoned.contains(&item.external_id) {
                debug!(id = %item.external_id, "tombstoned, skipping");
                continue;
            }
            match self.videos.get_by_external_id(&item.external_id).await? {
                None => {
                    if self.insert_item(source_id, item).await? {
                        report.inserted += 1;
                    }
                }
                Some(existing) => {
                    if self.reconcile_item(existing, source_id).await? {
                        report.updated += 1;
                    }
                }
            }
        }

        report.deleted += self.retire_absent(&complete, &seen).await?;
        report.deleted += self.revalidate_orphans(&sources, &seen).await?;

        info!(
            inserted = report.inserted,
            updated = report.updated,
            deleted = report.deleted,
            "reconciliation run finished"
        );
        Ok(report)
    }

    /// Refresh stored source/channel metadata. Best-effort; a stale row is
    /// better than a dead run.
    async fn refresh_source_metadata(&self, source_id: &str) {
        let metadata = self
            .retry
            .execute(|| self.platform.get_source_metadata(source_id))
            .await;
        let metadata = match metadata {
            Ok(m) => m,
            Err(err) => {
                warn!(source_id, error = %err, "source metadata refresh failed");
                return;
            }
        };

        let channel_thumbnails = match self
            .retry
            .execute(|| self.platform.get_channel_metadata(&metadata.channel_id))
            .await
        {
            Ok(channel) => channel.thumbnails,
            Err(err) => {
                warn!(source_id, error = %err, "channel metadata refresh failed");
                serde_json::Value::default()
            }
        };

        if let Err(err) = self
            .sources
            .upsert(source_id, &metadata, &channel_thumbnails)
            .await
        {
            warn!(source_id, error = %err, "source metadata persist failed");
        }
    }

    /// Insert a new catalog entry, enriching what the platform does not
    /// provide. Returns false when someone else inserted it first.
    async fn insert_item(&self, source_id: &str, item: &NormalizedItem) -> Result<bool> {
        let (short_description, category_id) = self.enrich_item(&item.title).await;

        let draft = VideoDraft {
            external_id: item.external_id.clone(),
            source_id: source_id.to_string(),
            title: item.title.clone(),
            description: item.description.clone(),
            short_description,
            tags: item.tags.clone(),
            category_id,
            duration_seconds: item.duration_seconds as i32,
            published_at: item.published_at,
            thumbnails: item.thumbnails.clone(),
        };

        match self.videos.insert(draft).await {
            Ok(video) => {
                debug!(id = video.id, external_id = %video.external_id, "inserted");
                Ok(true)
            }
            Err(err) => {
                let err = Error::from(err);
                if err.is_unique_violation() {
                    debug!(external_id = %item.external_id, "already catalogued");
                    return Ok(false);
                }
                Err(err)
            }
        }
    }

    /// Bring a stored video's ownership and derived fields in line with the
    /// crawl. Descriptive fields (title, description, tags, thumbnails) are
    /// left alone so manual curation survives a refresh. Returns true when
    /// anything actually changed.
    async fn reconcile_item(&self, mut video: Video, source_id: &str) -> Result<bool> {
        let before = video.clone();

        if video.source_id.as_deref() != Some(source_id) {
            video.source_id = Some(source_id.to_string());
        }

        video.similar_ids = self.related_ids(&video);

        if video.short_description.is_none() || video.category_id.is_none() {
            let (short_description, category_id) = self.enrich_item(&video.title).await;
            if video.short_description.is_none() {
                video.short_description = short_description;
            }
            if video.category_id.is_none() {
                video.category_id = category_id;
            }
        }

        let changed = video.source_id != before.source_id
            || video.similar_ids != before.similar_ids
            || video.short_description != before.short_description
            || video.category_id != before.category_id;

        if changed {
            self.videos.update(&video).await?;
        }
        Ok(changed)
    }

    /// Look up related entries by title, excluding the video itself.
    fn related_ids(&self, video: &Video) -> Vec<i32> {
        match self.index.search(&video.title, self.num_related + 1, 0) {
            Ok((ids, _)) => ids
                .into_iter()
                .filter(|&id| id != video.id)
                .take(self.num_related)
                .collect(),
            Err(err) => {
                warn!(id = video.id, error = %err, "related lookup failed");
                video.similar_ids.clone()
            }
        }
    }

    /// Best-effort enrichment: a blank field beats a failed run.
    async fn enrich_item(&self, title: &str) -> (Option<String>, Option<i32>) {
        if !self.enrich.is_enabled() {
            return (None, None);
        }

        let short_description = match self.enrich.generate_description(title).await {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(title, error = %err, "description enrichment failed");
                None
            }
        };

        let category_id = match self.pick_category(title).await {
            Ok(id) => id,
            Err(err) => {
                warn!(title, error = %err, "category enrichment failed");
                None
            }
        };

        (short_description, category_id)
    }

    async fn pick_category(&self, title: &str) -> Result<Option<i32>> {
        let categories = self.categories.get_all().await?;
        let names: Vec<String> = categories.iter().map(|c| c.name.clone()).collect();

        let choice = self
            .enrich
            .categorize(title, &names)
            .await
            .map_err(|e| Error::Other(e.to_string()))?;

        Ok(choice.and_then(|name| {
            categories
                .iter()
                .find(|c| c.name == name)
                .map(|c| c.id)
        }))
    }

    /// Retire videos that vanished from a completely crawled source, after
    /// confirming their fate with the platform directly.
    async fn retire_absent(
        &self,
        complete: &HashMap<String, bool>,
        seen: &HashSet<String>,
    ) -> Result<usize> {
        let mut deleted = 0;

        for (source_id, &is_complete) in complete {
            if !is_complete {
                debug!(%source_id, "crawl incomplete, skipping retirement");
                continue;
            }
            for video in self.videos.get_by_source(source_id).await? {
                if seen.contains(&video.external_id) {
                    continue;
                }
                match self.revalidate(&video.external_id).await {
                    Revalidation::Valid => {
                        debug!(external_id = %video.external_id, "absent but still valid, keeping");
                    }
                    Revalidation::Gone(reason) => {
                        if self.retire(&video, &reason).await {
                            deleted += 1;
                        }
                    }
                    Revalidation::Unknowable => {
                        warn!(external_id = %video.external_id, "cannot evaluate, keeping");
                    }
                }
            }
        }
        Ok(deleted)
    }

    /// Orphans are not covered by any listing, so they are re-checked on
    /// every run.
    async fn revalidate_orphans(
        &self,
        sources: &[crate::models::Source],
        seen: &HashSet<String>,
    ) -> Result<usize> {
        let known: Vec<String> = sources.iter().map(|s| s.external_id.clone()).collect();
        let mut deleted = 0;

        for video in self.videos.get_orphans(&known).await? {
            if seen.contains(&video.external_id) {
                continue;
            }
            match self.revalidate(&video.external_id).await {
                Revalidation::Valid => {
                    if let Err(err) = self.backfill_orphan(video).await {
                        warn!(error = %err, "orphan backfill failed");
                    }
                }
                Revalidation::Gone(reason) => {
                    if self.retire(&video, &reason).await {
                        deleted += 1;
                    }
                }
                Revalidation::Unknowable => {
                    warn!(external_id = %video.external_id, "cannot evaluate orphan, keeping");
                }
            }
        }
        Ok(deleted)
    }

    /// Fill the enrichment-owned fields of a still-valid orphan when they
    /// are blank.
    async fn backfill_orphan(&self, mut video: Video) -> Result<()> {
        if video.short_description.is_some() && video.category_id.is_some() {
            return Ok(());
        }
        let (short_description, category_id) = self.enrich_item(&video.title).await;

        let mut changed = false;
        if video.short_description.is_none() && short_description.is_some() {
            video.short_description = short_description;
            changed = true;
        }
        if video.category_id.is_none() && category_id.is_some() {
            video.category_id = category_id;
            changed = true;
        }
        if changed {
            self.videos.update(&video).await?;
        }
        Ok(())
    }

    /// Ask the platform for one item's current state.
    async fn revalidate(&self, external_id: &str) -> Revalidation {
        let ids = vec![external_id.to_string()];
        let fetched = self.retry.execute(|| self.platform.get_items(&ids)).await;

        let items = match fetched {
            Ok(items) => items,
            Err(err) => {
                warn!(external_id, error = %err, "revalidation exhausted retries");
                return Revalidation::Unknowable;
            }
        };

        let raw: Option<&RawItem> = items.iter().find(|item| item.id == external_id);
        match raw {
            None => Revalidation::Gone("removed upstream".to_string()),
            Some(raw) => match validate::validate(raw) {
                Ok(_) => Revalidation::Valid,
                Err(reason) => Revalidation::Gone(reason.to_string()),
            },
        }
    }

    /// Delete a video and leave a tombstone. Failures are logged, never
    /// fatal to the run.
    async fn retire(&self, video: &Video, reason: &str) -> bool {
        info!(id = video.id, external_id = %video.external_id, reason, "retiring");
        if let Err(err) = self.videos.delete(video.id).await {
            warn!(id = video.id, error = %err, "deletion failed");
            return false;
        }
        if let Err(err) = self.tombstones.add(&video.external_id, reason).await {
            warn!(external_id = %video.external_id, error = %err, "tombstone write failed");
        }
        true
    }
}
