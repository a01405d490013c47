//! End-to-end reconciliation tests against a scripted platform.
//!
//! Each harness owns a temp database, an in-memory search index, and a
//! mock platform whose upstream state the tests mutate between runs. Index
//! changes are pumped through the synchronizer explicitly so every
//! assertion sees a settled index.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{TimeZone, Utc};
use serde_json::json;

use docuseek::enrich::{EnrichClient, EnrichConfig};
use docuseek::platform::{
    ChannelMetadata, ListingPage, PlatformError, RawItem, RetryPolicy, SourceMetadata,
    VideoPlatform,
};
use docuseek::repository::{
    create_diesel_pool, init_schema, ChangeBus, ChangeSet, DieselCategoryRepository,
    DieselSourceRepository, DieselTombstoneRepository, DieselVideoRepository,
};
use docuseek::search::sync::SearchSynchronizer;
use docuseek::search::SearchIndex;
use docuseek::sync::{ReconcileService, RunReport};

#[derive(Default)]
struct MockState {
    /// source id -> listed item ids (a single listing page)
    listings: HashMap<String, Vec<String>>,
    /// item id -> current upstream state
    items: HashMap<String, RawItem>,
    /// sources whose listing fetch fails outright
    fail_listing: HashSet<String>,
    /// make every detail fetch fail
    fail_details: bool,
    /// when set, every listing fetch signals `entered` and then waits on
    /// `gate`
    listing_gate: Option<(Arc<tokio::sync::Semaphore>, Arc<tokio::sync::Semaphore>)>,
}

struct MockPlatform {
    state: Mutex<MockState>,
}

impl MockPlatform {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState::default()),
        })
    }

    fn set_listing(&self, source: &str, ids: &[&str]) {
        self.state.lock().unwrap().listings.insert(
            source.to_string(),
            ids.iter().map(|s| s.to_string()).collect(),
        );
    }

    fn put_item(&self, item: RawItem) {
        self.state.lock().unwrap().items.insert(item.id.clone(), item);
    }

    fn remove_item(&self, id: &str) {
        self.state.lock().unwrap().items.remove(id);
    }

    fn fail_listing(&self, source: &str, fail: bool) {
        let mut state = self.state.lock().unwrap();
        if fail {
            state.fail_listing.insert(source.to_string());
        } else {
            state.fail_listing.remove(source);
        }
    }

    fn fail_details(&self, fail: bool) {
        self.state.lock().unwrap().fail_details = fail;
    }

    fn set_listing_gate(
        &self,
        entered: Arc<tokio::sync::Semaphore>,
        gate: Arc<tokio::sync::Semaphore>,
    ) {
        self.state.lock().unwrap().listing_gate = Some((entered, gate));
    }
}

#[async_trait::async_trait]
impl VideoPlatform for MockPlatform {
    async fn list_page(
        &self,
        source_id: &str,
        _page_token: Option<&str>,
    ) -> Result<ListingPage, PlatformError> {
        let (failed, ids, gate) = {
            let state = self.state.lock().unwrap();
            (
                state.fail_listing.contains(source_id),
                state.listings.get(source_id).cloned().unwrap_or_default(),
                state.listing_gate.clone(),
            )
        };
        if let Some((entered, gate)) = gate {
            entered.add_permits(1);
            let _permit = gate.acquire().await.unwrap();
        }
        if failed {
            return Err(PlatformError::Connection("listing down".to_string()));
        }
        Ok(ListingPage {
            video_ids: ids,
            next_page_token: None,
        })
    }

    async fn get_items(&self, ids: &[String]) -> Result<Vec<RawItem>, PlatformError> {
        let state = self.state.lock().unwrap();
        if state.fail_details {
            return Err(PlatformError::Connection("details down".to_string()));
        }
        Ok(ids
            .iter()
            .filter_map(|id| state.items.get(id).cloned())
            .collect())
    }

    async fn get_source_metadata(&self, source_id: &str) -> Result<SourceMetadata, PlatformError> {
        Ok(SourceMetadata {
            channel_id: format!("UC-{source_id}"),
            title: format!("Source {source_id}"),
            thumbnails: json!({}),
            description: None,
        })
    }

    async fn get_channel_metadata(
        &self,
        channel_id: &str,
    ) -> Result<ChannelMetadata, PlatformError> {
        Ok(ChannelMetadata {
            title: format!("Channel {channel_id}"),
            thumbnails: json!({}),
            description: None,
        })
    }
}

fn raw_item(id: &str, title: &str, duration: &str, minute: u32) -> RawItem {
    RawItem {
        id: id.to_string(),
        title: title.to_string(),
        description: Some(format!("A documentary called {title}.")),
        tags: vec![],
        thumbnails: json!({"default": {"url": format!("http://t/{id}.jpg")}}),
        duration: duration.to_string(),
        published_at: Utc.with_ymd_and_hms(2024, 6, 1, 8, minute, 0).unwrap(),
        privacy_status: "public".to_string(),
        embeddable: true,
        region_restricted: false,
        age_restricted: false,
        default_language: Some("en".to_string()),
        live_broadcast: None,
    }
}

fn zero_jitter() -> Duration {
    Duration::ZERO
}

struct Harness {
    platform: Arc<MockPlatform>,
    service: Arc<ReconcileService<MockPlatform>>,
    videos: DieselVideoRepository,
    sources: DieselSourceRepository,
    tombstones: DieselTombstoneRepository,
    index: Arc<SearchIndex>,
    synchronizer: Arc<SearchSynchronizer>,
    rx: tokio::sync::mpsc::Receiver<ChangeSet>,
    _dir: tempfile::TempDir,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let pool = create_diesel_pool(&dir.path().join("catalog.db")).expect("pool");
        init_schema(pool.clone()).await.expect("schema");

        let bus = Arc::new(ChangeBus::new());
        let rx = bus.subscribe(256);

        let videos = DieselVideoRepository::new(pool.clone(), Arc::clone(&bus));
        let sources = DieselSourceRepository::new(pool.clone());
        let categories = DieselCategoryRepository::new(pool.clone());
        let tombstones = DieselTombstoneRepository::new(pool);

        let index = Arc::new(SearchIndex::in_memory().expect("index"));
        let synchronizer = Arc::new(SearchSynchronizer::new(Arc::clone(&index)));

        let platform = MockPlatform::new();
        let enrich = Arc::new(EnrichClient::new(EnrichConfig::default()).expect("enrich"));
        let retry = RetryPolicy::new(2, Duration::ZERO).with_jitter(zero_jitter);

        let service = Arc::new(ReconcileService::new(
            Arc::clone(&platform),
            videos.clone(),
            sources.clone(),
            categories,
            tombstones.clone(),
            enrich,
            Arc::clone(&index),
            retry,
        ));

        Self {
            platform,
            service,
            videos,
            sources,
            tombstones,
            index,
            synchronizer,
            rx,
            _dir: dir,
        }
    }

    async fn register_source(&self, external_id: &str) {
        let metadata = self
            .platform
            .get_source_metadata(external_id)
            .await
            .expect("metadata");
        self.sources
            .upsert(external_id, &metadata, &json!({}))
            .await
            .expect("register source");
    }

    /// Run reconciliation, then push every committed change set through
    /// the synchronizer (one synchronization cycle).
    async fn run(&mut self) -> RunReport {
        let report = self
            .service
            .try_run()
            .await
            .expect("run")
            .expect("no overlapping run in tests");
        while let Ok(change) = self.rx.try_recv() {
            self.synchronizer.apply(&change).expect("apply change");
        }
        report
    }
}

#[tokio::test]
async fn shared_item_across_sources_yields_one_video() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.register_source("B").await;

    harness.platform.set_listing("A", &["v1", "v2", "v3"]);
    harness.platform.set_listing("B", &["v1", "v4"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness
        .platform
        .put_item(raw_item("v2", "Ocean Depths Below", "PT50M", 2));
    harness
        .platform
        .put_item(raw_item("v3", "Glacier Watch", "PT31M", 3));
    harness
        .platform
        .put_item(raw_item("v4", "Silk Road Merchants", "PT90M", 4));

    let report = harness.run().await;

    assert_eq!(report.inserted, 4);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.sources, 2);
    assert_eq!(report.complete_sources, 2);

    let all = harness.videos.get_all().await.unwrap();
    assert_eq!(all.len(), 4);
    let v1_rows: Vec<_> = all.iter().filter(|v| v.external_id == "v1").collect();
    assert_eq!(v1_rows.len(), 1);

    assert_eq!(harness.index.num_docs(), 4);
    let (ids, total) = harness.index.search("glacier", 10, 0).unwrap();
    assert_eq!(total, 1);
    let glacier = harness.videos.get(ids[0]).await.unwrap().unwrap();
    assert_eq!(glacier.external_id, "v3");
}

#[tokio::test]
async fn second_run_against_unchanged_upstream_is_a_noop() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1", "v2"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness
        .platform
        .put_item(raw_item("v2", "Ocean Depths Below", "PT50M", 2));

    let first = harness.run().await;
    assert_eq!(first.inserted, 2);

    let second = harness.run().await;
    assert_eq!(second.inserted, 0);
    assert_eq!(second.updated, 0);
    assert_eq!(second.deleted, 0);
    assert_eq!(harness.index.num_docs(), 2);
}

#[tokio::test]
async fn refresh_preserves_curated_descriptive_fields() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1"]);
    harness
        .platform
        .put_item(raw_item("v1", "Raw Upstream Name", "PT45M", 1));
    harness.run().await;

    // an operator curates the entry by hand
    let mut video = harness
        .videos
        .get_by_external_id("v1")
        .await
        .unwrap()
        .unwrap();
    video.title = "Curated Editorial Title".to_string();
    video.description = Some("Hand-written synopsis.".to_string());
    video.tags = Some("curated".to_string());
    harness.videos.update(&video).await.unwrap();

    // the next run against unchanged upstream leaves the curation alone
    let report = harness.run().await;
    assert_eq!(report.updated, 0);

    let video = harness
        .videos
        .get_by_external_id("v1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(video.title, "Curated Editorial Title");
    assert_eq!(video.description.as_deref(), Some("Hand-written synopsis."));
    assert_eq!(video.tags.as_deref(), Some("curated"));

    // the index follows the curation, not the crawl
    let (ids, _) = harness.index.search("editorial", 10, 0).unwrap();
    assert_eq!(ids, vec![video.id]);
    let (ids, _) = harness.index.search("upstream", 10, 0).unwrap();
    assert!(ids.is_empty());
}

#[tokio::test]
async fn duration_boundary_is_inclusive_at_thirty_minutes() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["short", "exact"]);
    harness
        .platform
        .put_item(raw_item("short", "One Second Shy", "PT29M59S", 1));
    harness
        .platform
        .put_item(raw_item("exact", "Exactly Half An Hour", "PT30M", 2));

    let report = harness.run().await;

    assert_eq!(report.inserted, 1);
    let stored = harness.videos.get_all().await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].external_id, "exact");
    assert_eq!(stored[0].duration_seconds, 1800);
}

#[tokio::test]
async fn incomplete_crawl_never_retires() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness.run().await;

    // upstream goes dark: listing fails, so absence proves nothing
    harness.platform.fail_listing("A", true);
    let report = harness.run().await;

    assert_eq!(report.deleted, 0);
    assert_eq!(report.complete_sources, 0);
    assert_eq!(harness.videos.get_all().await.unwrap().len(), 1);
    assert_eq!(harness.index.num_docs(), 1);
}

#[tokio::test]
async fn retirement_requires_upstream_confirmation() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1", "v2"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness
        .platform
        .put_item(raw_item("v2", "Ocean Depths Below", "PT50M", 2));
    harness.run().await;

    // both leave the listing; v1 is gone upstream, v2 merely unlisted
    harness.platform.set_listing("A", &[]);
    harness.platform.remove_item("v1");
    let report = harness.run().await;

    assert_eq!(report.deleted, 1);
    let remaining = harness.videos.get_all().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].external_id, "v2");

    // the search index followed the deletion
    let (ids, _) = harness.index.search("rome", 10, 0).unwrap();
    assert!(ids.is_empty());
    assert_eq!(harness.index.num_docs(), 1);

    // and the removal left a tombstone
    let tombstones = harness.tombstones.get_all().await.unwrap();
    assert_eq!(tombstones.len(), 1);
    assert_eq!(tombstones[0].external_id, "v1");
}

#[tokio::test]
async fn invalid_item_is_retired_with_reason() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness.run().await;

    // the video goes private and drops off the listing
    harness.platform.set_listing("A", &[]);
    let mut gone_private = raw_item("v1", "Ancient Rome Rises", "PT45M", 1);
    gone_private.privacy_status = "private".to_string();
    harness.platform.put_item(gone_private);

    let report = harness.run().await;
    assert_eq!(report.deleted, 1);

    let tombstones = harness.tombstones.get_all().await.unwrap();
    assert_eq!(tombstones[0].reason, "video is not public");
}

#[tokio::test]
async fn unreachable_platform_leaves_absent_video_alone() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness.run().await;

    // listing succeeds (and is empty) but detail fetches fail, so the
    // absent video cannot be evaluated this run
    harness.platform.set_listing("A", &[]);
    harness.platform.fail_details(true);
    let report = harness.run().await;

    assert_eq!(report.deleted, 0);
    assert_eq!(harness.videos.get_all().await.unwrap().len(), 1);
    assert!(harness.tombstones.get_all().await.unwrap().is_empty());
}

#[tokio::test]
async fn tombstone_blocks_reinsertion_until_cleared() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness.run().await;

    harness.platform.set_listing("A", &[]);
    harness.platform.remove_item("v1");
    assert_eq!(harness.run().await.deleted, 1);

    // the video reappears upstream, but the tombstone stands
    harness.platform.set_listing("A", &["v1"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    let blocked = harness.run().await;
    assert_eq!(blocked.inserted, 0);
    assert!(harness.videos.get_all().await.unwrap().is_empty());

    // an operator resubmits the id
    assert!(harness.tombstones.clear("v1").await.unwrap());
    let restored = harness.run().await;
    assert_eq!(restored.inserted, 1);
    let (ids, _) = harness.index.search("rome", 10, 0).unwrap();
    assert_eq!(ids.len(), 1);
}

#[tokio::test]
async fn concurrent_trigger_is_a_noop_while_a_run_is_in_flight() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.platform.set_listing("A", &["v1"]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));

    let entered = Arc::new(tokio::sync::Semaphore::new(0));
    let gate = Arc::new(tokio::sync::Semaphore::new(0));
    harness
        .platform
        .set_listing_gate(Arc::clone(&entered), Arc::clone(&gate));

    let service = Arc::clone(&harness.service);
    let first = tokio::spawn(async move { service.try_run().await });

    // wait until the first run is inside its listing fetch
    entered.acquire().await.unwrap().forget();
    let second = harness.service.try_run().await.unwrap();
    assert!(second.is_none());

    gate.add_permits(8);
    let report = first.await.unwrap().unwrap().unwrap();
    assert_eq!(report.inserted, 1);

    // with the first run finished, the guard is released again
    assert!(harness.run().await.inserted == 0);
}

#[tokio::test]
async fn source_reassignment_and_related_lookups_settle() {
    let mut harness = Harness::new().await;
    harness.register_source("A").await;
    harness.register_source("B").await;
    harness.platform.set_listing("A", &["v1"]);
    harness.platform.set_listing("B", &[]);
    harness
        .platform
        .put_item(raw_item("v1", "Ancient Rome Rises", "PT45M", 1));
    harness
        .platform
        .put_item(raw_item("v2", "Ancient Rome Falls", "PT60M", 2));
    harness.run().await;

    // v1 moves to source B, and a sibling title appears
    harness.platform.set_listing("A", &[]);
    harness.platform.set_listing("B", &["v1", "v2"]);
    let report = harness.run().await;

    assert_eq!(report.inserted, 1);
    assert!(report.updated >= 1);

    let v1 = harness.videos.get_by_external_id("v1").await.unwrap().unwrap();
    assert_eq!(v1.source_id.as_deref(), Some("B"));

    // a third run lets the related lookup see both titles in the index
    harness.run().await;
    let v1 = harness.videos.get_by_external_id("v1").await.unwrap().unwrap();
    let v2 = harness.videos.get_by_external_id("v2").await.unwrap().unwrap();
    assert!(v1.similar_ids.contains(&v2.id));
}
