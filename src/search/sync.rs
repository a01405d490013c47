//! Keeps the search index following the catalog database.
//!
//! A follower task drains committed [`ChangeSet`]s from the change bus and
//! applies them to the index in commit order. Index trouble never
//! propagates back into catalog writes; a full [`reindex`] recovers from
//! any drift.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::SearchIndex;
use crate::error::Result;
use crate::repository::{ChangeSet, DieselVideoRepository, SearchDoc};

/// Applies catalog changes to the search index.
pub struct SearchSynchronizer {
    index: Arc<SearchIndex>,
    reindexing: AtomicBool,
}

impl SearchSynchronizer {
    pub fn new(index: Arc<SearchIndex>) -> Self {
        Self {
            index,
            reindexing: AtomicBool::new(false),
        }
    }

    pub fn index(&self) -> &Arc<SearchIndex> {
        &self.index
    }

    /// Apply one committed change set and commit the index.
    pub fn apply(&self, change: &ChangeSet) -> Result<()> {
        for doc in change.added.iter().chain(&change.updated) {
            self.index.add_or_update(doc)?;
        }
        for &id in &change.deleted {
            self.index.remove(id);
        }
        self.index.commit()?;
        debug!(
            added = change.added.len(),
            updated = change.updated.len(),
            deleted = change.deleted.len(),
            "index change set applied"
        );
        Ok(())
    }

    /// Spawn the follower task. It runs until every sender on the bus is
    /// dropped. Apply failures are logged and skipped; the index catches
    /// up on the next reindex.
    pub fn spawn_follower(
        self: &Arc<Self>,
        mut rx: mpsc::Receiver<ChangeSet>,
    ) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                if let Err(err) = this.apply(&change) {
                    error!(error = %err, "failed to apply change set to index");
                }
            }
            debug!("change bus closed, index follower exiting");
        })
    }

    /// Rebuild the whole index from the database.
    ///
    /// Returns `Ok(None)` when a rebuild is already in flight.
    pub async fn reindex(&self, videos: &DieselVideoRepository) -> Result<Option<usize>> {
        if self
            .reindexing
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            info!("reindex already running, skipping");
            return Ok(None);
        }

        let result = self.reindex_inner(videos).await;
        self.reindexing.store(false, Ordering::SeqCst);
        result.map(Some)
    }

    async fn reindex_inner(&self, videos: &DieselVideoRepository) -> Result<usize> {
        let all = videos.get_all().await?;
        self.index.clear()?;
        for video in &all {
            self.index.add_or_update(&SearchDoc {
                id: video.id,
                external_id: video.external_id.clone(),
                title: video.title.clone(),
                description: video.description.clone(),
                tags: video.tags.clone(),
            })?;
        }
        self.index.commit()?;
        info!(count = all.len(), "search index rebuilt");
        Ok(all.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::ChangeBus;

    fn doc(id: i32, title: &str) -> SearchDoc {
        SearchDoc {
            id,
            external_id: format!("ext{id}"),
            title: title.to_string(),
            description: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_follower_applies_changes_in_order() {
        let index = Arc::new(SearchIndex::in_memory().unwrap());
        let synchronizer = Arc::new(SearchSynchronizer::new(Arc::clone(&index)));

        let bus = ChangeBus::new();
        let rx = bus.subscribe(16);
        let handle = synchronizer.spawn_follower(rx);

        bus.publish(ChangeSet {
            added: vec![doc(1, "Chernobyl Revisited")],
            ..Default::default()
        });
        bus.publish(ChangeSet {
            updated: vec![doc(1, "Chernobyl in Winter")],
            ..Default::default()
        });
        drop(bus);
        handle.await.unwrap();

        let (ids, total) = index.search("winter", 10, 0).unwrap();
        assert_eq!(ids, vec![1]);
        assert_eq!(total, 1);
        let (ids, _) = index.search("revisited", 10, 0).unwrap();
        assert!(ids.is_empty());
    }

    #[tokio::test]
    async fn test_close_drains_queued_changes_before_the_follower_exits() {
        let index = Arc::new(SearchIndex::in_memory().unwrap());
        let synchronizer = Arc::new(SearchSynchronizer::new(Arc::clone(&index)));

        let bus = Arc::new(ChangeBus::new());
        let rx = bus.subscribe(16);
        let handle = synchronizer.spawn_follower(rx);

        bus.publish(ChangeSet {
            added: vec![doc(1, "Steel Cathedrals")],
            ..Default::default()
        });
        bus.publish(ChangeSet {
            added: vec![doc(2, "River Cartographers")],
            ..Default::default()
        });

        // repositories still hold the bus handle; close alone must end the
        // stream without losing what is already queued
        let _still_held = Arc::clone(&bus);
        bus.close();
        handle.await.unwrap();

        assert_eq!(index.num_docs(), 2);
    }

    #[tokio::test]
    async fn test_follower_handles_deletes() {
        let index = Arc::new(SearchIndex::in_memory().unwrap());
        let synchronizer = Arc::new(SearchSynchronizer::new(Arc::clone(&index)));

        let bus = ChangeBus::new();
        let rx = bus.subscribe(16);
        let handle = synchronizer.spawn_follower(rx);

        bus.publish(ChangeSet {
            added: vec![doc(5, "Vanishing Glaciers")],
            ..Default::default()
        });
        bus.publish(ChangeSet {
            deleted: vec![5],
            ..Default::default()
        });
        drop(bus);
        handle.await.unwrap();

        assert_eq!(index.num_docs(), 0);
    }
}
