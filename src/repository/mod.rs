//! Database access layer.
//!
//! Async repositories over sync Diesel + SQLite, one per table, sharing an
//! r2d2 pool. Timestamps are stored as RFC 3339 TEXT. The video repository
//! additionally publishes post-commit change sets on a [`ChangeBus`] so the
//! search index can follow the database without the writers knowing about
//! it.

mod diesel_category;
mod diesel_models;
mod diesel_pool;
mod diesel_source;
mod diesel_tombstone;
mod diesel_video;

pub use diesel_category::DieselCategoryRepository;
pub use diesel_models::{
    CategoryRecord, NewVideo, SourceRecord, TombstoneRecord, VideoRecord,
};
pub use diesel_pool::{create_diesel_pool, run_blocking, DieselError, PooledConn, SqlitePool};
pub use diesel_source::DieselSourceRepository;
pub use diesel_tombstone::DieselTombstoneRepository;
pub use diesel_video::{DieselVideoRepository, VideoDraft};

use std::sync::Mutex;

use chrono::{DateTime, Utc};
use diesel::prelude::*;
use tokio::sync::mpsc;
use tracing::warn;

/// Parse an RFC 3339 TEXT column, falling back to the epoch on garbage.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| DateTime::<Utc>::UNIX_EPOCH)
}

/// Create all tables if they do not exist yet.
pub async fn init_schema(pool: SqlitePool) -> Result<(), DieselError> {
    run_blocking(pool, |conn| {
        diesel::sql_query(
            "CREATE TABLE IF NOT EXISTS videos (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                source_id TEXT,
                title TEXT NOT NULL,
                description TEXT,
                short_description TEXT,
                tags TEXT,
                category_id INTEGER REFERENCES categories(id),
                duration_seconds INTEGER NOT NULL,
                published_at TEXT NOT NULL,
                thumbnails TEXT NOT NULL,
                similar_ids TEXT NOT NULL DEFAULT '[]',
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(conn)?;
        diesel::sql_query(
            "CREATE INDEX IF NOT EXISTS idx_videos_source ON videos(source_id)",
        )
        .execute(conn)?;
        diesel::sql_query(
            "CREATE TABLE IF NOT EXISTS sources (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                external_id TEXT NOT NULL UNIQUE,
                channel_id TEXT NOT NULL,
                title TEXT NOT NULL,
                thumbnails TEXT NOT NULL,
                channel_thumbnails TEXT NOT NULL,
                description TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
        )
        .execute(conn)?;
        diesel::sql_query(
            "CREATE TABLE IF NOT EXISTS categories (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL UNIQUE,
                slug TEXT NOT NULL UNIQUE
            )",
        )
        .execute(conn)?;
        diesel::sql_query(
            "CREATE TABLE IF NOT EXISTS tombstones (
                external_id TEXT PRIMARY KEY,
                reason TEXT NOT NULL,
                created_at TEXT NOT NULL
            )",
        )
        .execute(conn)?;
        Ok(())
    })
    .await
}

/// Searchable projection of a video, as published on the change bus and
/// stored in the index.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchDoc {
    pub id: i32,
    pub external_id: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: Option<String>,
}

/// One committed batch of catalog changes, in commit order.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub added: Vec<SearchDoc>,
    pub updated: Vec<SearchDoc>,
    pub deleted: Vec<i32>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.updated.is_empty() && self.deleted.is_empty()
    }
}

/// Fan-out of committed changes to interested subscribers.
///
/// Publishing never blocks a writer: a subscriber whose channel is full
/// loses the change set and has to be caught up by a full reindex.
#[derive(Default)]
pub struct ChangeBus {
    subscribers: Mutex<Vec<mpsc::Sender<ChangeSet>>>,
}

impl ChangeBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, capacity: usize) -> mpsc::Receiver<ChangeSet> {
        let (tx, rx) = mpsc::channel(capacity);
        self.subscribers.lock().unwrap().push(tx);
        rx
    }

    /// Drop every subscriber sender. Receivers drain whatever is already
    /// buffered and then see the channel as closed, which lets a one-shot
    /// process wait for its followers instead of abandoning queued changes.
    pub fn close(&self) {
        self.subscribers.lock().unwrap().clear();
    }

    pub fn publish(&self, change: ChangeSet) {
        if change.is_empty() {
            return;
        }
        let mut subscribers = self.subscribers.lock().unwrap();
        subscribers.retain(|tx| match tx.try_send(change.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("change subscriber lagging, dropping change set");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: i32) -> SearchDoc {
        SearchDoc {
            id,
            external_id: format!("ext{id}"),
            title: "T".to_string(),
            description: None,
            tags: None,
        }
    }

    #[tokio::test]
    async fn test_change_bus_delivers_in_order() {
        let bus = ChangeBus::new();
        let mut rx = bus.subscribe(8);

        bus.publish(ChangeSet {
            added: vec![doc(1)],
            ..Default::default()
        });
        bus.publish(ChangeSet {
            deleted: vec![1],
            ..Default::default()
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.added[0].id, 1);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.deleted, vec![1]);
    }

    #[tokio::test]
    async fn test_change_bus_skips_empty_sets_and_dead_subscribers() {
        let bus = ChangeBus::new();
        let rx = bus.subscribe(1);
        drop(rx);

        bus.publish(ChangeSet::default());
        bus.publish(ChangeSet {
            deleted: vec![7],
            ..Default::default()
        });
        assert!(bus.subscribers.lock().unwrap().is_empty());
    }

    #[test]
    fn test_parse_datetime_falls_back_to_epoch() {
        assert_eq!(parse_datetime("not a date"), DateTime::<Utc>::UNIX_EPOCH);
        let parsed = parse_datetime("2024-03-01T12:00:00+00:00");
        assert_eq!(parsed.timestamp(), 1709294400);
    }
}
