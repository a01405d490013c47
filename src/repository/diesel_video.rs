//! Diesel-based video repository for SQLite.
//!
//! All mutations run inside per-call transactions. After a successful
//! commit the repository publishes the change on the shared [`ChangeBus`];
//! updates that leave the searchable fields (title, description, tags)
//! untouched are not published.

use std::sync::Arc;

use chrono::Utc;
use diesel::prelude::*;

use super::diesel_models::{NewVideo, VideoRecord};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::{parse_datetime, ChangeBus, ChangeSet, SearchDoc};
use crate::models::Video;
use crate::schema::videos;

impl From<VideoRecord> for Video {
    fn from(record: VideoRecord) -> Self {
        Video {
            id: record.id,
            external_id: record.external_id,
            source_id: record.source_id,
            title: record.title,
            description: record.description,
            short_description: record.short_description,
            tags: record.tags,
            category_id: record.category_id,
            duration_seconds: record.duration_seconds,
            published_at: parse_datetime(&record.published_at),
            thumbnails: serde_json::from_str(&record.thumbnails).unwrap_or_default(),
            similar_ids: serde_json::from_str(&record.similar_ids).unwrap_or_default(),
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Fields of a video that are set on first insertion.
#[derive(Debug, Clone)]
pub struct VideoDraft {
    pub external_id: String,
    pub source_id: String,
    pub title: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub tags: Option<String>,
    pub category_id: Option<i32>,
    pub duration_seconds: i32,
    pub published_at: chrono::DateTime<Utc>,
    pub thumbnails: serde_json::Value,
}

fn search_doc(video: &Video) -> SearchDoc {
    SearchDoc {
        id: video.id,
        external_id: video.external_id.clone(),
        title: video.title.clone(),
        description: video.description.clone(),
        tags: video.tags.clone(),
    }
}

/// Diesel-based video repository with compile-time query checking.
#[derive(Clone)]
pub struct DieselVideoRepository {
    pool: SqlitePool,
    bus: Arc<ChangeBus>,
}

impl DieselVideoRepository {
    pub fn new(pool: SqlitePool, bus: Arc<ChangeBus>) -> Self {
        Self { pool, bus }
    }

    /// Insert a new video and publish it as added.
    ///
    /// A unique-constraint violation on `external_id` is returned to the
    /// caller undisturbed; nothing is published in that case.
    pub async fn insert(&self, draft: VideoDraft) -> Result<Video, DieselError> {
        let pool = self.pool.clone();
        let record = run_blocking(pool, move |conn| {
            let now = Utc::now().to_rfc3339();
            let thumbnails =
                serde_json::to_string(&draft.thumbnails).unwrap_or_else(|_| "{}".to_string());
            let published_at = draft.published_at.to_rfc3339();

            conn.transaction(|conn| {
                diesel::insert_into(videos::table)
                    .values(NewVideo {
                        external_id: &draft.external_id,
                        source_id: Some(&draft.source_id),
                        title: &draft.title,
                        description: draft.description.as_deref(),
                        short_description: draft.short_description.as_deref(),
                        tags: draft.tags.as_deref(),
                        category_id: draft.category_id,
                        duration_seconds: draft.duration_seconds,
                        published_at: &published_at,
                        thumbnails: &thumbnails,
                        similar_ids: "[]",
                        created_at: &now,
                        updated_at: &now,
                    })
                    .execute(conn)?;

                videos::table
                    .filter(videos::external_id.eq(&draft.external_id))
                    .first::<VideoRecord>(conn)
            })
        })
        .await?;

        let video = Video::from(record);
        self.bus.publish(ChangeSet {
            added: vec![search_doc(&video)],
            ..Default::default()
        });
        Ok(video)
    }

    /// Persist the mutable fields of `video` and publish an update if any
    /// searchable field actually changed.
    pub async fn update(&self, video: &Video) -> Result<(), DieselError> {
        let pool = self.pool.clone();
        let video = video.clone();
        let updated = video.clone();

        let search_changed = run_blocking(pool, move |conn| {
            let now = Utc::now().to_rfc3339();
            let thumbnails =
                serde_json::to_string(&video.thumbnails).unwrap_or_else(|_| "{}".to_string());
            let similar_ids =
                serde_json::to_string(&video.similar_ids).unwrap_or_else(|_| "[]".to_string());

            conn.transaction(|conn| {
                let before = videos::table.find(video.id).first::<VideoRecord>(conn)?;

                diesel::update(videos::table.find(video.id))
                    .set((
                        videos::source_id.eq(video.source_id.as_deref()),
                        videos::title.eq(&video.title),
                        videos::description.eq(video.description.as_deref()),
                        videos::short_description.eq(video.short_description.as_deref()),
                        videos::tags.eq(video.tags.as_deref()),
                        videos::category_id.eq(video.category_id),
                        videos::thumbnails.eq(&thumbnails),
                        videos::similar_ids.eq(&similar_ids),
                        videos::updated_at.eq(&now),
                    ))
                    .execute(conn)?;

                Ok(before.title != video.title
                    || before.description != video.description
                    || before.tags != video.tags)
            })
        })
        .await?;

        if search_changed {
            self.bus.publish(ChangeSet {
                updated: vec![search_doc(&updated)],
                ..Default::default()
            });
        }
        Ok(())
    }

    /// Delete a video and publish the deletion.
    pub async fn delete(&self, id: i32) -> Result<(), DieselError> {
        let pool = self.pool.clone();
        let removed = run_blocking(pool, move |conn| {
            diesel::delete(videos::table.find(id)).execute(conn)
        })
        .await?;

        if removed > 0 {
            self.bus.publish(ChangeSet {
                deleted: vec![id],
                ..Default::default()
            });
        }
        Ok(())
    }

    pub async fn get(&self, id: i32) -> Result<Option<Video>, DieselError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            videos::table.find(id).first::<VideoRecord>(conn).optional()
        })
        .await
        .map(|opt| opt.map(Video::from))
    }

    pub async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Video>, DieselError> {
        let external_id = external_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            videos::table
                .filter(videos::external_id.eq(&external_id))
                .first::<VideoRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Video::from))
    }

    /// All videos attributed to one source.
    pub async fn get_by_source(&self, source_id: &str) -> Result<Vec<Video>, DieselError> {
        let source_id = source_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            videos::table
                .filter(videos::source_id.eq(&source_id))
                .load::<VideoRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Video::from).collect())
    }

    /// Videos whose source is gone or was never set.
    pub async fn get_orphans(&self, known_sources: &[String]) -> Result<Vec<Video>, DieselError> {
        let known = known_sources.to_vec();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            videos::table
                .filter(
                    videos::source_id
                        .is_null()
                        .or(videos::source_id.ne_all(&known)),
                )
                .load::<VideoRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Video::from).collect())
    }

    pub async fn get_all(&self) -> Result<Vec<Video>, DieselError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| videos::table.load::<VideoRecord>(conn))
            .await
            .map(|records| records.into_iter().map(Video::from).collect())
    }

    pub async fn count(&self) -> Result<i64, DieselError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| videos::table.count().get_result(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;
    use crate::repository::{create_diesel_pool, init_schema};

    async fn repo_with_bus() -> (DieselVideoRepository, tokio::sync::mpsc::Receiver<ChangeSet>, tempfile::TempDir)
    {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_diesel_pool(&dir.path().join("catalog.db")).unwrap();
        init_schema(pool.clone()).await.unwrap();
        let bus = Arc::new(ChangeBus::new());
        let rx = bus.subscribe(16);
        (DieselVideoRepository::new(pool, bus), rx, dir)
    }

    fn draft(external_id: &str) -> VideoDraft {
        VideoDraft {
            external_id: external_id.to_string(),
            source_id: "PLsrc".to_string(),
            title: "The Roman Empire".to_string(),
            description: Some("A film about Rome.".to_string()),
            short_description: None,
            tags: Some("rome history".to_string()),
            category_id: None,
            duration_seconds: 2700,
            published_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            thumbnails: json!({"default": {"url": "http://t/1.jpg"}}),
        }
    }

    #[tokio::test]
    async fn test_insert_get_and_change_emission() {
        let (repo, mut rx, _dir) = repo_with_bus().await;

        let video = repo.insert(draft("abc123")).await.unwrap();
        assert!(video.id > 0);

        let fetched = repo.get_by_external_id("abc123").await.unwrap().unwrap();
        assert_eq!(fetched.title, "The Roman Empire");
        assert_eq!(fetched.source_id.as_deref(), Some("PLsrc"));

        let change = rx.try_recv().unwrap();
        assert_eq!(change.added.len(), 1);
        assert_eq!(change.added[0].external_id, "abc123");
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_unique_violation() {
        let (repo, _rx, _dir) = repo_with_bus().await;

        repo.insert(draft("dup")).await.unwrap();
        let err = repo.insert(draft("dup")).await.unwrap_err();
        assert!(matches!(
            err,
            DieselError::DatabaseError(diesel::result::DatabaseErrorKind::UniqueViolation, _)
        ));
    }

    #[tokio::test]
    async fn test_update_publishes_only_searchable_changes() {
        let (repo, mut rx, _dir) = repo_with_bus().await;
        let mut video = repo.insert(draft("v1")).await.unwrap();
        rx.try_recv().unwrap();

        // similar_ids alone is not a searchable field
        video.similar_ids = vec![42];
        repo.update(&video).await.unwrap();
        assert!(rx.try_recv().is_err());

        video.title = "The Roman Republic".to_string();
        repo.update(&video).await.unwrap();
        let change = rx.try_recv().unwrap();
        assert_eq!(change.updated[0].title, "The Roman Republic");

        let fetched = repo.get(video.id).await.unwrap().unwrap();
        assert_eq!(fetched.similar_ids, vec![42]);
    }

    #[tokio::test]
    async fn test_delete_and_orphans() {
        let (repo, mut rx, _dir) = repo_with_bus().await;
        let kept = repo.insert(draft("keep")).await.unwrap();
        let mut gone_draft = draft("gone");
        gone_draft.source_id = "PLother".to_string();
        let gone = repo.insert(gone_draft).await.unwrap();
        while rx.try_recv().is_ok() {}

        let orphans = repo
            .get_orphans(&["PLsrc".to_string()])
            .await
            .unwrap();
        assert_eq!(orphans.len(), 1);
        assert_eq!(orphans[0].id, gone.id);

        repo.delete(gone.id).await.unwrap();
        assert_eq!(rx.try_recv().unwrap().deleted, vec![gone.id]);
        assert!(repo.get(gone.id).await.unwrap().is_none());
        assert!(repo.get(kept.id).await.unwrap().is_some());

        // deleting a missing row publishes nothing
        repo.delete(gone.id).await.unwrap();
        assert!(rx.try_recv().is_err());
    }
}
