//! Diesel-based source repository for SQLite.

use chrono::Utc;
use diesel::prelude::*;

use super::diesel_models::{NewSource, SourceRecord};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::parse_datetime;
use crate::models::Source;
use crate::platform::SourceMetadata;
use crate::schema::sources;

impl From<SourceRecord> for Source {
    fn from(record: SourceRecord) -> Self {
        Source {
            id: record.id,
            external_id: record.external_id,
            channel_id: record.channel_id,
            title: record.title,
            thumbnails: serde_json::from_str(&record.thumbnails).unwrap_or_default(),
            channel_thumbnails: serde_json::from_str(&record.channel_thumbnails)
                .unwrap_or_default(),
            description: record.description,
            created_at: parse_datetime(&record.created_at),
            updated_at: parse_datetime(&record.updated_at),
        }
    }
}

/// Diesel-based source repository with compile-time query checking.
#[derive(Clone)]
pub struct DieselSourceRepository {
    pool: SqlitePool,
}

impl DieselSourceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_by_external_id(
        &self,
        external_id: &str,
    ) -> Result<Option<Source>, DieselError> {
        let external_id = external_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            sources::table
                .filter(sources::external_id.eq(&external_id))
                .first::<SourceRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Source::from))
    }

    pub async fn get_all(&self) -> Result<Vec<Source>, DieselError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| sources::table.load::<SourceRecord>(conn))
            .await
            .map(|records| records.into_iter().map(Source::from).collect())
    }

    /// Insert a source or refresh its metadata in place, keyed by external
    /// id.
    pub async fn upsert(
        &self,
        external_id: &str,
        metadata: &SourceMetadata,
        channel_thumbnails: &serde_json::Value,
    ) -> Result<Source, DieselError> {
        let external_id = external_id.to_string();
        let metadata = metadata.clone();
        let channel_thumbnails =
            serde_json::to_string(channel_thumbnails).unwrap_or_else(|_| "{}".to_string());
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let now = Utc::now().to_rfc3339();
            let thumbnails =
                serde_json::to_string(&metadata.thumbnails).unwrap_or_else(|_| "{}".to_string());

            conn.transaction(|conn| {
                let existing = sources::table
                    .filter(sources::external_id.eq(&external_id))
                    .first::<SourceRecord>(conn)
                    .optional()?;

                match existing {
                    Some(record) => {
                        diesel::update(sources::table.find(record.id))
                            .set((
                                sources::channel_id.eq(&metadata.channel_id),
                                sources::title.eq(&metadata.title),
                                sources::thumbnails.eq(&thumbnails),
                                sources::channel_thumbnails.eq(&channel_thumbnails),
                                sources::description.eq(metadata.description.as_deref()),
                                sources::updated_at.eq(&now),
                            ))
                            .execute(conn)?;
                    }
                    None => {
                        diesel::insert_into(sources::table)
                            .values(NewSource {
                                external_id: &external_id,
                                channel_id: &metadata.channel_id,
                                title: &metadata.title,
                                thumbnails: &thumbnails,
                                channel_thumbnails: &channel_thumbnails,
                                description: metadata.description.as_deref(),
                                created_at: &now,
                                updated_at: &now,
                            })
                            .execute(conn)?;
                    }
                }

                sources::table
                    .filter(sources::external_id.eq(&external_id))
                    .first::<SourceRecord>(conn)
            })
        })
        .await
        .map(Source::from)
    }

    pub async fn remove(&self, external_id: &str) -> Result<bool, DieselError> {
        let external_id = external_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            diesel::delete(sources::table.filter(sources::external_id.eq(&external_id)))
                .execute(conn)
        })
        .await
        .map(|n| n > 0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::repository::{create_diesel_pool, init_schema};

    async fn repo() -> (DieselSourceRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_diesel_pool(&dir.path().join("catalog.db")).unwrap();
        init_schema(pool.clone()).await.unwrap();
        (DieselSourceRepository::new(pool), dir)
    }

    fn metadata(title: &str) -> SourceMetadata {
        SourceMetadata {
            channel_id: "UCchan".to_string(),
            title: title.to_string(),
            thumbnails: json!({}),
            description: Some("Curated films".to_string()),
        }
    }

    #[tokio::test]
    async fn test_upsert_inserts_then_refreshes() {
        let (repo, _dir) = repo().await;

        let created = repo
            .upsert("PLone", &metadata("Old Title"), &json!({}))
            .await
            .unwrap();
        let refreshed = repo
            .upsert("PLone", &metadata("New Title"), &json!({}))
            .await
            .unwrap();

        assert_eq!(created.id, refreshed.id);
        assert_eq!(refreshed.title, "New Title");
        assert_eq!(repo.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_remove() {
        let (repo, _dir) = repo().await;
        repo.upsert("PLone", &metadata("T"), &json!({})).await.unwrap();

        assert!(repo.remove("PLone").await.unwrap());
        assert!(!repo.remove("PLone").await.unwrap());
        assert!(repo.get_by_external_id("PLone").await.unwrap().is_none());
    }
}
