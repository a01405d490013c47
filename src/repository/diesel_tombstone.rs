//! Diesel-based tombstone repository for SQLite.
//!
//! A tombstone marks an external id as deliberately removed. The
//! reconciliation engine consults the full set before inserting anything.

use std::collections::HashSet;

use chrono::Utc;
use diesel::prelude::*;

use super::diesel_models::{NewTombstone, TombstoneRecord};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use super::parse_datetime;
use crate::models::Tombstone;
use crate::schema::tombstones;

impl From<TombstoneRecord> for Tombstone {
    fn from(record: TombstoneRecord) -> Self {
        Tombstone {
            external_id: record.external_id,
            reason: record.reason,
            created_at: parse_datetime(&record.created_at),
        }
    }
}

/// Diesel-based tombstone repository.
#[derive(Clone)]
pub struct DieselTombstoneRepository {
    pool: SqlitePool,
}

impl DieselTombstoneRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a removal. Re-recording the same id keeps the original row.
    pub async fn add(&self, external_id: &str, reason: &str) -> Result<(), DieselError> {
        let external_id = external_id.to_string();
        let reason = reason.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            let now = Utc::now().to_rfc3339();
            diesel::insert_into(tombstones::table)
                .values(NewTombstone {
                    external_id: &external_id,
                    reason: &reason,
                    created_at: &now,
                })
                .on_conflict(tombstones::external_id)
                .do_nothing()
                .execute(conn)?;
            Ok(())
        })
        .await
    }

    /// Every tombstoned external id, for fast membership checks.
    pub async fn all_ids(&self) -> Result<HashSet<String>, DieselError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            tombstones::table
                .select(tombstones::external_id)
                .load::<String>(conn)
        })
        .await
        .map(|ids| ids.into_iter().collect())
    }

    pub async fn get_all(&self) -> Result<Vec<Tombstone>, DieselError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            tombstones::table.load::<TombstoneRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Tombstone::from).collect())
    }

    /// Remove a tombstone, making the id eligible again. Operator action
    /// only.
    pub async fn clear(&self, external_id: &str) -> Result<bool, DieselError> {
        let external_id = external_id.to_string();
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            diesel::delete(tombstones::table.find(&external_id)).execute(conn)
        })
        .await
        .map(|n| n > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::{create_diesel_pool, init_schema};

    #[tokio::test]
    async fn test_add_is_idempotent_and_clear_removes() {
        let dir = tempfile::tempdir().unwrap();
        let pool = create_diesel_pool(&dir.path().join("catalog.db")).unwrap();
        init_schema(pool.clone()).await.unwrap();
        let repo = DieselTombstoneRepository::new(pool);

        repo.add("gone1", "video is not public").await.unwrap();
        repo.add("gone1", "different reason later").await.unwrap();

        let all = repo.get_all().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].reason, "video is not public");

        assert!(repo.all_ids().await.unwrap().contains("gone1"));
        assert!(repo.clear("gone1").await.unwrap());
        assert!(!repo.clear("gone1").await.unwrap());
        assert!(repo.all_ids().await.unwrap().is_empty());
    }
}
