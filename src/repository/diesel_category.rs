//! Diesel-based category repository for SQLite.

use diesel::prelude::*;

use super::diesel_models::{CategoryRecord, NewCategory};
use super::diesel_pool::{run_blocking, DieselError, SqlitePool};
use crate::models::{slugify, Category};
use crate::schema::categories;

impl From<CategoryRecord> for Category {
    fn from(record: CategoryRecord) -> Self {
        Category {
            id: record.id,
            name: record.name,
            slug: record.slug,
        }
    }
}

/// Diesel-based category repository with compile-time query checking.
#[derive(Clone)]
pub struct DieselCategoryRepository {
    pool: SqlitePool,
}

impl DieselCategoryRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn get_all(&self) -> Result<Vec<Category>, DieselError> {
        let pool = self.pool.clone();
        run_blocking(pool, move |conn| {
            categories::table
                .order(categories::name.asc())
                .load::<CategoryRecord>(conn)
        })
        .await
        .map(|records| records.into_iter().map(Category::from).collect())
    }

    /// Look up a category by name, ignoring case.
    pub async fn find_by_name(&self, name: &str) -> Result<Option<Category>, DieselError> {
        let slug = slugify(name);
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            categories::table
                .filter(categories::slug.eq(&slug))
                .first::<CategoryRecord>(conn)
                .optional()
        })
        .await
        .map(|opt| opt.map(Category::from))
    }

    /// Get or create a category with the given display name.
    pub async fn ensure(&self, name: &str) -> Result<Category, DieselError> {
        let name = name.trim().to_string();
        let slug = slugify(&name);
        let pool = self.pool.clone();

        run_blocking(pool, move |conn| {
            conn.transaction(|conn| {
                if let Some(existing) = categories::table
                    .filter(categories::slug.eq(&slug))
                    .first::<CategoryRecord>(conn)
                    .optional()?
                {
                    return Ok(existing);
                }
                diesel::insert_into(categories::table)
                    .values(NewCategory {
                        name: &name,
                        slug: &slug,
                    })
                    .execute(conn)?;
                categories::table
                    .filter(categories::slug.eq(&slug))
                    .first::<CategoryRecord>(conn)
            })
        })
        .await
        .map(Category::from)
    }
}
