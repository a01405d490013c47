//! Diesel ORM models for the catalog tables.
//!
//! Records mirror the TEXT-heavy SQLite layout; conversion into the domain
//! models in `crate::models` happens in the per-table repositories.

use diesel::prelude::*;

use crate::schema;

/// Video row as stored.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::videos)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct VideoRecord {
    pub id: i32,
    pub external_id: String,
    pub source_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    pub tags: Option<String>,
    pub category_id: Option<i32>,
    pub duration_seconds: i32,
    pub published_at: String,
    pub thumbnails: String,
    pub similar_ids: String,
    pub created_at: String,
    pub updated_at: String,
}

/// New video for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::videos)]
pub struct NewVideo<'a> {
    pub external_id: &'a str,
    pub source_id: Option<&'a str>,
    pub title: &'a str,
    pub description: Option<&'a str>,
    pub short_description: Option<&'a str>,
    pub tags: Option<&'a str>,
    pub category_id: Option<i32>,
    pub duration_seconds: i32,
    pub published_at: &'a str,
    pub thumbnails: &'a str,
    pub similar_ids: &'a str,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Source row as stored.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::sources)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct SourceRecord {
    pub id: i32,
    pub external_id: String,
    pub channel_id: String,
    pub title: String,
    pub thumbnails: String,
    pub channel_thumbnails: String,
    pub description: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// New source for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::sources)]
pub struct NewSource<'a> {
    pub external_id: &'a str,
    pub channel_id: &'a str,
    pub title: &'a str,
    pub thumbnails: &'a str,
    pub channel_thumbnails: &'a str,
    pub description: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Category row as stored.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::categories)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct CategoryRecord {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

/// New category for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::categories)]
pub struct NewCategory<'a> {
    pub name: &'a str,
    pub slug: &'a str,
}

/// Tombstone row as stored.
#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = schema::tombstones)]
#[diesel(primary_key(external_id))]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TombstoneRecord {
    pub external_id: String,
    pub reason: String,
    pub created_at: String,
}

/// New tombstone for insertion.
#[derive(Insertable, Debug)]
#[diesel(table_name = schema::tombstones)]
pub struct NewTombstone<'a> {
    pub external_id: &'a str,
    pub reason: &'a str,
    pub created_at: &'a str,
}
