//! Domain models for the catalog.
//!
//! These are the types the pipeline passes around; database records live in
//! `repository::diesel_models` and convert into these.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A catalogued video.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Video {
    pub id: i32,
    /// Platform-assigned id, unique across the catalog.
    pub external_id: String,
    /// Owning source; `None` for an orphan whose source was removed.
    pub source_id: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub short_description: Option<String>,
    /// Space-joined normalized tag tokens.
    pub tags: Option<String>,
    pub category_id: Option<i32>,
    pub duration_seconds: i32,
    pub published_at: DateTime<Utc>,
    pub thumbnails: Value,
    /// Catalog ids of related videos, ranked by relevance.
    pub similar_ids: Vec<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A curated source (a platform playlist) the pipeline crawls.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Source {
    pub id: i32,
    /// Platform playlist id.
    pub external_id: String,
    /// Owning channel on the platform.
    pub channel_id: String,
    pub title: String,
    pub thumbnails: Value,
    pub channel_thumbnails: Value,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An editorial category videos are filed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: i32,
    pub name: String,
    pub slug: String,
}

/// A record that a video was deliberately removed. Its presence blocks
/// re-insertion of the same external id forever.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tombstone {
    pub external_id: String,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

/// URL-safe slug: lowercase alphanumerics with single dashes.
pub fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_dash = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    while slug.ends_with('-') {
        slug.pop();
    }
    slug
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Ancient History"), "ancient-history");
        assert_eq!(slugify("War & Conflict"), "war-conflict");
        assert_eq!(slugify("  Science!  "), "science");
        assert_eq!(slugify("CRIME"), "crime");
    }
}
