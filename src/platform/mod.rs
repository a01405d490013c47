//! Video-hosting platform API boundary.
//!
//! The pipeline only reads from the platform. `VideoPlatform` is the seam
//! the reconciliation engine and crawler are written against; the real
//! implementation lives in `youtube`, tests substitute their own.

mod crawler;
mod retry;
pub mod youtube;

pub use crawler::{CrawlOutcome, SourceCrawler};
pub use retry::{RetriesExhausted, RetryPolicy};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;
use url::Url;

/// Maximum number of ids per detail batch, imposed by the platform.
pub const DETAIL_BATCH_SIZE: usize = 50;

/// Errors from the platform API.
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("connection error: {0}")]
    Connection(String),
    #[error("API returned HTTP {status}: {body}")]
    Api { status: u16, body: String },
    #[error("failed to parse response: {0}")]
    Parse(String),
    #[error("no such source: {0}")]
    SourceNotFound(String),
    #[error("no such channel: {0}")]
    ChannelNotFound(String),
}

/// One page of a source's item listing.
#[derive(Debug, Clone, Default)]
pub struct ListingPage {
    pub video_ids: Vec<String>,
    /// Opaque continuation token; `None` means the listing is exhausted.
    pub next_page_token: Option<String>,
}

/// A raw item as delivered by the platform, before validation.
#[derive(Debug, Clone)]
pub struct RawItem {
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub tags: Vec<String>,
    pub thumbnails: Value,
    /// ISO-8601 duration, e.g. "PT1H30M5S".
    pub duration: String,
    pub published_at: DateTime<Utc>,
    pub privacy_status: String,
    pub embeddable: bool,
    pub region_restricted: bool,
    pub age_restricted: bool,
    pub default_language: Option<String>,
    pub live_broadcast: Option<String>,
}

/// Metadata about a source (a curated listing).
#[derive(Debug, Clone)]
pub struct SourceMetadata {
    pub channel_id: String,
    pub title: String,
    pub thumbnails: Value,
    pub description: Option<String>,
}

/// Metadata about the channel owning a source.
#[derive(Debug, Clone)]
pub struct ChannelMetadata {
    pub title: String,
    pub thumbnails: Value,
    pub description: Option<String>,
}

/// Read-only client for the video-hosting platform.
#[async_trait]
pub trait VideoPlatform: Send + Sync {
    /// Fetch one page of a source's item listing.
    async fn list_page(
        &self,
        source_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, PlatformError>;

    /// Fetch item details for up to [`DETAIL_BATCH_SIZE`] ids. Unknown ids
    /// are simply absent from the result.
    async fn get_items(&self, ids: &[String]) -> Result<Vec<RawItem>, PlatformError>;

    /// Fetch metadata for a source.
    async fn get_source_metadata(&self, source_id: &str) -> Result<SourceMetadata, PlatformError>;

    /// Fetch metadata for a channel.
    async fn get_channel_metadata(
        &self,
        channel_id: &str,
    ) -> Result<ChannelMetadata, PlatformError>;
}

/// Extract a source id from a platform listing URL, for the CLI
/// `source add` path.
pub fn parse_source_url(input: &str) -> Option<String> {
    // a bare id is accepted as-is
    if !input.contains("://") && !input.contains('/') {
        return Some(input.to_string());
    }

    let parsed = Url::parse(input).ok()?;
    let host = parsed.host_str()?;
    let known_hosts = ["www.youtube.com", "youtube.com", "m.youtube.com", "youtu.be"];
    if !known_hosts.contains(&host) {
        return None;
    }
    parsed
        .query_pairs()
        .find(|(k, _)| k == "list")
        .map(|(_, v)| v.into_owned())
}
