//! YouTube Data API v3 client.
//!
//! Implements [`VideoPlatform`] over the REST endpoints the pipeline needs:
//! playlist item listings, batched video details, and playlist/channel
//! metadata. The pipeline never writes upstream.

use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use super::{
    ChannelMetadata, ListingPage, PlatformError, RawItem, SourceMetadata, VideoPlatform,
    DETAIL_BATCH_SIZE,
};

const DEFAULT_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3";

/// Configuration for the platform client.
#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub api_key: String,
    /// API base URL; overridable for local stand-ins.
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl YouTubeConfig {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            endpoint: DEFAULT_ENDPOINT.to_string(),
            timeout_secs: 30,
        }
    }
}

/// YouTube Data API client.
pub struct YouTubeClient {
    config: YouTubeConfig,
    client: Client,
}

impl YouTubeClient {
    pub fn new(config: YouTubeConfig) -> Result<Self, PlatformError> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .gzip(true)
            .brotli(true)
            .build()
            .map_err(|e| PlatformError::Connection(e.to_string()))?;

        Ok(Self { config, client })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, PlatformError> {
        let url = format!("{}/{}", self.config.endpoint, path);
        debug!("GET {} {:?}", path, query);

        let resp = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.config.api_key.as_str())])
            .send()
            .await
            .map_err(|e| PlatformError::Connection(e.to_string()))?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let body = resp.text().await.unwrap_or_default();
            return Err(PlatformError::Api { status, body });
        }

        resp.json::<T>()
            .await
            .map_err(|e| PlatformError::Parse(e.to_string()))
    }
}

#[derive(Deserialize)]
struct PlaylistItemsResponse {
    #[serde(default)]
    items: Vec<PlaylistItem>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct PlaylistItem {
    #[serde(rename = "contentDetails")]
    content_details: PlaylistItemContentDetails,
}

#[derive(Deserialize)]
struct PlaylistItemContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Deserialize)]
struct VideoListResponse {
    #[serde(default)]
    items: Vec<VideoResource>,
}

#[derive(Deserialize)]
struct VideoResource {
    id: String,
    snippet: VideoSnippet,
    status: VideoStatus,
    #[serde(rename = "contentDetails")]
    content_details: VideoContentDetails,
}

#[derive(Deserialize)]
struct VideoSnippet {
    title: String,
    description: Option<String>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    thumbnails: Value,
    #[serde(rename = "publishedAt")]
    published_at: DateTime<Utc>,
    #[serde(rename = "defaultLanguage")]
    default_language: Option<String>,
    #[serde(rename = "liveBroadcastContent")]
    live_broadcast_content: Option<String>,
}

#[derive(Deserialize)]
struct VideoStatus {
    #[serde(rename = "privacyStatus")]
    privacy_status: String,
    #[serde(default)]
    embeddable: bool,
}

#[derive(Deserialize)]
struct VideoContentDetails {
    duration: String,
    #[serde(rename = "regionRestriction")]
    region_restriction: Option<Value>,
    #[serde(rename = "contentRating")]
    content_rating: Option<Value>,
}

impl From<VideoResource> for RawItem {
    fn from(v: VideoResource) -> Self {
        let age_restricted = v
            .content_details
            .content_rating
            .as_ref()
            .and_then(|r| r.get("ytRating"))
            .and_then(Value::as_str)
            .is_some_and(|r| r == "ytAgeRestricted");

        RawItem {
            id: v.id,
            title: v.snippet.title,
            description: v.snippet.description,
            tags: v.snippet.tags,
            thumbnails: v.snippet.thumbnails,
            duration: v.content_details.duration,
            published_at: v.snippet.published_at,
            privacy_status: v.status.privacy_status,
            embeddable: v.status.embeddable,
            region_restricted: v.content_details.region_restriction.is_some(),
            age_restricted,
            default_language: v.snippet.default_language,
            live_broadcast: v.snippet.live_broadcast_content,
        }
    }
}

#[derive(Deserialize)]
struct PlaylistListResponse {
    #[serde(default)]
    items: Vec<PlaylistResource>,
}

#[derive(Deserialize)]
struct PlaylistResource {
    snippet: PlaylistSnippet,
}

#[derive(Deserialize)]
struct PlaylistSnippet {
    #[serde(rename = "channelId")]
    channel_id: String,
    title: String,
    #[serde(default)]
    thumbnails: Value,
    description: Option<String>,
}

#[derive(Deserialize)]
struct ChannelListResponse {
    #[serde(default)]
    items: Vec<ChannelResource>,
}

#[derive(Deserialize)]
struct ChannelResource {
    snippet: ChannelSnippet,
}

#[derive(Deserialize)]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    thumbnails: Value,
    description: Option<String>,
}

#[async_trait::async_trait]
impl VideoPlatform for YouTubeClient {
    async fn list_page(
        &self,
        source_id: &str,
        page_token: Option<&str>,
    ) -> Result<ListingPage, PlatformError> {
        let mut query = vec![
            ("playlistId", source_id),
            ("part", "contentDetails"),
            ("maxResults", "50"),
        ];
        if let Some(token) = page_token {
            query.push(("pageToken", token));
        }

        let resp: PlaylistItemsResponse = self.get_json("playlistItems", &query).await?;
        Ok(ListingPage {
            video_ids: resp
                .items
                .into_iter()
                .map(|i| i.content_details.video_id)
                .collect(),
            next_page_token: resp.next_page_token,
        })
    }

    async fn get_items(&self, ids: &[String]) -> Result<Vec<RawItem>, PlatformError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let ids = &ids[..ids.len().min(DETAIL_BATCH_SIZE)];
        let joined = ids.join(",");
        let query = [
            ("id", joined.as_str()),
            ("part", "status,snippet,contentDetails"),
        ];

        let resp: VideoListResponse = self.get_json("videos", &query).await?;
        Ok(resp.items.into_iter().map(RawItem::from).collect())
    }

    async fn get_source_metadata(&self, source_id: &str) -> Result<SourceMetadata, PlatformError> {
        let query = [("id", source_id), ("part", "snippet")];
        let resp: PlaylistListResponse = self.get_json("playlists", &query).await?;

        let playlist = resp
            .items
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::SourceNotFound(source_id.to_string()))?;

        Ok(SourceMetadata {
            channel_id: playlist.snippet.channel_id,
            title: playlist.snippet.title,
            thumbnails: playlist.snippet.thumbnails,
            description: playlist.snippet.description,
        })
    }

    async fn get_channel_metadata(
        &self,
        channel_id: &str,
    ) -> Result<ChannelMetadata, PlatformError> {
        let query = [("id", channel_id), ("part", "snippet")];
        let resp: ChannelListResponse = self.get_json("channels", &query).await?;

        let channel = resp
            .items
            .into_iter()
            .next()
            .ok_or_else(|| PlatformError::ChannelNotFound(channel_id.to_string()))?;

        Ok(ChannelMetadata {
            title: channel.snippet.title,
            thumbnails: channel.snippet.thumbnails,
            description: channel.snippet.description,
        })
    }
}
