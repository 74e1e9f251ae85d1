//! Video search adapter with per-query continuation tokens.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{ContentItem, ContentKind, ContentMeta, Video};
use portal_storage::{HttpFetcher, QuotaTracker, YOUTUBE_API};
use reqwest::Url;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::debug;

use crate::text::clean_text;
use crate::{AdapterError, ContentSource};

const SOURCE_ID: &str = "youtube";
const MAX_RESULTS: u32 = 50;

#[derive(Debug, Clone)]
pub struct YouTubeConfig {
    pub api_key: String,
    pub base_url: String,
    pub language: Option<String>,
}

impl YouTubeConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            language: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SearchPayload {
    #[serde(default)]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<RawSearchItem>,
}

#[derive(Debug, Deserialize)]
struct RawSearchItem {
    id: RawVideoRef,
    snippet: Option<RawSnippet>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawVideoRef {
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawSnippet {
    published_at: Option<String>,
    title: Option<String>,
    description: Option<String>,
    channel_title: Option<String>,
    #[serde(default)]
    thumbnails: HashMap<String, RawThumbnail>,
}

#[derive(Debug, Deserialize)]
struct RawThumbnail {
    url: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VideoPage {
    pub items: Vec<ContentItem>,
    pub next_page_token: Option<String>,
}

/// Normalizes a YouTube Data API `search` body. Results that are not videos
/// (channels, playlists) carry no `videoId` and are skipped.
pub fn parse_video_payload(body: &[u8]) -> Result<VideoPage, AdapterError> {
    let payload: SearchPayload = serde_json::from_slice(body).map_err(|e| AdapterError::Payload {
        source_id: SOURCE_ID,
        message: e.to_string(),
    })?;

    let mut items = Vec::with_capacity(payload.items.len());
    for raw in payload.items {
        let Some(video_id) = raw.id.video_id else {
            continue;
        };
        let Some(snippet) = raw.snippet else {
            debug!(video_id = %video_id, "skipping search result without snippet");
            continue;
        };
        let Some(published_at) = snippet
            .published_at
            .as_deref()
            .and_then(|v| DateTime::parse_from_rfc3339(v.trim()).ok())
            .map(|dt| dt.with_timezone(&Utc))
        else {
            debug!(video_id = %video_id, "skipping video without publication time");
            continue;
        };
        let thumbnail_url = ["high", "medium", "default"]
            .iter()
            .find_map(|size| snippet.thumbnails.get(*size))
            .map(|t| t.url.clone());
        let mut meta = ContentMeta {
            title: snippet.title.as_deref().and_then(clean_text),
            description: snippet
                .description
                .as_deref()
                .map(|d| clean_text(d).unwrap_or_default()),
            ..ContentMeta::new("", "", published_at)
        };
        meta.id = Some(video_id.trim().to_string());
        items.push(ContentItem::Video(Video {
            meta,
            video_id: Some(video_id.trim().to_string()),
            channel_title: snippet.channel_title.as_deref().and_then(clean_text),
            thumbnail_url,
        }));
    }

    Ok(VideoPage {
        items,
        next_page_token: payload.next_page_token.filter(|t| !t.is_empty()),
    })
}

/// YouTube search paginates by continuation token; numeric pages are mapped onto
/// the token returned by the previous page of the same query.
pub struct YouTubeSource {
    config: YouTubeConfig,
    http: Arc<HttpFetcher>,
    quota: Arc<QuotaTracker>,
    page_tokens: Mutex<HashMap<(String, u32), String>>,
}

impl YouTubeSource {
    pub fn new(config: YouTubeConfig, http: Arc<HttpFetcher>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            config,
            http,
            quota,
            page_tokens: Mutex::new(HashMap::new()),
        }
    }

    fn search_url(
        &self,
        query: &str,
        page_size: u32,
        token: Option<&str>,
    ) -> Result<Url, AdapterError> {
        let base = format!("{}/search", self.config.base_url.trim_end_matches('/'));
        let mut params = vec![
            ("part", "snippet".to_string()),
            ("type", "video".to_string()),
            ("order", "date".to_string()),
            ("q", query.to_string()),
            ("maxResults", page_size.clamp(1, MAX_RESULTS).to_string()),
            ("key", self.config.api_key.clone()),
        ];
        if let Some(language) = &self.config.language {
            params.push(("relevanceLanguage", language.clone()));
        }
        if let Some(token) = token {
            params.push(("pageToken", token.to_string()));
        }
        Url::parse_with_params(&base, &params).map_err(|e| AdapterError::SourceUnavailable {
            source_id: SOURCE_ID,
            message: format!("invalid base url: {e}"),
            retryable: false,
        })
    }
}

#[async_trait]
impl ContentSource for YouTubeSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn kind(&self) -> ContentKind {
        ContentKind::Video
    }

    fn quota_api(&self) -> &'static str {
        YOUTUBE_API
    }

    async fn fetch_batch(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ContentItem>, AdapterError> {
        let page = page.max(1);
        let token = if page == 1 {
            None
        } else {
            let tokens = self.page_tokens.lock().await;
            match tokens.get(&(query.to_string(), page)) {
                Some(token) => Some(token.clone()),
                None => {
                    debug!(query, page, "no continuation token; query exhausted");
                    return Ok(Vec::new());
                }
            }
        };

        let url = self.search_url(query, page_size, token.as_deref())?;
        let response = self
            .http
            .get_metered(SOURCE_ID, &url, &[], &self.quota, YOUTUBE_API)
            .await
            .map_err(|e| AdapterError::from_fetch(SOURCE_ID, e))?;
        let parsed = parse_video_payload(&response.body)?;
        let remaining = self.quota.remaining(YOUTUBE_API).await;

        if let Some(next) = parsed.next_page_token {
            self.page_tokens
                .lock()
                .await
                .insert((query.to_string(), page + 1), next);
        }
        debug!(query, page, fetched = parsed.items.len(), remaining, "video page fetched");
        Ok(parsed.items)
    }
}
