//! News search adapter: paged article queries normalized into news items.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{ContentItem, ContentKind, ContentMeta, NewsArticle};
use portal_storage::{HttpFetcher, QuotaTracker, NEWS_API};
use reqwest::Url;
use serde::Deserialize;
use tracing::debug;

use crate::text::clean_text;
use crate::{AdapterError, ContentSource};

const SOURCE_ID: &str = "newsapi";
const REMOVED_PLACEHOLDER: &str = "[Removed]";
const MAX_PAGE_SIZE: u32 = 100;

#[derive(Debug, Clone)]
pub struct NewsApiConfig {
    pub api_key: String,
    pub base_url: String,
    pub language: Option<String>,
}

impl NewsApiConfig {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            base_url: "https://newsapi.org/v2".to_string(),
            language: None,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct NewsPayload {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    articles: Vec<RawArticle>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    #[serde(default)]
    source: Option<RawArticleSource>,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    url_to_image: Option<String>,
    published_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawArticleSource {
    name: Option<String>,
}

/// Normalizes a NewsAPI `/everything` body. Placeholders for removed articles and
/// entries without a parseable publication time are dropped; other missing fields
/// are kept as `None` so downstream validation can reject them with a reason.
pub fn parse_news_payload(body: &[u8]) -> Result<Vec<ContentItem>, AdapterError> {
    let payload: NewsPayload = serde_json::from_slice(body).map_err(|e| AdapterError::Payload {
        source_id: SOURCE_ID,
        message: e.to_string(),
    })?;
    if payload.status != "ok" {
        return Err(AdapterError::SourceUnavailable {
            source_id: SOURCE_ID,
            message: payload.message.unwrap_or_else(|| format!("status {}", payload.status)),
            retryable: false,
        });
    }

    let mut items = Vec::with_capacity(payload.articles.len());
    for raw in payload.articles {
        if raw.title.as_deref().map(str::trim) == Some(REMOVED_PLACEHOLDER) {
            continue;
        }
        let Some(published_at) = raw.published_at.as_deref().and_then(parse_timestamp) else {
            debug!(url = ?raw.url, "skipping article without publication time");
            continue;
        };
        let meta = ContentMeta {
            title: raw.title.as_deref().and_then(clean_text),
            description: raw
                .description
                .as_deref()
                .map(|d| clean_text(d).unwrap_or_default()),
            ..ContentMeta::new("", "", published_at)
        };
        items.push(ContentItem::News(NewsArticle {
            meta,
            source_url: raw.url.map(|u| u.trim().to_string()),
            source_name: raw.source.and_then(|s| s.name).and_then(|n| clean_text(&n)),
            author: raw.author.as_deref().and_then(clean_text),
            image_url: raw.url_to_image,
        }));
    }
    Ok(items)
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value.trim())
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

pub struct NewsApiSource {
    config: NewsApiConfig,
    http: Arc<HttpFetcher>,
    quota: Arc<QuotaTracker>,
}

impl NewsApiSource {
    pub fn new(config: NewsApiConfig, http: Arc<HttpFetcher>, quota: Arc<QuotaTracker>) -> Self {
        Self {
            config,
            http,
            quota,
        }
    }

    fn search_url(&self, query: &str, page: u32, page_size: u32) -> Result<Url, AdapterError> {
        let base = format!("{}/everything", self.config.base_url.trim_end_matches('/'));
        let mut params = vec![
            ("q", query.to_string()),
            ("page", page.max(1).to_string()),
            ("pageSize", page_size.clamp(1, MAX_PAGE_SIZE).to_string()),
            ("sortBy", "publishedAt".to_string()),
        ];
        if let Some(language) = &self.config.language {
            params.push(("language", language.clone()));
        }
        Url::parse_with_params(&base, &params).map_err(|e| AdapterError::SourceUnavailable {
            source_id: SOURCE_ID,
            message: format!("invalid base url: {e}"),
            retryable: false,
        })
    }
}

#[async_trait]
impl ContentSource for NewsApiSource {
    fn source_id(&self) -> &'static str {
        SOURCE_ID
    }

    fn kind(&self) -> ContentKind {
        ContentKind::News
    }

    fn quota_api(&self) -> &'static str {
        NEWS_API
    }

    async fn fetch_batch(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ContentItem>, AdapterError> {
        let url = self.search_url(query, page, page_size)?;
        let response = self
            .http
            .get_metered(
                SOURCE_ID,
                &url,
                &[("X-Api-Key", self.config.api_key.clone())],
                &self.quota,
                NEWS_API,
            )
            .await
            .map_err(|e| AdapterError::from_fetch(SOURCE_ID, e))?;
        let items = parse_news_payload(&response.body)?;
        let remaining = self.quota.remaining(NEWS_API).await;
        debug!(query, page, fetched = items.len(), remaining, "news page fetched");
        Ok(items)
    }
}
