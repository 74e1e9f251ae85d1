//! External content source contracts and the news/video API adapters.

mod news;
mod text;
mod video;

use std::sync::Arc;

use async_trait::async_trait;
use portal_core::{ContentItem, ContentKind};
use portal_storage::{FetchError, HttpFetcher, QuotaExceeded, QuotaTracker, RetryDisposition};
use thiserror::Error;
use tracing::warn;

pub use news::{parse_news_payload, NewsApiConfig, NewsApiSource};
pub use text::clean_text;
pub use video::{parse_video_payload, VideoPage, YouTubeConfig, YouTubeSource};

pub const CRATE_NAME: &str = "portal-adapters";

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{source_id} unavailable: {message}")]
    SourceUnavailable {
        source_id: &'static str,
        message: String,
        retryable: bool,
    },
    #[error(transparent)]
    QuotaExceeded(#[from] QuotaExceeded),
    #[error("{source_id} returned an unreadable payload: {message}")]
    Payload {
        source_id: &'static str,
        message: String,
    },
}

impl AdapterError {
    pub(crate) fn from_fetch(source_id: &'static str, err: FetchError) -> Self {
        match err {
            FetchError::Quota(quota) => AdapterError::QuotaExceeded(quota),
            other => AdapterError::SourceUnavailable {
                source_id,
                retryable: other.disposition() == RetryDisposition::Retryable,
                message: other.to_string(),
            },
        }
    }

    /// Timeouts, connect failures and 5xx. Quota and 4xx failures are final.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AdapterError::SourceUnavailable {
                retryable: true,
                ..
            }
        )
    }
}

/// One upstream API, fetched page by page and normalized into [`ContentItem`]s.
#[async_trait]
pub trait ContentSource: Send + Sync {
    fn source_id(&self) -> &'static str;

    fn kind(&self) -> ContentKind;

    /// Key into the [`QuotaTracker`] this source charges.
    fn quota_api(&self) -> &'static str;

    /// Pages are 1-based. An exhausted query yields an empty page, not an error.
    async fn fetch_batch(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ContentItem>, AdapterError>;
}

/// Builds every source that has credentials configured.
pub fn configured_sources(
    news: Option<NewsApiConfig>,
    video: Option<YouTubeConfig>,
    http: Arc<HttpFetcher>,
    quota: Arc<QuotaTracker>,
) -> Vec<Arc<dyn ContentSource>> {
    let mut sources: Vec<Arc<dyn ContentSource>> = Vec::new();
    match news {
        Some(cfg) => sources.push(Arc::new(NewsApiSource::new(cfg, http.clone(), quota.clone()))),
        None => warn!("NEWS_API_KEY not set; news source disabled"),
    }
    match video {
        Some(cfg) => sources.push(Arc::new(YouTubeSource::new(cfg, http, quota))),
        None => warn!("YOUTUBE_API_KEY not set; video source disabled"),
    }
    sources
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Answers each connection with the next scripted body; records request lines.
    pub async fn scripted_api(
        responses: Vec<(u16, String)>,
    ) -> (String, Arc<AtomicUsize>, Arc<tokio::sync::Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let requests = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let (counter, seen) = (hits.clone(), requests.clone());
        tokio::spawn(async move {
            for (status, body) in responses {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = [0u8; 8192];
                let n = socket.read(&mut buf).await.unwrap_or(0);
                let head = String::from_utf8_lossy(&buf[..n]).to_string();
                seen.lock().await.push(head);
                let reply = format!(
                    "HTTP/1.1 {status} Scripted\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                let _ = socket.write_all(reply.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        (format!("http://{addr}"), hits, requests)
    }

    pub fn fast_fetcher() -> Arc<portal_storage::HttpFetcher> {
        retrying_fetcher(1)
    }

    pub fn retrying_fetcher(max_attempts: usize) -> Arc<portal_storage::HttpFetcher> {
        Arc::new(
            portal_storage::HttpFetcher::new(portal_storage::HttpClientConfig {
                timeout: std::time::Duration::from_secs(2),
                backoff: portal_storage::BackoffPolicy {
                    max_attempts,
                    base_delay: std::time::Duration::from_millis(1),
                    max_delay: std::time::Duration::from_millis(1),
                },
                ..Default::default()
            })
            .expect("client"),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryability_follows_fetch_disposition() {
        let server = AdapterError::from_fetch(
            "newsapi",
            FetchError::HttpStatus {
                status: 503,
                url: "https://n".into(),
            },
        );
        assert!(server.is_retryable());
        let client = AdapterError::from_fetch(
            "newsapi",
            FetchError::HttpStatus {
                status: 401,
                url: "https://n".into(),
            },
        );
        assert!(!client.is_retryable());
        assert!(!AdapterError::Payload {
            source_id: "youtube",
            message: "bad".into()
        }
        .is_retryable());
    }

    #[test]
    fn sources_without_credentials_are_skipped() {
        let sources = configured_sources(
            None,
            Some(YouTubeConfig::new("k")),
            test_support::fast_fetcher(),
            Arc::new(QuotaTracker::new()),
        );
        assert_eq!(sources.len(), 1);
        assert_eq!(sources[0].kind(), ContentKind::Video);
    }
}
