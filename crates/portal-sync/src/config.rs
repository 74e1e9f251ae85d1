//! Environment-driven configuration.

use std::fmt::Display;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use portal_adapters::{NewsApiConfig, YouTubeConfig};
use portal_storage::{BackoffPolicy, HttpClientConfig, QuotaLimit, QuotaTracker, NEWS_API, YOUTUBE_API};

use tracing::warn;

use crate::cleanup::{RetentionPolicy, RetentionRule};

const DEFAULT_QUERIES: &str = "trottinette électrique,electric scooter regulation,e-scooter law";
const YOUTUBE_SEARCH_COST: u32 = 100;

#[derive(Debug, Clone)]
pub struct PortalConfig {
    pub database_url: Option<String>,
    pub news: Option<NewsApiConfig>,
    pub news_daily_limit: u32,
    pub video: Option<YouTubeConfig>,
    pub youtube_daily_quota: u32,
    pub queries: Vec<String>,
    pub pages_per_run: u32,
    pub page_size: u32,
    pub full_sync_pages: u32,
    pub full_sync_batch_delay: Duration,
    pub http_timeout: Duration,
    pub http_max_attempts: usize,
    pub http_backoff: Duration,
    pub user_agent: String,
    pub admin_api_key: Option<String>,
    pub scheduler_enabled: bool,
    pub sync_cron: String,
    pub cleanup_cron: String,
    pub retention: RetentionPolicy,
    pub topics_file: Option<PathBuf>,
    pub web_port: u16,
    pub listing_cache_ttl: Duration,
}

impl PortalConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Blank values count as
    /// unset; malformed or out-of-range numbers fall back to their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str| {
            lookup(key)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let language = get("PORTAL_LANGUAGE").or_else(|| Some("fr".to_string()));

        let news = get("NEWS_API_KEY").map(|api_key| NewsApiConfig {
            api_key,
            base_url: get("NEWS_API_BASE_URL").unwrap_or_else(|| NewsApiConfig::new("").base_url),
            language: language.clone(),
        });
        let video = get("YOUTUBE_API_KEY").map(|api_key| YouTubeConfig {
            api_key,
            base_url: get("YOUTUBE_API_BASE_URL").unwrap_or_else(|| YouTubeConfig::new("").base_url),
            language: language.clone(),
        });

        let queries: Vec<String> = get("PORTAL_QUERIES")
            .unwrap_or_else(|| DEFAULT_QUERIES.to_string())
            .split(',')
            .map(|q| q.trim().to_string())
            .filter(|q| !q.is_empty())
            .collect();

        Self {
            database_url: get("DATABASE_URL"),
            news,
            news_daily_limit: number(&get, "NEWS_API_DAILY_LIMIT", 100u32),
            video,
            youtube_daily_quota: number(&get, "YOUTUBE_DAILY_QUOTA", 10_000u32),
            queries,
            pages_per_run: number(&get, "PORTAL_PAGES_PER_RUN", 1u32).max(1),
            page_size: number(&get, "PORTAL_PAGE_SIZE", 20u32).max(1),
            full_sync_pages: number(&get, "PORTAL_FULL_SYNC_PAGES", 5u32).max(1),
            full_sync_batch_delay: Duration::from_millis(number(&get, "PORTAL_FULL_SYNC_BATCH_DELAY_MS", 1000u64)),
            http_timeout: Duration::from_secs(number(&get, "PORTAL_HTTP_TIMEOUT_SECS", 10u64).max(1)),
            http_max_attempts: number(&get, "PORTAL_HTTP_MAX_ATTEMPTS", 3usize).max(1),
            http_backoff: Duration::from_millis(number(&get, "PORTAL_HTTP_BACKOFF_MS", 1000u64)),
            user_agent: get("PORTAL_USER_AGENT")
                .unwrap_or_else(|| "content-portal-sync/0.1".to_string()),
            admin_api_key: get("PORTAL_ADMIN_API_KEY"),
            scheduler_enabled: get("PORTAL_SCHEDULER_ENABLED")
                .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(false),
            sync_cron: get("PORTAL_SYNC_CRON").unwrap_or_else(|| "0 0 */6 * * *".to_string()),
            cleanup_cron: get("PORTAL_CLEANUP_CRON").unwrap_or_else(|| "0 30 3 * * *".to_string()),
            retention: RetentionPolicy {
                news: RetentionRule {
                    max_age_months: number(&get, "PORTAL_NEWS_MAX_AGE_MONTHS", 6u32),
                    min_score: number(&get, "PORTAL_NEWS_MIN_SCORE", 50u8).min(100),
                },
                video: RetentionRule {
                    max_age_months: number(&get, "PORTAL_VIDEO_MAX_AGE_MONTHS", 12u32),
                    min_score: number(&get, "PORTAL_VIDEO_MIN_SCORE", 40u8).min(100),
                },
            },
            topics_file: get("PORTAL_TOPICS_FILE").map(PathBuf::from),
            web_port: number(&get, "PORTAL_WEB_PORT", 8000u16),
            listing_cache_ttl: Duration::from_secs(number(&get, "PORTAL_LISTING_CACHE_TTL_SECS", 300u64)),
        }
    }

    pub fn http_client_config(&self) -> HttpClientConfig {
        HttpClientConfig {
            timeout: self.http_timeout,
            user_agent: Some(self.user_agent.clone()),
            backoff: self.backoff(),
            ..Default::default()
        }
    }

    pub fn backoff(&self) -> BackoffPolicy {
        BackoffPolicy {
            max_attempts: self.http_max_attempts,
            base_delay: self.http_backoff,
            ..Default::default()
        }
    }

    pub fn quota_tracker(&self) -> QuotaTracker {
        QuotaTracker::new()
            .with_limit(
                NEWS_API,
                QuotaLimit {
                    daily_limit: self.news_daily_limit,
                    cost_per_call: 1,
                },
            )
            .with_limit(
                YOUTUBE_API,
                QuotaLimit {
                    daily_limit: self.youtube_daily_quota,
                    cost_per_call: YOUTUBE_SEARCH_COST,
                },
            )
    }
}

/// Parses straight into the target type, so values that do not fit are rejected
/// instead of truncated.
fn number<T>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Display + Copy,
{
    let Some(raw) = get(key) else {
        return default;
    };
    raw.parse().unwrap_or_else(|_| {
        warn!(key, value = %raw, %default, "ignoring malformed or out-of-range setting");
        default
    })
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> PortalConfig {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PortalConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_boot_without_credentials() {
        let cfg = PortalConfig::default();
        assert!(cfg.database_url.is_none());
        assert!(cfg.news.is_none() && cfg.video.is_none());
        assert_eq!(cfg.queries.len(), 3);
        assert_eq!(cfg.retention.news.max_age_months, 6);
        assert_eq!(cfg.retention.video.min_score, 40);
        assert_eq!(cfg.sync_cron, "0 0 */6 * * *");
        assert_eq!(cfg.http_timeout, Duration::from_secs(10));
        assert!(!cfg.scheduler_enabled);
    }

    #[test]
    fn reads_overrides_and_ignores_malformed_numbers() {
        let cfg = config_from(&[
            ("NEWS_API_KEY", "abc"),
            ("PORTAL_LANGUAGE", "en"),
            ("PORTAL_QUERIES", " e-scooter , ,helmet law "),
            ("PORTAL_PAGE_SIZE", "many"),
            ("PORTAL_NEWS_MIN_SCORE", "250"),
            ("PORTAL_SCHEDULER_ENABLED", "true"),
            ("PORTAL_ADMIN_API_KEY", "  "),
        ]);
        let news = cfg.news.expect("news configured");
        assert_eq!(news.api_key, "abc");
        assert_eq!(news.language.as_deref(), Some("en"));
        assert_eq!(news.base_url, "https://newsapi.org/v2");
        assert_eq!(cfg.queries, vec!["e-scooter", "helmet law"]);
        assert_eq!(cfg.page_size, 20);
        assert_eq!(cfg.retention.news.min_score, 100);
        assert!(cfg.scheduler_enabled);
        assert!(cfg.admin_api_key.is_none());
    }

    #[test]
    fn oversized_numbers_fall_back_instead_of_truncating() {
        let cfg = config_from(&[
            ("NEWS_API_DAILY_LIMIT", "4294967296"),
            ("PORTAL_WEB_PORT", "70000"),
            ("PORTAL_VIDEO_MIN_SCORE", "300"),
            ("PORTAL_FULL_SYNC_PAGES", "-1"),
        ]);
        assert_eq!(cfg.news_daily_limit, 100);
        assert_eq!(cfg.web_port, 8000);
        assert_eq!(cfg.retention.video.min_score, 40);
        assert_eq!(cfg.full_sync_pages, 5);
    }

    #[tokio::test]
    async fn quota_tracker_uses_configured_limits() {
        let cfg = config_from(&[("YOUTUBE_DAILY_QUOTA", "250")]);
        let quota = cfg.quota_tracker();
        assert_eq!(quota.remaining(YOUTUBE_API).await, 2);
        assert_eq!(quota.remaining(NEWS_API).await, 100);
    }
}
