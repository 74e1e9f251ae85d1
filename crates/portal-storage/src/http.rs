//! Shared HTTP client with bounded timeout and capped exponential retry.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use reqwest::{StatusCode, Url};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, info_span, Instrument};

use crate::quota::{QuotaExceeded, QuotaTracker};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

/// Only server-side failures are worth another attempt; 4xx (429 included) is final.
pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    pub max_attempts: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        let delay = self.base_delay.saturating_mul(factor);
        delay.min(self.max_delay)
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub backoff: BackoffPolicy,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(10),
            user_agent: None,
            global_concurrency: 8,
            backoff: BackoffPolicy::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

impl FetchedResponse {
    pub fn json<T: serde::de::DeserializeOwned>(&self) -> serde_json::Result<T> {
        serde_json::from_slice(&self.body)
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("http client is shutting down")]
    Closed,
    #[error(transparent)]
    Quota(#[from] QuotaExceeded),
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            FetchError::Request(err) => classify_reqwest_error(err),
            FetchError::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
            FetchError::Closed | FetchError::Quota(_) => RetryDisposition::NonRetryable,
        }
    }
}

#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            backoff: config.backoff,
        })
    }

    pub fn backoff(&self) -> BackoffPolicy {
        self.backoff
    }

    /// GET `url`, retrying timeouts, connect failures and 5xx responses.
    pub async fn get(
        &self,
        source_id: &str,
        url: &Url,
        headers: &[(&'static str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", source_id, url = %redact_query(url));
        self.get_with_retries(url, headers, None).instrument(span).await
    }

    /// Like [`get`](Self::get), but every attempt, retries included, is charged to
    /// `api` first. Stops with [`FetchError::Quota`] once the budget is spent.
    pub async fn get_metered(
        &self,
        source_id: &str,
        url: &Url,
        headers: &[(&'static str, String)],
        quota: &QuotaTracker,
        api: &str,
    ) -> Result<FetchedResponse, FetchError> {
        let _permit = self
            .global_limit
            .acquire()
            .await
            .map_err(|_| FetchError::Closed)?;

        let span = info_span!("http_fetch", source_id, api, url = %redact_query(url));
        self.get_with_retries(url, headers, Some((quota, api)))
            .instrument(span)
            .await
    }

    async fn get_with_retries(
        &self,
        url: &Url,
        headers: &[(&'static str, String)],
        meter: Option<(&QuotaTracker, &str)>,
    ) -> Result<FetchedResponse, FetchError> {
        let attempts = self.backoff.max_attempts.max(1);
        let mut attempt = 0usize;

        loop {
            if let Some((quota, api)) = meter {
                quota.try_consume(api).await?;
            }
            let mut request = self.client.get(url.clone());
            for (name, value) in headers {
                request = request.header(*name, value.as_str());
            }

            let err = match request.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();
                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }
                    FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    }
                }
                Err(err) => FetchError::Request(err),
            };

            attempt += 1;
            if err.disposition() == RetryDisposition::NonRetryable || attempt >= attempts {
                return Err(err);
            }
            let delay = self.backoff.delay_for_attempt(attempt - 1);
            debug!(attempt, ?delay, error = %err, "retrying request");
            tokio::time::sleep(delay).await;
        }
    }

    /// Single-shot JSON POST; callers decide whether a failure matters.
    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        url: &str,
        body: &T,
    ) -> Result<StatusCode, FetchError> {
        let resp = self.client.post(url).json(body).send().await?;
        let status = resp.status();
        if status.is_success() {
            Ok(status)
        } else {
            Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            })
        }
    }
}

fn redact_query(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs: Vec<(String, String)> = url
        .query_pairs()
        .map(|(k, v)| {
            let v = if k.eq_ignore_ascii_case("key") || k.eq_ignore_ascii_case("apikey") {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), v)
        })
        .collect();
    if pairs.is_empty() {
        return shown.to_string();
    }
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}
