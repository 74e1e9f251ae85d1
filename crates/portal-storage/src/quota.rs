//! Local per-API daily quota accounting.

use std::collections::HashMap;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;

pub const NEWS_API: &str = "newsapi";
pub const YOUTUBE_API: &str = "youtube";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuotaLimit {
    /// Provider units available per UTC day.
    pub daily_limit: u32,
    /// Units one call consumes.
    pub cost_per_call: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("daily quota exhausted for {api}: {used}/{limit} units used on {day}")]
pub struct QuotaExceeded {
    pub api: String,
    pub used: u32,
    pub limit: u32,
    pub day: NaiveDate,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QuotaUsage {
    pub api: String,
    pub day: NaiveDate,
    pub used: u32,
    pub limit: u32,
    pub remaining_calls: u32,
}

#[derive(Debug, Default)]
pub struct QuotaTracker {
    limits: HashMap<String, QuotaLimit>,
    usage: Mutex<HashMap<(String, NaiveDate), u32>>,
}

impl QuotaTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(mut self, api: impl Into<String>, limit: QuotaLimit) -> Self {
        self.limits.insert(api.into(), limit);
        self
    }

    pub fn limit(&self, api: &str) -> Option<QuotaLimit> {
        self.limits.get(api).copied()
    }

    /// Calls still affordable today. Unknown APIs are unmetered.
    pub async fn remaining(&self, api: &str) -> u32 {
        self.remaining_on(api, Utc::now().date_naive()).await
    }

    pub async fn remaining_on(&self, api: &str, day: NaiveDate) -> u32 {
        let Some(limit) = self.limit(api) else {
            return u32::MAX;
        };
        let usage = self.usage.lock().await;
        let used = usage.get(&(api.to_string(), day)).copied().unwrap_or(0);
        remaining_calls(limit, used)
    }

    pub async fn try_consume(&self, api: &str) -> Result<u32, QuotaExceeded> {
        self.try_consume_on(api, Utc::now().date_naive()).await
    }

    /// Charge one call against `day`, returning the calls left afterwards.
    pub async fn try_consume_on(&self, api: &str, day: NaiveDate) -> Result<u32, QuotaExceeded> {
        let Some(limit) = self.limit(api) else {
            return Ok(u32::MAX);
        };
        let mut usage = self.usage.lock().await;
        usage.retain(|(_, d), _| *d >= day);
        let used = usage.entry((api.to_string(), day)).or_insert(0);
        if used.saturating_add(limit.cost_per_call) > limit.daily_limit {
            return Err(QuotaExceeded {
                api: api.to_string(),
                used: *used,
                limit: limit.daily_limit,
                day,
            });
        }
        *used += limit.cost_per_call;
        Ok(remaining_calls(limit, *used))
    }

    pub async fn snapshot(&self) -> Vec<QuotaUsage> {
        let day = Utc::now().date_naive();
        let usage = self.usage.lock().await;
        let mut out = self
            .limits
            .iter()
            .map(|(api, limit)| {
                let used = usage.get(&(api.clone(), day)).copied().unwrap_or(0);
                QuotaUsage {
                    api: api.clone(),
                    day,
                    used,
                    limit: limit.daily_limit,
                    remaining_calls: remaining_calls(*limit, used),
                }
            })
            .collect::<Vec<_>>();
        out.sort_by(|a, b| a.api.cmp(&b.api));
        out
    }
}

fn remaining_calls(limit: QuotaLimit, used: u32) -> u32 {
    let left = limit.daily_limit.saturating_sub(used);
    if limit.cost_per_call == 0 {
        return u32::MAX;
    }
    left / limit.cost_per_call
}
