//! Read cache for content listings plus the invalidation hook cleanup calls.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use portal_core::{ContentItem, ContentKind};
use tokio::sync::RwLock;

pub const LISTING_SCOPE: &str = "content";

#[async_trait]
pub trait CacheInvalidator: Send + Sync {
    /// Drop every entry under `scope`, returning how many were cleared.
    async fn invalidate(&self, scope: &str) -> u64;
}

#[derive(Debug, Clone)]
struct CachedListing {
    stored_at: Instant,
    items: Arc<Vec<ContentItem>>,
}

#[derive(Debug)]
pub struct ListingCache {
    ttl: Duration,
    entries: RwLock<HashMap<String, CachedListing>>,
}

impl ListingCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub fn listing_key(kind: ContentKind, page: usize, per_page: usize) -> String {
        format!("{LISTING_SCOPE}:{kind}:{page}:{per_page}")
    }

    pub async fn get(&self, key: &str) -> Option<Arc<Vec<ContentItem>>> {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .filter(|entry| entry.stored_at.elapsed() < self.ttl)
            .map(|entry| entry.items.clone())
    }

    pub async fn put(&self, key: impl Into<String>, items: Vec<ContentItem>) -> Arc<Vec<ContentItem>> {
        let items = Arc::new(items);
        let mut entries = self.entries.write().await;
        entries.retain(|_, entry| entry.stored_at.elapsed() < self.ttl);
        entries.insert(
            key.into(),
            CachedListing {
                stored_at: Instant::now(),
                items: items.clone(),
            },
        );
        items
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl CacheInvalidator for ListingCache {
    async fn invalidate(&self, scope: &str) -> u64 {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !(key == scope || key.starts_with(&format!("{scope}:"))));
        (before - entries.len()) as u64
    }
}
