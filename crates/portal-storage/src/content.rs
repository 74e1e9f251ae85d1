//! Content storage boundary and the in-memory backend.

use std::collections::{BTreeMap, HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{ContentItem, ContentKind, NaturalKey};
use serde::Serialize;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::fingerprint::content_fingerprint;
use crate::StorageError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Created,
    Updated,
    Unchanged,
}

/// Deletion predicates every backend can evaluate natively.
#[derive(Debug, Clone, PartialEq)]
pub enum DeleteFilter {
    /// Published before the cutoff and scored strictly below the floor.
    StaleBelowScore {
        published_before: DateTime<Utc>,
        score_below: u8,
    },
    Ids(HashSet<String>),
    /// Missing title, description or natural key.
    Orphaned,
}

impl DeleteFilter {
    pub fn matches(&self, item: &ContentItem) -> bool {
        match self {
            DeleteFilter::StaleBelowScore {
                published_before,
                score_below,
            } => item.published_at() < *published_before && item.relevance_score() < *score_below,
            DeleteFilter::Ids(ids) => item.id().map(|id| ids.contains(id)).unwrap_or(false),
            DeleteFilter::Orphaned => item.is_orphaned(),
        }
    }
}

#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert a new natural key or refresh the stored copy when upstream fields changed.
    async fn upsert(&self, item: ContentItem) -> Result<UpsertOutcome, StorageError>;

    /// Returns the number of rows actually removed.
    async fn delete_where(&self, kind: ContentKind, filter: &DeleteFilter) -> Result<u64, StorageError>;

    async fn list_all(&self, kind: ContentKind) -> Result<Vec<ContentItem>, StorageError>;

    async fn count_by_natural_key(&self, key: &NaturalKey) -> Result<u64, StorageError>;

    async fn natural_keys(&self, kind: ContentKind) -> Result<HashSet<NaturalKey>, StorageError>;

    async fn count(&self, kind: ContentKind) -> Result<u64, StorageError>;
}

#[derive(Debug, Clone)]
struct StoredItem {
    item: ContentItem,
    fingerprint: String,
}

#[derive(Debug, Default)]
struct MemoryState {
    items: BTreeMap<String, StoredItem>,
    by_key: HashMap<NaturalKey, String>,
}

impl MemoryState {
    fn reindex(&mut self) {
        self.by_key.clear();
        for (id, stored) in &self.items {
            if let Some(key) = stored.item.natural_key() {
                self.by_key.entry(key).or_insert_with(|| id.clone());
            }
        }
    }
}

/// Process-local store; read-your-writes within the process, nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryContentStore {
    state: RwLock<MemoryState>,
}

impl InMemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed raw records without upsert semantics, so duplicates and orphans can exist
    /// the way they do in legacy data.
    pub fn with_items(items: impl IntoIterator<Item = ContentItem>) -> Self {
        let mut state = MemoryState::default();
        for mut item in items {
            let id = item
                .id()
                .map(ToString::to_string)
                .unwrap_or_else(|| Uuid::new_v4().to_string());
            item.meta_mut().id = Some(id.clone());
            let fingerprint = content_fingerprint(&item);
            state.items.insert(id, StoredItem { item, fingerprint });
        }
        state.reindex();
        Self {
            state: RwLock::new(state),
        }
    }
}

fn assign_id(item: &ContentItem) -> String {
    match item {
        ContentItem::Video(video) => video
            .video_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string()),
        ContentItem::News(_) => Uuid::new_v4().to_string(),
    }
}

#[async_trait]
impl ContentStore for InMemoryContentStore {
    async fn upsert(&self, mut item: ContentItem) -> Result<UpsertOutcome, StorageError> {
        let key = item
            .natural_key()
            .ok_or_else(|| StorageError::MissingNaturalKey(item.item_ref()))?;
        let fingerprint = content_fingerprint(&item);
        let now = Utc::now();
        let mut state = self.state.write().await;

        if let Some(id) = state.by_key.get(&key).cloned() {
            let Some(existing) = state.items.get_mut(&id) else {
                return Err(StorageError::Backend(format!("index points at missing item {id}")));
            };
            if existing.fingerprint == fingerprint {
                return Ok(UpsertOutcome::Unchanged);
            }
            let created_at = existing.item.meta().created_at;
            let meta = item.meta_mut();
            meta.id = Some(id);
            meta.created_at = created_at.or(Some(now));
            meta.updated_at = Some(now);
            existing.item = item;
            existing.fingerprint = fingerprint;
            return Ok(UpsertOutcome::Updated);
        }

        let id = assign_id(&item);
        let meta = item.meta_mut();
        meta.id = Some(id.clone());
        meta.created_at = Some(now);
        meta.updated_at = Some(now);
        state.by_key.insert(key, id.clone());
        state.items.insert(id, StoredItem { item, fingerprint });
        Ok(UpsertOutcome::Created)
    }

    async fn delete_where(&self, kind: ContentKind, filter: &DeleteFilter) -> Result<u64, StorageError> {
        let mut state = self.state.write().await;
        let before = state.items.len();
        state
            .items
            .retain(|_, stored| stored.item.kind() != kind || !filter.matches(&stored.item));
        let removed = before - state.items.len();
        if removed > 0 {
            state.reindex();
        }
        Ok(removed as u64)
    }

    async fn list_all(&self, kind: ContentKind) -> Result<Vec<ContentItem>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .items
            .values()
            .filter(|stored| stored.item.kind() == kind)
            .map(|stored| stored.item.clone())
            .collect())
    }

    async fn count_by_natural_key(&self, key: &NaturalKey) -> Result<u64, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .items
            .values()
            .filter(|stored| stored.item.natural_key().as_ref() == Some(key))
            .count() as u64)
    }

    async fn natural_keys(&self, kind: ContentKind) -> Result<HashSet<NaturalKey>, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .by_key
            .keys()
            .filter(|key| key.kind() == kind)
            .cloned()
            .collect())
    }

    async fn count(&self, kind: ContentKind) -> Result<u64, StorageError> {
        let state = self.state.read().await;
        Ok(state
            .items
            .values()
            .filter(|stored| stored.item.kind() == kind)
            .count() as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use portal_core::{NewsArticle, Video};

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 5, day, 8, 0, 0).single().unwrap()
    }

    fn article(url: &str, title: &str) -> ContentItem {
        NewsArticle::new(url, title, "Speed limits for e-scooters", at(1)).into()
    }

    #[tokio::test]
    async fn upsert_creates_then_skips_identical_then_updates() {
        let store = InMemoryContentStore::new();
        assert_eq!(
            store.upsert(article("https://n/1", "Ban vote")).await.unwrap(),
            UpsertOutcome::Created
        );
        assert_eq!(
            store.upsert(article("https://n/1", "Ban vote")).await.unwrap(),
            UpsertOutcome::Unchanged
        );
        assert_eq!(
            store.upsert(article("https://n/1", "Ban vote passes")).await.unwrap(),
            UpsertOutcome::Updated
        );

        let items = store.list_all(ContentKind::News).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title(), Some("Ban vote passes"));
        assert!(items[0].meta().created_at.is_some());
    }

    #[tokio::test]
    async fn upsert_without_natural_key_is_rejected() {
        let store = InMemoryContentStore::new();
        let mut video = Video::new("v1", "Clip", "", at(2));
        video.video_id = None;
        let err = store.upsert(video.into()).await.unwrap_err();
        assert!(matches!(err, StorageError::MissingNaturalKey(_)));
    }

    #[tokio::test]
    async fn videos_keep_platform_id_as_identifier() {
        let store = InMemoryContentStore::new();
        store
            .upsert(Video::new("dQw4", "Helmet rules", "", at(3)).into())
            .await
            .unwrap();
        let videos = store.list_all(ContentKind::Video).await.unwrap();
        assert_eq!(videos[0].id(), Some("dQw4"));
        assert_eq!(store.count(ContentKind::News).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn delete_where_reports_real_counts_and_reindexes() {
        let dup_a = article("https://n/x", "First");
        let dup_b = article("https://n/x", "Second");
        let store = InMemoryContentStore::with_items(vec![dup_a, dup_b, article("https://n/y", "Other")]);
        let key = NaturalKey::SourceUrl("https://n/x".into());
        assert_eq!(store.count_by_natural_key(&key).await.unwrap(), 2);

        let items = store.list_all(ContentKind::News).await.unwrap();
        let second_id = items
            .iter()
            .find(|i| i.title() == Some("Second"))
            .and_then(|i| i.id())
            .unwrap()
            .to_string();
        let removed = store
            .delete_where(ContentKind::News, &DeleteFilter::Ids(HashSet::from([second_id])))
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(store.count_by_natural_key(&key).await.unwrap(), 1);
        assert_eq!(store.natural_keys(ContentKind::News).await.unwrap().len(), 2);

        let none = store
            .delete_where(ContentKind::Video, &DeleteFilter::Orphaned)
            .await
            .unwrap();
        assert_eq!(none, 0);
    }

    #[test]
    fn stale_filter_requires_both_age_and_low_score() {
        let filter = DeleteFilter::StaleBelowScore {
            published_before: at(10),
            score_below: 50,
        };
        let mut old_low = article("https://a", "a");
        old_low.meta_mut().relevance_score = 30;
        let mut old_high = article("https://b", "b");
        old_high.meta_mut().relevance_score = 90;
        let mut new_low = article("https://c", "c");
        new_low.meta_mut().published_at = at(20);
        new_low.meta_mut().relevance_score = 10;

        assert!(filter.matches(&old_low));
        assert!(!filter.matches(&old_high));
        assert!(!filter.matches(&new_low));
    }

    #[test]
    fn id_filter_matches_only_listed_ids() {
        let mut kept = article("https://a", "a");
        kept.meta_mut().id = Some("keep".into());
        let mut dropped = article("https://b", "b");
        dropped.meta_mut().id = Some("id-7".into());
        let unsaved = article("https://c", "c");

        let filter = DeleteFilter::Ids((0..1000).map(|i| format!("id-{i}")).collect());
        assert!(filter.matches(&dropped));
        assert!(!filter.matches(&kept));
        assert!(!filter.matches(&unsaved));
    }
}
