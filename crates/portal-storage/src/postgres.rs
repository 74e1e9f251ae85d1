//! PostgreSQL content store.

use std::collections::HashSet;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use portal_core::{Category, ContentItem, ContentKind, ContentMeta, NaturalKey, NewsArticle, Video};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tracing::info;
use uuid::Uuid;

use crate::content::{ContentStore, DeleteFilter, UpsertOutcome};
use crate::fingerprint::content_fingerprint;
use crate::StorageError;

#[derive(Debug, sqlx::FromRow)]
struct ContentRow {
    id: String,
    kind: String,
    natural_key: Option<String>,
    title: Option<String>,
    description: Option<String>,
    published_at: DateTime<Utc>,
    category: String,
    tags: Vec<String>,
    relevance_score: i16,
    source_name: Option<String>,
    author: Option<String>,
    image_url: Option<String>,
    channel_title: Option<String>,
    thumbnail_url: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ContentRow {
    fn into_item(self) -> Result<ContentItem, StorageError> {
        let corrupt = |message: String| StorageError::CorruptRow {
            id: self.id.clone(),
            message,
        };
        let kind: ContentKind = self.kind.parse().map_err(|e| corrupt(format!("{e}")))?;
        let category: Category = self.category.parse().map_err(|e| corrupt(format!("{e}")))?;
        let meta = ContentMeta {
            id: Some(self.id.clone()),
            title: self.title,
            description: self.description,
            published_at: self.published_at,
            category,
            tags: self.tags.into_iter().collect(),
            relevance_score: self.relevance_score.clamp(0, 100) as u8,
            created_at: Some(self.created_at),
            updated_at: Some(self.updated_at),
        };
        Ok(match kind {
            ContentKind::News => ContentItem::News(NewsArticle {
                meta,
                source_url: self.natural_key,
                source_name: self.source_name,
                author: self.author,
                image_url: self.image_url,
            }),
            ContentKind::Video => ContentItem::Video(Video {
                meta,
                video_id: self.natural_key,
                channel_title: self.channel_title,
                thumbnail_url: self.thumbnail_url,
            }),
        })
    }
}

/// Kind-specific columns in table order: source_name, author, image_url, channel_title, thumbnail_url.
fn variant_columns(item: &ContentItem) -> [Option<String>; 5] {
    match item {
        ContentItem::News(a) => [
            a.source_name.clone(),
            a.author.clone(),
            a.image_url.clone(),
            None,
            None,
        ],
        ContentItem::Video(v) => [
            None,
            None,
            None,
            v.channel_title.clone(),
            v.thumbnail_url.clone(),
        ],
    }
}

#[derive(Debug, Clone)]
pub struct PgContentStore {
    pool: PgPool,
}

impl PgContentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StorageError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect(database_url)
            .await?;
        info!("connected to postgres content store");
        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), StorageError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ContentStore for PgContentStore {
    async fn upsert(&self, item: ContentItem) -> Result<UpsertOutcome, StorageError> {
        let key = item
            .natural_key()
            .ok_or_else(|| StorageError::MissingNaturalKey(item.item_ref()))?;
        let fingerprint = content_fingerprint(&item);
        let meta = item.meta();
        let tags: Vec<String> = meta.tags.iter().cloned().collect();
        let [source_name, author, image_url, channel_title, thumbnail_url] = variant_columns(&item);

        let existing = sqlx::query(
            "SELECT id, fingerprint FROM content_items WHERE kind = $1 AND natural_key = $2",
        )
        .bind(item.kind().as_str())
        .bind(key.as_str())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = existing {
            let id: String = row.try_get("id")?;
            let stored: String = row.try_get("fingerprint")?;
            if stored == fingerprint {
                return Ok(UpsertOutcome::Unchanged);
            }
            sqlx::query(
                r#"
                UPDATE content_items
                   SET title = $2, description = $3, published_at = $4, category = $5,
                       tags = $6, relevance_score = $7, source_name = $8, author = $9,
                       image_url = $10, channel_title = $11, thumbnail_url = $12,
                       fingerprint = $13, updated_at = NOW()
                 WHERE id = $1
                "#,
            )
            .bind(&id)
            .bind(&meta.title)
            .bind(&meta.description)
            .bind(meta.published_at)
            .bind(meta.category.as_str())
            .bind(&tags)
            .bind(i16::from(meta.relevance_score))
            .bind(&source_name)
            .bind(&author)
            .bind(&image_url)
            .bind(&channel_title)
            .bind(&thumbnail_url)
            .bind(&fingerprint)
            .execute(&self.pool)
            .await?;
            return Ok(UpsertOutcome::Updated);
        }

        let id = match &item {
            ContentItem::Video(_) => key.as_str().to_string(),
            ContentItem::News(_) => Uuid::new_v4().to_string(),
        };
        sqlx::query(
            r#"
            INSERT INTO content_items
                (id, kind, natural_key, title, description, published_at, category, tags,
                 relevance_score, source_name, author, image_url, channel_title, thumbnail_url,
                 fingerprint)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            "#,
        )
        .bind(&id)
        .bind(item.kind().as_str())
        .bind(key.as_str())
        .bind(&meta.title)
        .bind(&meta.description)
        .bind(meta.published_at)
        .bind(meta.category.as_str())
        .bind(&tags)
        .bind(i16::from(meta.relevance_score))
        .bind(&source_name)
        .bind(&author)
        .bind(&image_url)
        .bind(&channel_title)
        .bind(&thumbnail_url)
        .bind(&fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(UpsertOutcome::Created)
    }

    async fn delete_where(&self, kind: ContentKind, filter: &DeleteFilter) -> Result<u64, StorageError> {
        let result = match filter {
            DeleteFilter::StaleBelowScore {
                published_before,
                score_below,
            } => {
                sqlx::query(
                    "DELETE FROM content_items WHERE kind = $1 AND published_at < $2 AND relevance_score < $3",
                )
                .bind(kind.as_str())
                .bind(*published_before)
                .bind(i16::from(*score_below))
                .execute(&self.pool)
                .await?
            }
            DeleteFilter::Ids(ids) => {
                if ids.is_empty() {
                    return Ok(0);
                }
                let ids: Vec<String> = ids.iter().cloned().collect();
                sqlx::query("DELETE FROM content_items WHERE kind = $1 AND id = ANY($2)")
                    .bind(kind.as_str())
                    .bind(ids)
                    .execute(&self.pool)
                    .await?
            }
            DeleteFilter::Orphaned => {
                sqlx::query(
                    r#"
                    DELETE FROM content_items
                     WHERE kind = $1
                       AND (title IS NULL OR btrim(title) = ''
                            OR description IS NULL
                            OR natural_key IS NULL OR btrim(natural_key) = '')
                    "#,
                )
                .bind(kind.as_str())
                .execute(&self.pool)
                .await?
            }
        };
        Ok(result.rows_affected())
    }

    async fn list_all(&self, kind: ContentKind) -> Result<Vec<ContentItem>, StorageError> {
        let rows: Vec<ContentRow> = sqlx::query_as(
            r#"
            SELECT id, kind, natural_key, title, description, published_at, category, tags,
                   relevance_score, source_name, author, image_url, channel_title, thumbnail_url,
                   created_at, updated_at
              FROM content_items
             WHERE kind = $1
             ORDER BY published_at DESC
            "#,
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(ContentRow::into_item).collect()
    }

    async fn count_by_natural_key(&self, key: &NaturalKey) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM content_items WHERE kind = $1 AND natural_key = $2",
        )
        .bind(key.kind().as_str())
        .bind(key.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(count.max(0) as u64)
    }

    async fn natural_keys(&self, kind: ContentKind) -> Result<HashSet<NaturalKey>, StorageError> {
        let keys: Vec<String> = sqlx::query_scalar(
            "SELECT natural_key FROM content_items WHERE kind = $1 AND natural_key IS NOT NULL",
        )
        .bind(kind.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(keys
            .into_iter()
            .map(|k| match kind {
                ContentKind::News => NaturalKey::SourceUrl(k),
                ContentKind::Video => NaturalKey::VideoId(k),
            })
            .collect())
    }

    async fn count(&self, kind: ContentKind) -> Result<u64, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM content_items WHERE kind = $1")
            .bind(kind.as_str())
            .fetch_one(&self.pool)
            .await?;
        Ok(count.max(0) as u64)
    }
}
