//! Normalized content model shared by adapters, scoring and storage.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub value: String,
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {}: {:?}", self.expected, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    News,
    Video,
}

impl ContentKind {
    pub const ALL: [ContentKind; 2] = [ContentKind::News, ContentKind::Video];

    pub fn as_str(self) -> &'static str {
        match self {
            ContentKind::News => "news",
            ContentKind::Video => "video",
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContentKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "news" | "article" | "articles" => Ok(ContentKind::News),
            "video" | "videos" => Ok(ContentKind::Video),
            _ => Err(ParseEnumError {
                expected: "content kind",
                value: s.to_string(),
            }),
        }
    }
}

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Regulation,
    Safety,
    Technology,
    UrbanMobility,
    #[default]
    General,
}

impl Category {
    /// Tie-break order used when two categories match equally well.
    pub const PRIORITY: [Category; 4] = [
        Category::Regulation,
        Category::Safety,
        Category::Technology,
        Category::UrbanMobility,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Regulation => "regulation",
            Category::Safety => "safety",
            Category::Technology => "technology",
            Category::UrbanMobility => "urban_mobility",
            Category::General => "general",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "regulation" => Ok(Category::Regulation),
            "safety" => Ok(Category::Safety),
            "technology" => Ok(Category::Technology),
            "urban_mobility" | "urban-mobility" => Ok(Category::UrbanMobility),
            "general" => Ok(Category::General),
            _ => Err(ParseEnumError {
                expected: "category",
                value: s.to_string(),
            }),
        }
    }
}

/// Domain identity of a content item: source URL for articles, platform id for videos.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum NaturalKey {
    SourceUrl(String),
    VideoId(String),
}

impl NaturalKey {
    pub fn kind(&self) -> ContentKind {
        match self {
            NaturalKey::SourceUrl(_) => ContentKind::News,
            NaturalKey::VideoId(_) => ContentKind::Video,
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            NaturalKey::SourceUrl(v) | NaturalKey::VideoId(v) => v,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::SourceUrl(url) => write!(f, "url:{url}"),
            NaturalKey::VideoId(id) => write!(f, "video:{id}"),
        }
    }
}

/// Fields shared by every content variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMeta {
    /// Storage-assigned for articles, the platform id for videos.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub relevance_score: u8,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ContentMeta {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: None,
            title: Some(title.into()),
            description: Some(description.into()),
            published_at,
            category: Category::General,
            tags: BTreeSet::new(),
            relevance_score: 0,
            created_at: None,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsArticle {
    #[serde(flatten)]
    pub meta: ContentMeta,
    #[serde(default)]
    pub source_url: Option<String>,
    #[serde(default)]
    pub source_name: Option<String>,
    #[serde(default)]
    pub author: Option<String>,
    #[serde(default)]
    pub image_url: Option<String>,
}

impl NewsArticle {
    pub fn new(
        source_url: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            meta: ContentMeta::new(title, description, published_at),
            source_url: Some(source_url.into()),
            source_name: None,
            author: None,
            image_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    #[serde(flatten)]
    pub meta: ContentMeta,
    #[serde(default)]
    pub video_id: Option<String>,
    #[serde(default)]
    pub channel_title: Option<String>,
    #[serde(default)]
    pub thumbnail_url: Option<String>,
}

impl Video {
    pub fn new(
        video_id: impl Into<String>,
        title: impl Into<String>,
        description: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        let video_id = video_id.into();
        let mut meta = ContentMeta::new(title, description, published_at);
        meta.id = Some(video_id.clone());
        Self {
            meta,
            video_id: Some(video_id),
            channel_title: None,
            thumbnail_url: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContentItem {
    News(NewsArticle),
    Video(Video),
}

impl From<NewsArticle> for ContentItem {
    fn from(value: NewsArticle) -> Self {
        ContentItem::News(value)
    }
}

impl From<Video> for ContentItem {
    fn from(value: Video) -> Self {
        ContentItem::Video(value)
    }
}

fn is_blank(value: Option<&str>) -> bool {
    value.map(|v| v.trim().is_empty()).unwrap_or(true)
}

impl ContentItem {
    pub fn kind(&self) -> ContentKind {
        match self {
            ContentItem::News(_) => ContentKind::News,
            ContentItem::Video(_) => ContentKind::Video,
        }
    }

    pub fn meta(&self) -> &ContentMeta {
        match self {
            ContentItem::News(article) => &article.meta,
            ContentItem::Video(video) => &video.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut ContentMeta {
        match self {
            ContentItem::News(article) => &mut article.meta,
            ContentItem::Video(video) => &mut video.meta,
        }
    }

    pub fn id(&self) -> Option<&str> {
        self.meta().id.as_deref()
    }

    pub fn title(&self) -> Option<&str> {
        self.meta().title.as_deref()
    }

    pub fn published_at(&self) -> DateTime<Utc> {
        self.meta().published_at
    }

    pub fn relevance_score(&self) -> u8 {
        self.meta().relevance_score
    }

    pub fn natural_key(&self) -> Option<NaturalKey> {
        match self {
            ContentItem::News(article) => article
                .source_url
                .as_deref()
                .map(str::trim)
                .filter(|url| !url.is_empty())
                .map(|url| NaturalKey::SourceUrl(url.to_string())),
            ContentItem::Video(video) => video
                .video_id
                .as_deref()
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .map(|id| NaturalKey::VideoId(id.to_string())),
        }
    }

    /// Names of required fields that are absent. A missing description is `None`;
    /// an empty description is accepted.
    pub fn missing_required_fields(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if is_blank(self.title()) {
            missing.push("title");
        }
        if self.meta().description.is_none() {
            missing.push("description");
        }
        if self.natural_key().is_none() {
            missing.push(match self.kind() {
                ContentKind::News => "source_url",
                ContentKind::Video => "video_id",
            });
        }
        missing
    }

    pub fn is_orphaned(&self) -> bool {
        !self.missing_required_fields().is_empty()
    }

    /// Short human reference used in run error lists.
    pub fn item_ref(&self) -> String {
        if let Some(key) = self.natural_key() {
            return key.to_string();
        }
        if let Some(id) = self.id() {
            return format!("{}:{id}", self.kind());
        }
        match self.title() {
            Some(title) if !title.trim().is_empty() => format!("{}:{}", self.kind(), title.trim()),
            _ => format!("{}:<unidentified>", self.kind()),
        }
    }

    /// Lowercased title + description used by keyword matching.
    pub fn searchable_text(&self) -> String {
        let meta = self.meta();
        format!(
            "{} {}",
            meta.title.as_deref().unwrap_or_default(),
            meta.description.as_deref().unwrap_or_default()
        )
        .to_lowercase()
    }
}
