//! Relevance scoring.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use portal_core::{Category, ContentItem};

use crate::topics::TopicVocabulary;

const TITLE_HIT_POINTS: u32 = 15;
const TITLE_CAP: u32 = 45;
const DESCRIPTION_HIT_POINTS: u32 = 5;
const DESCRIPTION_CAP: u32 = 25;

fn category_weight(category: Category) -> u32 {
    match category {
        Category::Regulation => 20,
        Category::Safety => 15,
        Category::Technology | Category::UrbanMobility => 10,
        Category::General => 0,
    }
}

/// Pure keyword/category/recency heuristic. The reference time is an argument so the
/// same item scored against the same instant always gets the same value.
#[derive(Clone)]
pub struct RelevanceScorer {
    vocabulary: Arc<TopicVocabulary>,
}

impl RelevanceScorer {
    pub fn new(vocabulary: Arc<TopicVocabulary>) -> Self {
        Self { vocabulary }
    }

    pub fn score(&self, item: &ContentItem, as_of: DateTime<Utc>) -> u8 {
        let meta = item.meta();
        let title = meta.title.as_deref().unwrap_or_default().to_lowercase();
        let description = meta.description.as_deref().unwrap_or_default().to_lowercase();

        let title_hits = self.keyword_hits(&title);
        let description_hits = self.keyword_hits(&description);

        let age = as_of - meta.published_at;
        let recency = if age.num_days() <= 7 {
            10
        } else if age.num_days() <= 30 {
            5
        } else {
            0
        };

        let total = (title_hits * TITLE_HIT_POINTS).min(TITLE_CAP)
            + (description_hits * DESCRIPTION_HIT_POINTS).min(DESCRIPTION_CAP)
            + category_weight(meta.category)
            + recency;
        total.min(100) as u8
    }

    fn keyword_hits(&self, text: &str) -> u32 {
        self.vocabulary.relevance_hits(text) as u32
    }
}
