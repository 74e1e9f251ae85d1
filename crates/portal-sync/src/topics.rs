//! Topic vocabulary and the enrichment hook that assigns category and tags.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use portal_core::{Category, ContentItem};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TagRule {
    pub tag: String,
    pub contains_any: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TopicVocabulary {
    #[serde(default)]
    pub version: u32,
    pub relevance_keywords: Vec<String>,
    pub categories: BTreeMap<Category, Vec<String>>,
    #[serde(default)]
    pub tag_rules: Vec<TagRule>,
}

fn terms(list: &[&str]) -> Vec<String> {
    list.iter().map(|t| t.to_string()).collect()
}

impl TopicVocabulary {
    /// Same vocabulary as `rules/topics.yaml`.
    pub fn builtin() -> Self {
        let mut categories = BTreeMap::new();
        categories.insert(
            Category::Regulation,
            terms(&[
                "loi", "réglementation", "regulation", "law", "décret", "arrêté", "interdiction",
                "ban", "amende", "fine", "code de la route", "legislation",
            ]),
        );
        categories.insert(
            Category::Safety,
            terms(&[
                "sécurité", "safety", "accident", "casque", "helmet", "blessé", "injury", "crash",
                "danger",
            ]),
        );
        categories.insert(
            Category::Technology,
            terms(&[
                "batterie", "battery", "autonomie", "moteur", "motor", "innovation", "recharge",
                "charging",
            ]),
        );
        categories.insert(
            Category::UrbanMobility,
            terms(&[
                "mobilité", "mobility", "ville", "city", "transport", "piste cyclable", "bike lane",
                "urbain", "urban", "libre-service", "sharing",
            ]),
        );
        let rule = |tag: &str, needles: &[&str]| TagRule {
            tag: tag.to_string(),
            contains_any: terms(needles),
        };
        Self {
            version: 1,
            relevance_keywords: terms(&[
                "trottinette",
                "trottinettes",
                "trottinette électrique",
                "e-scooter",
                "e-scooters",
                "electric scooter",
                "scooter électrique",
                "edpm",
                "micromobilité",
                "micromobility",
            ]),
            categories,
            tag_rules: vec![
                rule("helmet", &["casque", "helmet"]),
                rule("speed-limit", &["vitesse", "speed limit", "km/h"]),
                rule(
                    "shared-fleet",
                    &["libre-service", "free-floating", "sharing", "lime", "dott", "tier"],
                ),
                rule("insurance", &["assurance", "insurance"]),
                rule("fines", &["amende", "fine", "fines"]),
                rule("paris", &["paris"]),
            ],
        }
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading topic vocabulary {}", path.display()))?;
        let vocabulary: TopicVocabulary = serde_yaml::from_str(&raw)
            .with_context(|| format!("parsing topic vocabulary {}", path.display()))?;
        Ok(vocabulary.normalized())
    }

    pub fn from_optional_path(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::builtin()),
        }
    }

    fn normalized(mut self) -> Self {
        let lower = |list: &mut Vec<String>| {
            for term in list.iter_mut() {
                *term = term.trim().to_lowercase();
            }
            list.retain(|t| !t.is_empty());
        };
        lower(&mut self.relevance_keywords);
        for list in self.categories.values_mut() {
            lower(list);
        }
        for rule in &mut self.tag_rules {
            lower(&mut rule.contains_any);
        }
        self
    }

    /// Number of distinct relevance keywords present in already-lowercased `text`.
    pub fn relevance_hits(&self, text: &str) -> usize {
        count_hits(text, &self.relevance_keywords)
    }

    /// Category with the most keyword hits; ties go to the earlier entry of
    /// [`Category::PRIORITY`], no hits at all to [`Category::General`].
    pub fn classify(&self, text: &str) -> Category {
        let mut best = (Category::General, 0usize);
        for category in Category::PRIORITY {
            let hits = self
                .categories
                .get(&category)
                .map(|keywords| count_hits(text, keywords))
                .unwrap_or(0);
            if hits > best.1 {
                best = (category, hits);
            }
        }
        best.0
    }

    pub fn tags_for(&self, text: &str) -> BTreeSet<String> {
        self.tag_rules
            .iter()
            .filter(|rule| rule.contains_any.iter().any(|needle| contains_term(text, needle)))
            .map(|rule| rule.tag.clone())
            .collect()
    }
}

fn count_hits(text: &str, keywords: &[String]) -> usize {
    keywords.iter().filter(|k| contains_term(text, k)).count()
}

/// Substring match that refuses to start or end inside a word, so "ban" does not
/// match "banlieue" and "loi" does not match "emploi".
pub(crate) fn contains_term(text: &str, term: &str) -> bool {
    if term.is_empty() {
        return false;
    }
    let starts_alnum = term.chars().next().map(char::is_alphanumeric).unwrap_or(false);
    let ends_alnum = term.chars().last().map(char::is_alphanumeric).unwrap_or(false);
    text.match_indices(term).any(|(at, _)| {
        let before_ok = !starts_alnum
            || text[..at]
                .chars()
                .next_back()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true);
        let after_ok = !ends_alnum
            || text[at + term.len()..]
                .chars()
                .next()
                .map(|c| !c.is_alphanumeric())
                .unwrap_or(true);
        before_ok && after_ok
    })
}

pub trait EnrichmentHook: Send + Sync {
    fn apply(&self, items: Vec<ContentItem>) -> Vec<ContentItem>;
}

#[derive(Default)]
pub struct NoopEnrichmentHook;

impl EnrichmentHook for NoopEnrichmentHook {
    fn apply(&self, items: Vec<ContentItem>) -> Vec<ContentItem> {
        items
    }
}

/// Assigns category and tags from a [`TopicVocabulary`]. Existing tags are kept.
pub struct VocabularyEnrichmentHook {
    vocabulary: std::sync::Arc<TopicVocabulary>,
}

impl VocabularyEnrichmentHook {
    pub fn new(vocabulary: std::sync::Arc<TopicVocabulary>) -> Self {
        Self { vocabulary }
    }
}

impl EnrichmentHook for VocabularyEnrichmentHook {
    fn apply(&self, mut items: Vec<ContentItem>) -> Vec<ContentItem> {
        for item in &mut items {
            let text = item.searchable_text();
            let category = self.vocabulary.classify(&text);
            let tags = self.vocabulary.tags_for(&text);
            let meta = item.meta_mut();
            meta.category = category;
            meta.tags.extend(tags);
        }
        items
    }
}
