//! First-occurrence-wins deduplication by natural key.

use std::collections::HashSet;

use portal_core::{ContentItem, NaturalKey};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DedupOutcome {
    pub accepted: Vec<ContentItem>,
    pub rejected: Vec<ContentItem>,
}

impl DedupOutcome {
    pub fn rejected_count(&self) -> usize {
        self.rejected.len()
    }
}

/// Linear in the batch size: one hash lookup per incoming item. Items without a
/// natural key pass through; orphan handling happens elsewhere.
#[derive(Debug, Clone, Copy, Default)]
pub struct DedupEngine;

impl DedupEngine {
    pub fn new() -> Self {
        Self
    }

    /// Accepts the first occurrence of each key not already in `existing`.
    pub fn dedupe(&self, existing: &HashSet<NaturalKey>, incoming: Vec<ContentItem>) -> DedupOutcome {
        let mut batch = HashSet::with_capacity(incoming.len());
        let mut outcome = DedupOutcome::default();
        for item in incoming {
            let duplicate = match item.natural_key() {
                Some(key) => existing.contains(&key) || !batch.insert(key),
                None => false,
            };
            if duplicate {
                outcome.rejected.push(item);
            } else {
                outcome.accepted.push(item);
            }
        }
        outcome
    }

    /// Like [`dedupe`](Self::dedupe), but records accepted keys in `seen` so later
    /// batches of the same job reject them too.
    pub fn dedupe_into(&self, seen: &mut HashSet<NaturalKey>, incoming: Vec<ContentItem>) -> DedupOutcome {
        let mut outcome = DedupOutcome::default();
        for item in incoming {
            let duplicate = item.natural_key().map(|key| !seen.insert(key)).unwrap_or(false);
            if duplicate {
                outcome.rejected.push(item);
            } else {
                outcome.accepted.push(item);
            }
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use portal_core::{NewsArticle, Video};

    fn news(url: &str, title: &str) -> ContentItem {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        NewsArticle::new(url, title, "d", at).into()
    }

    fn titles(items: &[ContentItem]) -> Vec<&str> {
        items.iter().filter_map(ContentItem::title).collect()
    }

    #[test]
    fn first_occurrence_wins_within_batch() {
        let out = DedupEngine::new().dedupe(
            &HashSet::new(),
            vec![news("x", "A"), news("y", "B"), news("x", "C")],
        );
        assert_eq!(titles(&out.accepted), vec!["A", "B"]);
        assert_eq!(out.rejected_count(), 1);
        assert_eq!(titles(&out.rejected), vec!["C"]);
    }

    #[test]
    fn existing_keys_are_rejected() {
        let existing: HashSet<NaturalKey> = [NaturalKey::SourceUrl("y".into())].into();
        let out = DedupEngine::new().dedupe(&existing, vec![news("x", "A"), news("y", "B")]);
        assert_eq!(titles(&out.accepted), vec!["A"]);
        assert_eq!(out.rejected_count(), 1);
    }

    #[test]
    fn same_raw_value_in_different_kinds_does_not_collide() {
        let at = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).single().unwrap();
        let video: ContentItem = Video::new("x", "V", "d", at).into();
        let out = DedupEngine::new().dedupe(&HashSet::new(), vec![news("x", "A"), video]);
        assert_eq!(out.accepted.len(), 2);
    }

    #[test]
    fn keyless_items_pass_through() {
        let mut keyless = news("", "No url");
        if let ContentItem::News(a) = &mut keyless {
            a.source_url = None;
        }
        let out = DedupEngine::new().dedupe(&HashSet::new(), vec![keyless.clone(), keyless]);
        assert_eq!(out.accepted.len(), 2);
    }

    #[test]
    fn dedupe_into_accumulates_across_batches() {
        let engine = DedupEngine::new();
        let mut seen = HashSet::new();
        let first = engine.dedupe_into(&mut seen, vec![news("x", "A"), news("x", "B")]);
        let second = engine.dedupe_into(&mut seen, vec![news("x", "C"), news("z", "D")]);
        assert_eq!(titles(&first.accepted), vec!["A"]);
        assert_eq!(titles(&second.accepted), vec!["D"]);
        assert_eq!(first.rejected_count() + second.rejected_count(), 2);
    }

    #[test]
    fn accepted_keys_are_unique_for_arbitrary_batches() {
        let urls = ["a", "b", "a", "c", "b", "b", "d", "a"];
        let batch: Vec<ContentItem> = urls
            .iter()
            .enumerate()
            .map(|(i, u)| news(u, &format!("t{i}")))
            .collect();
        let out = DedupEngine::new().dedupe(&HashSet::new(), batch);
        let keys: HashSet<_> = out.accepted.iter().filter_map(ContentItem::natural_key).collect();
        assert_eq!(keys.len(), out.accepted.len());
        assert_eq!(titles(&out.accepted), vec!["t0", "t1", "t3", "t6"]);
        assert_eq!(out.accepted.len() + out.rejected_count(), urls.len());
    }
}
