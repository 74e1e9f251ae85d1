//! Validate → enrich → score → dedupe → upsert, shared by regular and full syncs.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use portal_core::{ContentItem, NaturalKey, RunError};
use portal_storage::{ContentStore, StorageError, UpsertOutcome};
use tracing::debug;

use crate::dedup::DedupEngine;
use crate::relevance::RelevanceScorer;
use crate::topics::EnrichmentHook;

#[derive(Debug, Default)]
pub struct IngestOutcome {
    pub fetched: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    /// Failed validation or lost to a duplicate.
    pub rejected: usize,
    pub errors: Vec<RunError>,
    /// Items written (or confirmed unchanged) in this pass, as stored.
    pub stored: Vec<ContentItem>,
    /// Set when an upsert failed; items after the failing one were not attempted.
    pub storage_failure: Option<StorageError>,
}

impl IngestOutcome {
    pub fn wrote_anything(&self) -> bool {
        self.created + self.updated > 0
    }
}

pub struct Ingestor {
    store: Arc<dyn ContentStore>,
    enrichment: Arc<dyn EnrichmentHook>,
    scorer: RelevanceScorer,
    dedup: DedupEngine,
}

impl Ingestor {
    pub fn new(
        store: Arc<dyn ContentStore>,
        enrichment: Arc<dyn EnrichmentHook>,
        scorer: RelevanceScorer,
    ) -> Self {
        Self {
            store,
            enrichment,
            scorer,
            dedup: DedupEngine::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn ContentStore> {
        &self.store
    }

    /// Items whose key is already in `seen` are rejected; accepted keys are added to it.
    pub async fn ingest(
        &self,
        items: Vec<ContentItem>,
        seen: &mut HashSet<NaturalKey>,
        as_of: DateTime<Utc>,
    ) -> IngestOutcome {
        let mut outcome = IngestOutcome {
            fetched: items.len(),
            ..Default::default()
        };

        let mut valid = Vec::with_capacity(items.len());
        for item in items {
            let missing = item.missing_required_fields();
            if missing.is_empty() {
                valid.push(item);
            } else {
                outcome.rejected += 1;
                outcome.errors.push(RunError::new(
                    item.item_ref(),
                    format!("validation failed: missing {}", missing.join(", ")),
                ));
            }
        }

        let mut enriched = self.enrichment.apply(valid);
        for item in &mut enriched {
            let score = self.scorer.score(item, as_of);
            item.meta_mut().relevance_score = score;
        }

        let deduped = self.dedup.dedupe_into(seen, enriched);
        if deduped.rejected_count() > 0 {
            debug!(duplicates = deduped.rejected_count(), "dropped duplicate items");
        }
        outcome.rejected += deduped.rejected_count();

        for item in deduped.accepted {
            match self.store.upsert(item.clone()).await {
                Ok(UpsertOutcome::Created) => outcome.created += 1,
                Ok(UpsertOutcome::Updated) => outcome.updated += 1,
                Ok(UpsertOutcome::Unchanged) => outcome.unchanged += 1,
                Err(err) => {
                    outcome
                        .errors
                        .push(RunError::new(item.item_ref(), format!("storage: {err}")));
                    outcome.storage_failure = Some(err);
                    break;
                }
            }
            outcome.stored.push(item);
        }
        outcome
    }
}
