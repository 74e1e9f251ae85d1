#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use portal_adapters::{AdapterError, ContentSource};
use portal_core::{ContentItem, ContentKind, FullSyncJob, JobId, NewsArticle, Video};
use portal_storage::{
    BackoffPolicy, ContentStore, InMemoryJobStore, InMemoryRunStore, InProcessLock, ListingCache,
    QuotaTracker, RunLock, RunStore,
};
use portal_sync::{
    FullSyncManager, FullSyncSettings, Ingestor, RelevanceScorer, SyncOrchestrator, SyncSettings,
    TopicVocabulary, VocabularyEnrichmentHook,
};
use tokio::sync::Notify;

pub const FAKE_API: &str = "fake-api";

/// Holds a source inside `fetch_batch` until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

type Responder = Box<dyn Fn(&str, u32, u32) -> Vec<ContentItem> + Send + Sync>;

pub struct ScriptedSource {
    id: &'static str,
    kind: ContentKind,
    responder: Responder,
    failures: Mutex<VecDeque<AdapterError>>,
    gate: Option<Arc<Gate>>,
    pub calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(
        id: &'static str,
        kind: ContentKind,
        responder: impl Fn(&str, u32, u32) -> Vec<ContentItem> + Send + Sync + 'static,
    ) -> Self {
        Self {
            id,
            kind,
            responder: Box::new(responder),
            failures: Mutex::new(VecDeque::new()),
            gate: None,
            calls: AtomicUsize::new(0),
        }
    }

    /// Full pages of distinct articles for every query and page.
    pub fn news(id: &'static str) -> Self {
        Self::new(id, ContentKind::News, |query, page, size| {
            news_page(&format!("{query}/{page}"), size as usize)
        })
    }

    pub fn with_gate(mut self, gate: Arc<Gate>) -> Self {
        self.gate = Some(gate);
        self
    }

    /// Errors returned, in order, by the next calls before the responder is used.
    pub fn failing_first(self, errors: Vec<AdapterError>) -> Self {
        *self.failures.lock().unwrap() = errors.into();
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ContentSource for ScriptedSource {
    fn source_id(&self) -> &'static str {
        self.id
    }

    fn kind(&self) -> ContentKind {
        self.kind
    }

    fn quota_api(&self) -> &'static str {
        FAKE_API
    }

    async fn fetch_batch(
        &self,
        query: &str,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<ContentItem>, AdapterError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let failure = self.failures.lock().unwrap().pop_front();
        if let Some(err) = failure {
            return Err(err);
        }
        Ok((self.responder)(query, page, page_size))
    }
}

pub fn transient(id: &'static str) -> AdapterError {
    AdapterError::SourceUnavailable {
        source_id: id,
        message: "upstream returned 503".into(),
        retryable: true,
    }
}

pub fn permanent(id: &'static str) -> AdapterError {
    AdapterError::SourceUnavailable {
        source_id: id,
        message: "upstream returned 401".into(),
        retryable: false,
    }
}

pub fn news_page(prefix: &str, count: usize) -> Vec<ContentItem> {
    (0..count)
        .map(|i| {
            NewsArticle::new(
                format!("https://example.org/{prefix}/{i}"),
                format!("Trottinette électrique {prefix} {i}"),
                "Nouvelle réglementation",
                Utc::now(),
            )
            .into()
        })
        .collect()
}

pub fn video_page(prefix: &str, count: usize) -> Vec<ContentItem> {
    (0..count)
        .map(|i| Video::new(format!("{prefix}-{i}"), "E-scooter helmet test", "", Utc::now()).into())
        .collect()
}

pub fn ingestor(store: Arc<dyn ContentStore>) -> Arc<Ingestor> {
    let vocabulary = Arc::new(TopicVocabulary::builtin());
    Arc::new(Ingestor::new(
        store,
        Arc::new(VocabularyEnrichmentHook::new(vocabulary.clone())),
        RelevanceScorer::new(vocabulary),
    ))
}

pub fn orchestrator(
    sources: Vec<Arc<dyn ContentSource>>,
    store: Arc<dyn ContentStore>,
    cache: Arc<ListingCache>,
) -> Arc<SyncOrchestrator> {
    orchestrator_with_runs(sources, store, cache, Arc::new(InMemoryRunStore::new()))
}

pub fn orchestrator_with_runs(
    sources: Vec<Arc<dyn ContentSource>>,
    store: Arc<dyn ContentStore>,
    cache: Arc<ListingCache>,
    runs: Arc<dyn RunStore>,
) -> Arc<SyncOrchestrator> {
    Arc::new(SyncOrchestrator::new(
        sources,
        ingestor(store),
        Arc::new(QuotaTracker::new()),
        runs,
        Arc::new(InProcessLock::new()),
        cache,
        SyncSettings {
            queries: vec!["trottinette".into()],
            pages_per_run: 1,
            page_size: 5,
        },
    ))
}

pub fn full_sync_settings(pages_per_query: u32) -> FullSyncSettings {
    FullSyncSettings {
        queries: vec!["trottinette".into()],
        pages_per_query,
        batch_delay: Duration::ZERO,
        retry_backoff: BackoffPolicy {
            max_attempts: 1,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
        },
    }
}

pub fn full_sync_manager(
    sources: Vec<Arc<dyn ContentSource>>,
    store: Arc<dyn ContentStore>,
    quota: QuotaTracker,
    settings: FullSyncSettings,
) -> Arc<FullSyncManager> {
    let lock: Arc<dyn RunLock> = Arc::new(InProcessLock::new());
    Arc::new(FullSyncManager::new(
        sources,
        ingestor(store),
        Arc::new(quota),
        Arc::new(InMemoryJobStore::new()),
        lock,
        Arc::new(ListingCache::new(Duration::from_secs(60))),
        None,
        settings,
    ))
}

pub async fn wait_until_finished(manager: &FullSyncManager, job_id: JobId) -> FullSyncJob {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let job = manager.get_job(job_id).await.unwrap();
            if job.status.is_terminal() && job.result.is_some() {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("job did not finish in time")
}
