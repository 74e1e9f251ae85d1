//! Wires configuration into the running services shared by the web layer, the CLI and
//! the scheduler.

use std::sync::Arc;

use anyhow::{Context, Result};
use portal_adapters::{configured_sources, ContentSource};
use portal_storage::{
    ContentStore, HttpFetcher, InMemoryContentStore, InMemoryJobStore, InMemoryRunStore,
    InProcessLock, ListingCache, PgContentStore, QuotaTracker, RunLock,
};
use tracing::{info, warn};

use crate::cleanup::CleanupService;
use crate::config::PortalConfig;
use crate::full_sync::{FullSyncManager, FullSyncSettings};
use crate::orchestrator::{SyncOrchestrator, SyncSettings};
use crate::pipeline::Ingestor;
use crate::relevance::RelevanceScorer;
use crate::topics::{TopicVocabulary, VocabularyEnrichmentHook};
use crate::webhook::WebhookNotifier;

const PG_MAX_CONNECTIONS: u32 = 5;

pub struct SyncServices {
    pub config: PortalConfig,
    pub store: Arc<dyn ContentStore>,
    pub quota: Arc<QuotaTracker>,
    pub cache: Arc<ListingCache>,
    pub orchestrator: Arc<SyncOrchestrator>,
    pub full_sync: Arc<FullSyncManager>,
    pub cleanup: Arc<CleanupService>,
}

impl SyncServices {
    /// PostgreSQL when `DATABASE_URL` is set, otherwise the in-memory store.
    pub async fn from_config(config: PortalConfig) -> Result<Self> {
        let http = Arc::new(
            HttpFetcher::new(config.http_client_config()).context("building http client")?,
        );
        let quota = Arc::new(config.quota_tracker());
        let store: Arc<dyn ContentStore> = match &config.database_url {
            Some(url) => Arc::new(
                PgContentStore::connect(url, PG_MAX_CONNECTIONS)
                    .await
                    .context("connecting to postgres")?,
            ),
            None => {
                warn!("DATABASE_URL not set; using in-memory content store");
                Arc::new(InMemoryContentStore::new())
            }
        };
        let vocabulary = TopicVocabulary::from_optional_path(config.topics_file.as_deref())?;
        let sources = configured_sources(
            config.news.clone(),
            config.video.clone(),
            http.clone(),
            quota.clone(),
        );
        info!(sources = sources.len(), queries = config.queries.len(), "services configured");
        Ok(Self::assemble(config, store, sources, quota, http, vocabulary))
    }

    pub fn assemble(
        config: PortalConfig,
        store: Arc<dyn ContentStore>,
        sources: Vec<Arc<dyn ContentSource>>,
        quota: Arc<QuotaTracker>,
        http: Arc<HttpFetcher>,
        vocabulary: TopicVocabulary,
    ) -> Self {
        let vocabulary = Arc::new(vocabulary);
        let cache = Arc::new(ListingCache::new(config.listing_cache_ttl));
        let lock: Arc<dyn RunLock> = Arc::new(InProcessLock::new());
        let ingestor = Arc::new(Ingestor::new(
            store.clone(),
            Arc::new(VocabularyEnrichmentHook::new(vocabulary.clone())),
            RelevanceScorer::new(vocabulary),
        ));

        let orchestrator = Arc::new(SyncOrchestrator::new(
            sources.clone(),
            ingestor.clone(),
            quota.clone(),
            Arc::new(InMemoryRunStore::new()),
            lock.clone(),
            cache.clone(),
            SyncSettings {
                queries: config.queries.clone(),
                pages_per_run: config.pages_per_run,
                page_size: config.page_size,
            },
        ));
        let full_sync = Arc::new(FullSyncManager::new(
            sources,
            ingestor,
            quota.clone(),
            Arc::new(InMemoryJobStore::new()),
            lock.clone(),
            cache.clone(),
            Some(WebhookNotifier::new(http)),
            FullSyncSettings {
                queries: config.queries.clone(),
                pages_per_query: config.full_sync_pages,
                batch_delay: config.full_sync_batch_delay,
                retry_backoff: config.backoff(),
            },
        ));
        let cleanup = Arc::new(CleanupService::new(
            store.clone(),
            cache.clone(),
            lock,
            config.retention,
        ));

        Self {
            config,
            store,
            quota,
            cache,
            orchestrator,
            full_sync,
            cleanup,
        }
    }
}
