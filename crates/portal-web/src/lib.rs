//! Axum JSON trigger surface for syncs, full-sync jobs, cleanup and content listings.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use portal_core::{
    ContentItem, ContentKind, FullSyncConfig, FullSyncJob, JobId, SyncRun, SyncStatus, SyncType,
};
use portal_storage::{ContentStore, ListingCache, QuotaUsage};
use portal_sync::{CancelOutcome, CleanupReport, SyncError, SyncServices};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tokio::net::TcpListener;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "portal-web";

const API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_PER_PAGE: usize = 20;
const MAX_PER_PAGE: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub services: Arc<SyncServices>,
}

pub fn app(services: Arc<SyncServices>) -> Router {
    Router::new()
        .route("/api/sync", post(start_sync_handler))
        .route("/api/sync/status", get(sync_status_handler))
        .route(
            "/api/full-sync",
            post(start_full_sync_handler).get(list_full_sync_handler),
        )
        .route(
            "/api/full-sync/{id}",
            get(full_sync_status_handler).delete(cancel_full_sync_handler),
        )
        .route("/api/cleanup", post(cleanup_handler))
        .route("/api/quota", get(quota_handler))
        .route("/api/content/{kind}", get(content_listing_handler))
        .with_state(AppState { services })
}

pub async fn serve(services: Arc<SyncServices>) -> anyhow::Result<()> {
    let port = services.config.web_port;
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web server listening");
    axum::serve(listener, app(services)).await?;
    Ok(())
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Sync(#[from] SyncError),
    #[error("missing or invalid x-api-key header")]
    Unauthorized,
    #[error("{0}")]
    BadRequest(String),
}

impl ApiError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            ApiError::Sync(err) => match err {
                SyncError::AlreadyRunning { .. } => (StatusCode::CONFLICT, "already_running"),
                SyncError::Validation(_) => (StatusCode::BAD_REQUEST, "validation"),
                SyncError::JobNotFound(_) => (StatusCode::NOT_FOUND, "job_not_found"),
                SyncError::QuotaExceeded(_) => (StatusCode::TOO_MANY_REQUESTS, "quota_exceeded"),
                SyncError::SourceUnavailable { .. } => (StatusCode::BAD_GATEWAY, "source_unavailable"),
                SyncError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage"),
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, kind) = self.classify();
        if status.is_server_error() {
            warn!(error = %self, "request failed");
        }
        let mut error = json!({
            "type": kind,
            "message": self.to_string(),
            "statusCode": status.as_u16(),
        });
        if let ApiError::Sync(SyncError::AlreadyRunning {
            active_job,
            estimated_completion,
            ..
        }) = &self
        {
            error["activeJobId"] = json!(active_job);
            error["estimatedCompletion"] = json!(estimated_completion);
        }
        (status, Json(json!({ "error": error }))).into_response()
    }
}

/// Admin routes need a configured key and an exact header match.
fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = state.services.config.admin_api_key.as_deref() else {
        return Err(ApiError::Unauthorized);
    };
    match headers.get(API_KEY_HEADER).and_then(|v| v.to_str().ok()) {
        Some(given) if given == expected => Ok(()),
        _ => Err(ApiError::Unauthorized),
    }
}

/// Empty bodies are allowed and mean "use defaults".
fn optional_json<T: DeserializeOwned>(body: &Bytes) -> Result<Option<T>, ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(None);
    }
    serde_json::from_slice(body)
        .map(Some)
        .map_err(|e| ApiError::BadRequest(format!("invalid json body: {e}")))
}

#[derive(Debug, Default, Deserialize)]
struct SyncTypeParams {
    #[serde(rename = "type")]
    sync_type: Option<String>,
}

async fn start_sync_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<SyncTypeParams>,
    body: Bytes,
) -> Result<Json<SyncRun>, ApiError> {
    require_admin(&state, &headers)?;
    let requested = match params.sync_type {
        Some(raw) => Some(raw),
        None => optional_json::<SyncTypeParams>(&body)?.and_then(|p| p.sync_type),
    };
    let sync_type = match requested {
        Some(raw) => raw
            .parse::<SyncType>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?,
        None => SyncType::Combined,
    };
    let run = state.services.orchestrator.start(sync_type).await?;
    Ok(Json(run))
}

async fn sync_status_handler(
    State(state): State<AppState>,
    Query(params): Query<SyncTypeParams>,
) -> Result<Json<Vec<SyncStatus>>, ApiError> {
    let types = match params.sync_type {
        Some(raw) => vec![raw
            .parse::<SyncType>()
            .map_err(|e| ApiError::BadRequest(e.to_string()))?],
        None => SyncType::ALL.to_vec(),
    };
    let mut statuses = Vec::with_capacity(types.len());
    for sync_type in types {
        statuses.push(state.services.orchestrator.status(sync_type).await?);
    }
    Ok(Json(statuses))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct JobAccepted {
    job_id: JobId,
    status: &'static str,
}

async fn start_full_sync_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, Json<JobAccepted>), ApiError> {
    require_admin(&state, &headers)?;
    let config: FullSyncConfig = optional_json(&body)?.unwrap_or_default();
    let job_id = state.services.full_sync.start_full_sync(config).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(JobAccepted {
            job_id,
            status: "initiated",
        }),
    ))
}

async fn list_full_sync_handler(
    State(state): State<AppState>,
) -> Result<Json<Vec<FullSyncJob>>, ApiError> {
    Ok(Json(state.services.full_sync.list_jobs().await?))
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse()
        .map_err(|_| ApiError::Sync(SyncError::JobNotFound(raw.to_string())))
}

async fn full_sync_status_handler(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<FullSyncJob>, ApiError> {
    let job_id = parse_job_id(&id)?;
    Ok(Json(state.services.full_sync.get_job(job_id).await?))
}

#[derive(Debug, Default, Deserialize)]
struct CancelParams {
    #[serde(default)]
    force: bool,
}

async fn cancel_full_sync_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Path(id): Path<String>,
    Query(params): Query<CancelParams>,
) -> Result<(StatusCode, Json<CancelOutcome>), ApiError> {
    require_admin(&state, &headers)?;
    let outcome = match id.parse::<JobId>() {
        Ok(job_id) => state.services.full_sync.cancel_job(job_id, params.force).await?,
        Err(_) => CancelOutcome {
            found: false,
            cancelled: false,
        },
    };
    let status = if outcome.found {
        StatusCode::OK
    } else {
        StatusCode::NOT_FOUND
    };
    Ok((status, Json(outcome)))
}

async fn cleanup_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<CleanupReport>, ApiError> {
    require_admin(&state, &headers)?;
    Ok(Json(state.services.cleanup.run().await?))
}

async fn quota_handler(State(state): State<AppState>) -> Json<Vec<QuotaUsage>> {
    Json(state.services.quota.snapshot().await)
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListingParams {
    page: Option<usize>,
    per_page: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ContentPage {
    kind: ContentKind,
    page: usize,
    per_page: usize,
    items: Vec<ContentItem>,
}

/// Newest first, orphans hidden. Pages are cached until the next write or cleanup.
async fn content_listing_handler(
    State(state): State<AppState>,
    Path(kind): Path<String>,
    Query(params): Query<ListingParams>,
) -> Result<Json<ContentPage>, ApiError> {
    let kind: ContentKind = kind
        .parse()
        .map_err(|e: portal_core::ParseEnumError| ApiError::BadRequest(e.to_string()))?;
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(DEFAULT_PER_PAGE).clamp(1, MAX_PER_PAGE);
    let key = ListingCache::listing_key(kind, page, per_page);

    let cache = &state.services.cache;
    let items = match cache.get(&key).await {
        Some(items) => items,
        None => {
            let mut all = state
                .services
                .store
                .list_all(kind)
                .await
                .map_err(SyncError::from)?;
            all.retain(|item| !item.is_orphaned());
            all.sort_by(|a, b| b.published_at().cmp(&a.published_at()));
            let slice = all
                .into_iter()
                .skip((page - 1) * per_page)
                .take(per_page)
                .collect();
            cache.put(key, slice).await
        }
    };

    Ok(Json(ContentPage {
        kind,
        page,
        per_page,
        items: (*items).clone(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use portal_adapters::{AdapterError, ContentSource};
    use portal_core::NewsArticle;
    use portal_storage::{HttpClientConfig, HttpFetcher, InMemoryContentStore, QuotaLimit, QuotaTracker};
    use portal_sync::{PortalConfig, TopicVocabulary};
    use serde_json::Value;
    use std::time::Duration;
    use tower::ServiceExt;

    struct StaticNews;

    #[async_trait]
    impl ContentSource for StaticNews {
        fn source_id(&self) -> &'static str {
            "static-news"
        }

        fn kind(&self) -> ContentKind {
            ContentKind::News
        }

        fn quota_api(&self) -> &'static str {
            "static"
        }

        async fn fetch_batch(
            &self,
            query: &str,
            page: u32,
            _page_size: u32,
        ) -> Result<Vec<ContentItem>, AdapterError> {
            Ok(vec![NewsArticle::new(
                format!("https://example.org/{query}/{page}"),
                "Trottinette: nouvelle loi",
                "Amende de 135 euros",
                Utc::now(),
            )
            .into()])
        }
    }

    fn test_app() -> Router {
        let config = PortalConfig {
            admin_api_key: Some("secret".into()),
            queries: vec!["trottinette".into()],
            full_sync_batch_delay: Duration::ZERO,
            ..PortalConfig::default()
        };
        let source: Arc<dyn ContentSource> = Arc::new(StaticNews);
        let services = SyncServices::assemble(
            config,
            Arc::new(InMemoryContentStore::new()),
            vec![source],
            Arc::new(QuotaTracker::new().with_limit(
                "static",
                QuotaLimit {
                    daily_limit: 10,
                    cost_per_call: 1,
                },
            )),
            Arc::new(HttpFetcher::new(HttpClientConfig::default()).unwrap()),
            TopicVocabulary::builtin(),
        );
        app(Arc::new(services))
    }

    fn request(method: &str, uri: &str, key: Option<&str>, body: &str) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
        let resp = app.clone().oneshot(req).await.unwrap();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let value = if body.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn status_lists_every_sync_type() {
        let app = test_app();
        let (status, body) = send(&app, request("GET", "/api/sync/status", None, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 3);
        assert_eq!(body[0]["state"], "idle");
    }

    #[tokio::test]
    async fn quota_usage_is_reported_per_api() {
        let app = test_app();
        let (status, body) = send(&app, request("GET", "/api/quota", None, "")).await;
        assert_eq!(status, StatusCode::OK);
        let usage = body.as_array().unwrap();
        assert_eq!(usage.len(), 1);
        assert_eq!(usage[0]["api"], "static");
        assert_eq!(usage[0]["used"], 0);
        assert_eq!(usage[0]["remainingCalls"], 10);
    }

    #[tokio::test]
    async fn admin_routes_require_the_api_key() {
        let app = test_app();
        let (status, body) = send(&app, request("POST", "/api/cleanup", None, "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["type"], "unauthorized");
        assert_eq!(body["error"]["statusCode"], 401);

        let (status, _) = send(&app, request("POST", "/api/cleanup", Some("wrong"), "")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) = send(&app, request("POST", "/api/cleanup", Some("secret"), "")).await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["byKind"]["news"].is_object());
    }

    #[tokio::test]
    async fn sync_then_list_content() {
        let app = test_app();
        let (status, run) = send(
            &app,
            request("POST", "/api/sync", Some("secret"), r#"{"type":"news"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(run["syncType"], "news");
        assert_eq!(run["createdCount"], 1);

        let (status, listing) = send(&app, request("GET", "/api/content/news?perPage=5", None, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(listing["perPage"], 5);
        let items = listing["items"].as_array().unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0]["category"], "regulation");

        let (status, _) = send(&app, request("GET", "/api/content/podcasts", None, "")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn full_sync_is_accepted_and_pollable() {
        let app = test_app();
        let (status, accepted) = send(
            &app,
            request("POST", "/api/full-sync", Some("secret"), r#"{"batchSize": 5, "priority": "high"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(accepted["status"], "initiated");
        let job_id = accepted["jobId"].as_str().unwrap().to_string();

        let (status, job) = send(&app, request("GET", &format!("/api/full-sync/{job_id}"), None, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(job["jobId"], job_id.as_str());

        let (status, jobs) = send(&app, request("GET", "/api/full-sync", None, "")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(jobs.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_full_sync_config_is_a_validation_error() {
        let app = test_app();
        let (status, body) = send(
            &app,
            request("POST", "/api/full-sync", Some("secret"), r#"{"batchSize": 0}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "validation");

        let (status, body) = send(&app, request("POST", "/api/full-sync", Some("secret"), "{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "bad_request");
    }

    #[tokio::test]
    async fn unknown_jobs_are_not_found() {
        let app = test_app();
        let missing = JobId::new();
        let (status, body) = send(&app, request("GET", &format!("/api/full-sync/{missing}"), None, "")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["type"], "job_not_found");

        let (status, body) = send(
            &app,
            request("DELETE", &format!("/api/full-sync/{missing}?force=true"), Some("secret"), ""),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["found"], false);
        assert_eq!(body["cancelled"], false);
    }

    #[test]
    fn conflict_body_carries_the_active_job() {
        let job_id = JobId::new();
        let err = ApiError::Sync(SyncError::AlreadyRunning {
            scope: "full-sync".into(),
            active_job: Some(job_id),
            estimated_completion: None,
        });
        assert_eq!(err.classify().0, StatusCode::CONFLICT);
        let resp = err.into_response();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }
}
