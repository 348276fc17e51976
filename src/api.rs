//! Admin HTTP API: direct translation, per-post translation status, queue
//! submission and queue maintenance.

use crate::context::AppContext;
use crate::error::TranslateError;
use crate::orchestrator::{LanguageStatus, SkipReason, TranslationOutcome};
use crate::queue::{BatchReport, QueueItem, QueueStats};
use crate::security::{is_authorized, API_KEY_HEADER};
use crate::store::PostId;
use axum::{
    extract::{Path, Query, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    pub post_id: PostId,
    /// Falls back to the configured target languages.
    pub languages: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct TranslateResponse {
    pub post_id: PostId,
    pub results: BTreeMap<String, OutcomeView>,
}

#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum OutcomeView {
    Created { post_id: PostId },
    Skipped { reason: SkipReason },
    Failed { error: String, retryable: bool },
}

impl From<TranslationOutcome> for OutcomeView {
    fn from(outcome: TranslationOutcome) -> Self {
        match outcome {
            TranslationOutcome::Created(post_id) => OutcomeView::Created { post_id },
            TranslationOutcome::Skipped(reason) => OutcomeView::Skipped { reason },
            TranslationOutcome::Failed(e) => OutcomeView::Failed {
                retryable: e.is_retryable(),
                error: e.to_string(),
            },
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct StatusQuery {
    /// Comma separated language codes; the configured targets when absent.
    pub languages: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub post_id: PostId,
    pub languages: BTreeMap<String, LanguageStatus>,
}

#[derive(Debug, Deserialize)]
pub struct EnqueueRequest {
    pub post_ids: Vec<PostId>,
    pub languages: Option<Vec<String>>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub queued: usize,
    pub items: Vec<QueueItem>,
}

#[derive(Debug, Deserialize)]
pub struct ItemsQuery {
    /// Comma separated post ids.
    pub post_ids: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct PurgeRequest {
    pub days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ProcessRequest {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct CountResponse {
    pub count: u64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub struct ApiError(StatusCode, String);

impl From<TranslateError> for ApiError {
    fn from(err: TranslateError) -> Self {
        let status = match err {
            TranslateError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError(status, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.0, Json(ErrorResponse { error: self.1 })).into_response()
    }
}

type ApiResult<T> = Result<Json<T>, ApiError>;

pub fn router(ctx: Arc<AppContext>) -> Router {
    let admin = Router::new()
        .route("/translate", post(translate_post))
        .route("/translations/:post_id", get(translation_status))
        .route("/queue", post(enqueue))
        .route("/queue/status", get(queue_status))
        .route("/queue/items", get(queue_items))
        .route("/queue/retry", post(retry_failed))
        .route("/queue/purge", post(purge))
        .route("/queue/process", post(process))
        .route_layer(middleware::from_fn_with_state(Arc::clone(&ctx), require_api_key));

    Router::new()
        .route("/health", get(health))
        .merge(admin)
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}

async fn require_api_key(State(ctx): State<Arc<AppContext>>, request: Request, next: Next) -> Response {
    let provided = request
        .headers()
        .get(API_KEY_HEADER)
        .and_then(|v| v.to_str().ok());

    if !is_authorized(ctx.api_key.as_deref(), provided) {
        warn!("Rejected {} {}: invalid or missing API key", request.method(), request.uri().path());
        return ApiError(StatusCode::UNAUTHORIZED, "invalid or missing API key".to_string()).into_response();
    }
    next.run(request).await
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

fn languages_or_default(ctx: &AppContext, languages: Option<Vec<String>>) -> Vec<String> {
    languages.unwrap_or_else(|| ctx.target_languages.clone())
}

async fn translate_post(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<TranslateRequest>,
) -> ApiResult<TranslateResponse> {
    let languages: BTreeSet<String> = languages_or_default(&ctx, request.languages)
        .into_iter()
        .collect();
    info!("Direct translation of post {} into {:?}", request.post_id, languages);

    let results = ctx.orchestrator.translate(request.post_id, &languages).await?;
    Ok(Json(TranslateResponse {
        post_id: request.post_id,
        results: results
            .into_iter()
            .map(|(lang, outcome)| (lang, outcome.into()))
            .collect(),
    }))
}

async fn translation_status(
    State(ctx): State<Arc<AppContext>>,
    Path(post_id): Path<PostId>,
    Query(query): Query<StatusQuery>,
) -> ApiResult<StatusResponse> {
    let languages = match query.languages {
        Some(raw) => raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
        None => ctx.target_languages.clone(),
    };
    let languages = ctx.orchestrator.translation_status(post_id, &languages).await?;
    Ok(Json(StatusResponse { post_id, languages }))
}

async fn enqueue(
    State(ctx): State<Arc<AppContext>>,
    Json(request): Json<EnqueueRequest>,
) -> Result<(StatusCode, Json<EnqueueResponse>), ApiError> {
    let languages = languages_or_default(&ctx, request.languages);
    let items = ctx.queue.enqueue(&request.post_ids, &languages).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            queued: items.len(),
            items,
        }),
    ))
}

async fn queue_status(State(ctx): State<Arc<AppContext>>) -> ApiResult<QueueStats> {
    Ok(Json(ctx.queue.stats().await?))
}

async fn queue_items(
    State(ctx): State<Arc<AppContext>>,
    Query(query): Query<ItemsQuery>,
) -> ApiResult<Vec<QueueItem>> {
    let post_ids = parse_post_ids(&query.post_ids)?;
    Ok(Json(ctx.queue.items_for_posts(&post_ids).await?))
}

fn parse_post_ids(raw: &str) -> Result<Vec<PostId>, ApiError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<PostId>()
                .map_err(|_| ApiError(StatusCode::BAD_REQUEST, format!("invalid post id '{}'", s)))
        })
        .collect()
}

async fn retry_failed(State(ctx): State<Arc<AppContext>>) -> ApiResult<CountResponse> {
    let count = ctx.queue.retry_failed().await?;
    Ok(Json(CountResponse { count }))
}

async fn purge(
    State(ctx): State<Arc<AppContext>>,
    request: Option<Json<PurgeRequest>>,
) -> ApiResult<CountResponse> {
    let days = request
        .and_then(|Json(r)| r.days)
        .unwrap_or(ctx.retention_days);
    let count = ctx.queue.purge_old(days).await?;
    Ok(Json(CountResponse { count }))
}

async fn process(
    State(ctx): State<Arc<AppContext>>,
    request: Option<Json<ProcessRequest>>,
) -> ApiResult<BatchReport> {
    let limit = request
        .and_then(|Json(r)| r.limit)
        .unwrap_or(ctx.batch_size);
    Ok(Json(ctx.queue.process_batch(limit).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::context::Stores;
    use crate::store::memory::{MemoryLinkStore, MemoryPostStore};
    use crate::store::{LinkStore, NewPost, PostStatus, PostStore};
    use crate::translator::Translator;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    struct Upper;

    #[async_trait]
    impl Translator for Upper {
        async fn translate(&self, text: &str, _target_language: &str) -> Result<String, TranslateError> {
            if text.contains("FAIL") {
                return Err(TranslateError::CapabilityFailure("upstream 503".to_string()));
            }
            Ok(text.to_uppercase())
        }

        fn provider_name(&self) -> &str {
            "upper"
        }
    }

    struct TestApp {
        router: Router,
        posts: Arc<MemoryPostStore>,
        links: Arc<MemoryLinkStore>,
    }

    fn app_with(api_key: Option<&str>) -> TestApp {
        let config = Config::from_lookup(|key| match key {
            "OPENAI_API_KEY" => Some("sk".to_string()),
            "DATABASE_URL" => Some("postgres://localhost/x".to_string()),
            "TARGET_LANGUAGES" => Some("es,en".to_string()),
            "API_KEY" => api_key.map(str::to_string),
            _ => None,
        })
        .unwrap();

        let posts = Arc::new(MemoryPostStore::new());
        let links = Arc::new(MemoryLinkStore::new());
        let stores = Stores {
            posts: posts.clone(),
            links: links.clone(),
            ..Stores::memory()
        };
        let ctx = Arc::new(AppContext::new(&config, stores, Arc::new(Upper)));
        TestApp {
            router: router(ctx),
            posts,
            links,
        }
    }

    async fn seed(posts: &MemoryPostStore, title: &str) -> PostId {
        posts
            .create_post(NewPost {
                title: title.to_string(),
                body: "<p>corps</p>".to_string(),
                excerpt: String::new(),
                post_type: "post".to_string(),
                status: PostStatus::Publish,
                author_id: 1,
            })
            .await
            .unwrap()
    }

    async fn send(router: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        send_with_key(router, method, uri, body, None).await
    }

    async fn send_with_key(
        router: &Router,
        method: Method,
        uri: &str,
        body: Option<Value>,
        key: Option<&str>,
    ) -> (StatusCode, Value) {
        let mut builder = axum::http::Request::builder().method(method).uri(uri);
        if let Some(key) = key {
            builder = builder.header(API_KEY_HEADER, key);
        }
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app_with(Some("secret"));
        let (status, body) = send(&app.router, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_admin_routes_require_api_key() {
        let app = app_with(Some("secret"));

        let (status, body) = send(&app.router, Method::GET, "/queue/status", None).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(body["error"].as_str().unwrap().contains("API key"));

        let (status, _) =
            send_with_key(&app.router, Method::GET, "/queue/status", None, Some("wrong")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, body) =
            send_with_key(&app.router, Method::GET, "/queue/status", None, Some("secret")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pending"], 0);
    }

    #[tokio::test]
    async fn test_translate_uses_default_languages() {
        let app = app_with(None);
        let post_id = seed(&app.posts, "Bonjour").await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/translate",
            Some(json!({ "post_id": post_id })),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"]["es"]["status"], "created");
        assert_eq!(body["results"]["en"]["status"], "created");

        let new_id = body["results"]["es"]["post_id"].as_i64().unwrap();
        let created = app.posts.get_post(new_id).await.unwrap().unwrap();
        assert_eq!(created.title, "BONJOUR");
        assert_eq!(app.links.language_of(new_id).await.unwrap().as_deref(), Some("es"));
    }

    #[tokio::test]
    async fn test_translate_reports_skips_and_failures() {
        let app = app_with(None);
        let ok = seed(&app.posts, "Bonjour").await;
        let bad = seed(&app.posts, "FAIL").await;

        send(&app.router, Method::POST, "/translate", Some(json!({ "post_id": ok, "languages": ["es"] }))).await;
        let (_, body) = send(
            &app.router,
            Method::POST,
            "/translate",
            Some(json!({ "post_id": ok, "languages": ["es"] })),
        )
        .await;
        assert_eq!(body["results"]["es"], json!({ "status": "skipped", "reason": "already_exists" }));

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/translate",
            Some(json!({ "post_id": bad, "languages": ["es"] })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["results"]["es"]["status"], "failed");
        assert_eq!(body["results"]["es"]["retryable"], true);
    }

    #[tokio::test]
    async fn test_translate_invalid_input_is_bad_request() {
        let app = app_with(None);

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/translate",
            Some(json!({ "post_id": 404, "languages": ["es"] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("404"));

        let post_id = seed(&app.posts, "Bonjour").await;
        let (status, _) = send(
            &app.router,
            Method::POST,
            "/translate",
            Some(json!({ "post_id": post_id, "languages": [] })),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_translation_status() {
        let app = app_with(None);
        let post_id = seed(&app.posts, "Bonjour").await;
        send(&app.router, Method::POST, "/translate", Some(json!({ "post_id": post_id, "languages": ["es"] }))).await;

        let uri = format!("/translations/{}", post_id);
        let (status, body) = send(&app.router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["post_id"], post_id);
        assert_eq!(body["languages"]["es"]["exists"], true);
        assert_eq!(body["languages"]["es"]["status"], "draft");
        assert_eq!(
            body["languages"]["en"],
            json!({ "exists": false, "post_id": null, "status": null })
        );

        let uri = format!("/translations/{}?languages=fr", post_id);
        let (_, body) = send(&app.router, Method::GET, &uri, None).await;
        assert_eq!(body["languages"]["fr"]["post_id"], post_id);
        assert_eq!(body["languages"]["fr"]["status"], "publish");
        assert!(body["languages"].get("es").is_none());

        let (status, _) = send(&app.router, Method::GET, "/translations/404", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_purge_accepts_any_day_count() {
        let app = app_with(None);
        let (status, body) = send(
            &app.router,
            Method::POST,
            "/queue/purge",
            Some(json!({ "days": u32::MAX })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
    }

    #[tokio::test]
    async fn test_queue_flow() {
        let app = app_with(None);
        let post_id = seed(&app.posts, "Bonjour").await;

        let (status, body) = send(
            &app.router,
            Method::POST,
            "/queue",
            Some(json!({ "post_ids": [post_id], "languages": ["es", "ar"] })),
        )
        .await;
        assert_eq!(status, StatusCode::ACCEPTED);
        assert_eq!(body["queued"], 2);
        assert_eq!(body["items"][0]["status"], "pending");

        let (status, body) = send(&app.router, Method::POST, "/queue/process", Some(json!({ "limit": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["completed"], 1);
        assert_eq!(body["remaining"], 1);

        let (_, body) = send(&app.router, Method::POST, "/queue/process", None).await;
        assert_eq!(body["completed"], 1);

        let (_, body) = send(&app.router, Method::GET, "/queue/status", None).await;
        assert_eq!(body["completed"], 2);

        let uri = format!("/queue/items?post_ids={}", post_id);
        let (status, body) = send(&app.router, Method::GET, &uri, None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body.as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_queue_rejects_empty_post_list() {
        let app = app_with(None);
        let (status, _) = send(&app.router, Method::POST, "/queue", Some(json!({ "post_ids": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_queue_items_rejects_bad_ids() {
        let app = app_with(None);
        let (status, body) = send(&app.router, Method::GET, "/queue/items?post_ids=1,abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("abc"));
    }

    #[tokio::test]
    async fn test_retry_and_purge() {
        let app = app_with(None);
        let bad = seed(&app.posts, "FAIL").await;
        send(&app.router, Method::POST, "/queue", Some(json!({ "post_ids": [bad], "languages": ["es"] }))).await;
        send(&app.router, Method::POST, "/queue/process", None).await;

        let (_, body) = send(&app.router, Method::POST, "/queue/retry", None).await;
        assert_eq!(body["count"], 1);
        let (_, body) = send(&app.router, Method::POST, "/queue/retry", None).await;
        assert_eq!(body["count"], 0);

        let (status, body) = send(&app.router, Method::POST, "/queue/purge", Some(json!({ "days": 1 }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
    }

    #[test]
    fn test_parse_post_ids() {
        assert_eq!(parse_post_ids("1, 2,,3").ok(), Some(vec![1, 2, 3]));
        assert!(parse_post_ids("x").is_err());
    }
}
