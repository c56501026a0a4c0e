//! Loopback-only HTTP API.
//!
//! Exposes the engine over JSON for local tools: collection management,
//! sync, search/query/ask, document retrieval, the link graph, tags, and
//! background job status. Every response is JSON; errors are always
//! `{ "error": { "code", "message" } }` built from [`EngineError::code`],
//! the same vocabulary the CLI exit-codes on.
//!
//! The server binds to loopback only (`config.server.bind`, expected to be
//! a `127.0.0.1:*` address) and rejects any non-`GET` request carrying an
//! `Origin` header that does not resolve to a loopback host — a minimal
//! CSRF guard, since a browser tab on an unrelated origin can still POST
//! to `http://127.0.0.1:*` unless the server itself checks.

use std::sync::Arc;

use axum::extract::{Path as AxumPath, Query, State};
use axum::http::{HeaderMap, Method, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::config_mutex::ConfigMutex;
use crate::errors::EngineError;
use crate::jobs::{JobTracker, JobType};
use crate::models::Collection;
use crate::ports::LlmPorts;
use crate::store::StoreEngine;

#[derive(Clone)]
struct AppState {
    store: Arc<StoreEngine>,
    config: Arc<ConfigMutex>,
    ports: Arc<LlmPorts>,
    jobs: Arc<JobTracker>,
}

struct AppError(EngineError);

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        AppError(e)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            EngineError::NotFound(_) => StatusCode::NOT_FOUND,
            EngineError::Validation(_) | EngineError::InvalidInput(_) | EngineError::InvalidPath(_) => {
                StatusCode::BAD_REQUEST
            }
            EngineError::Conflict(_) | EngineError::HasReferences(_) => StatusCode::CONFLICT,
            EngineError::Forbidden(_) => StatusCode::FORBIDDEN,
            EngineError::Unavailable(_)
            | EngineError::VecSearchUnavailable(_)
            | EngineError::ExtensionLoadFailed(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({
            "error": { "code": self.0.code(), "message": self.0.to_string() }
        });
        (status, Json(body)).into_response()
    }
}

/// Starts the HTTP API. Runs until the process is terminated.
pub async fn run_server(store: StoreEngine, config: Config, ports: LlmPorts) -> Result<(), EngineError> {
    let bind_addr = config.server.bind.clone();
    let config_path = std::env::var("GNO_CONFIG_PATH")
        .map(std::path::PathBuf::from)
        .unwrap_or_else(|_| std::path::PathBuf::from("./config/gno.toml"));

    let state = AppState {
        store: Arc::new(store),
        config: Arc::new(ConfigMutex::new(config_path, config)),
        ports: Arc::new(ports),
        jobs: Arc::new(JobTracker::new()),
    };

    let app = Router::new()
        .route("/api/health", get(handle_health))
        .route("/api/status", get(handle_status))
        .route("/api/collections", get(handle_list_collections).post(handle_add_collection))
        .route("/api/collections/{name}", delete(handle_remove_collection))
        .route("/api/sync", post(handle_sync))
        .route("/api/docs", get(handle_list_docs).post(handle_add_doc))
        .route("/api/doc", get(handle_get_doc))
        .route("/api/docs/{id}/deactivate", post(handle_deactivate))
        .route("/api/search", post(handle_search))
        .route("/api/query", post(handle_query))
        .route("/api/ask", post(handle_ask))
        .route("/api/doc/{id}/links", get(handle_links))
        .route("/api/doc/{id}/backlinks", get(handle_backlinks))
        .route("/api/doc/{id}/similar", get(handle_similar))
        .route("/api/graph", get(handle_graph))
        .route("/api/tags", get(handle_tags))
        .route("/api/jobs/{id}", get(handle_job_status))
        .route("/api/presets", get(handle_list_presets).post(handle_add_preset))
        .route("/api/models/status", get(handle_models_status))
        .route("/api/models/pull", post(handle_models_pull))
        .layer(middleware::from_fn(same_origin_guard))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    tracing::info!(%bind_addr, "http api listening");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await.map_err(|e| {
        EngineError::ConnectionFailed(format!("binding {bind_addr}: {e}"))
    })?;
    axum::serve(listener, app)
        .await
        .map_err(|e| EngineError::Runtime(e.to_string()))?;

    Ok(())
}

/// Rejects non-`GET` requests whose `Origin` header names a non-loopback
/// host. A request with no `Origin` header at all is allowed — same-origin
/// navigations and most non-browser HTTP clients never send one.
async fn same_origin_guard(req: axum::extract::Request, next: Next) -> Result<Response, AppError> {
    if req.method() != Method::GET {
        if let Some(origin) = req.headers().get(axum::http::header::ORIGIN) {
            let origin_str = origin.to_str().unwrap_or("");
            if !is_loopback_origin(origin_str) {
                return Err(AppError(EngineError::Forbidden(format!(
                    "cross-origin request rejected: {origin_str}"
                ))));
            }
        }
    }
    Ok(next.run(req).await)
}

fn is_loopback_origin(origin: &str) -> bool {
    let host = origin
        .split("://")
        .nth(1)
        .unwrap_or(origin)
        .split(':')
        .next()
        .unwrap_or("");
    matches!(host, "127.0.0.1" | "localhost" | "::1" | "[::1]")
}

async fn handle_health(_headers: HeaderMap) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

async fn handle_status(State(state): State<AppState>) -> Result<Json<crate::store::StoreStatus>, AppError> {
    let config = state.config.current().await;
    let status = state.store.get_status(config.embedding.model.as_deref()).await?;
    Ok(Json(status))
}

#[derive(Serialize)]
struct CollectionsResponse {
    collections: Vec<Collection>,
}

async fn handle_list_collections(State(state): State<AppState>) -> Json<CollectionsResponse> {
    let config = state.config.current().await;
    Json(CollectionsResponse {
        collections: config.collections.clone(),
    })
}

#[derive(Deserialize)]
struct AddCollectionRequest {
    name: String,
    path: std::path::PathBuf,
    #[serde(default = "default_pattern")]
    pattern: String,
}

fn default_pattern() -> String {
    "**/*".to_string()
}

#[derive(Serialize)]
struct JobAccepted {
    job_id: String,
    job_type: JobType,
}

async fn handle_add_collection(
    State(state): State<AppState>,
    Json(req): Json<AddCollectionRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let name = req.name.clone();
    state
        .config
        .mutate(&state.store, move |mut c| {
            if c.collections.iter().any(|existing| existing.name == req.name) {
                return Err(EngineError::Conflict(format!("collection '{}' already exists", req.name)));
            }
            c.collections.push(Collection {
                name: req.name,
                path: req.path,
                pattern: req.pattern,
                include: vec![],
                exclude: vec![
                    "**/.git/**".to_string(),
                    "**/node_modules/**".to_string(),
                    "**/target/**".to_string(),
                ],
                update_cmd: None,
                language_hint: None,
                synced_at: None,
            });
            Ok(c)
        })
        .await?;

    let job_id = spawn_sync_job(&state, Some(name)).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, job_type: JobType::Sync })))
}

async fn handle_remove_collection(
    State(state): State<AppState>,
    AxumPath(name): AxumPath<String>,
) -> Result<StatusCode, AppError> {
    let remove_name = name.clone();
    state
        .config
        .mutate(&state.store, move |mut c| {
            let before = c.collections.len();
            c.collections.retain(|existing| existing.name != name);
            if c.collections.len() == before {
                return Err(EngineError::NotFound(format!("collection '{name}' not found")));
            }
            Ok(c)
        })
        .await?;
    state.store.remove_collection(&remove_name).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
struct SyncRequest {
    collection: Option<String>,
}

async fn handle_sync(
    State(state): State<AppState>,
    body: Option<Json<SyncRequest>>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let collection = body.and_then(|Json(r)| r.collection);
    let job_id = spawn_sync_job(&state, collection).await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, job_type: JobType::Sync })))
}

async fn spawn_sync_job(state: &AppState, collection: Option<String>) -> Result<String, EngineError> {
    let config = state.config.current().await;
    let targets: Vec<Collection> = config
        .collections
        .iter()
        .filter(|c| collection.as_deref().is_none_or(|name| c.name == name))
        .cloned()
        .collect();
    if targets.is_empty() {
        return Err(EngineError::NotFound(match collection {
            Some(name) => format!("collection '{name}' is not registered"),
            None => "no collections registered".to_string(),
        }));
    }

    let store = Arc::clone(&state.store);
    let ports = Arc::clone(&state.ports);
    state
        .jobs
        .start_job(JobType::Sync, move |tracker, job_id| async move {
            let mut summaries = Vec::new();
            for collection in &targets {
                let summary = crate::ingest::run_ingest(&store, &config, collection, &ports, None).await?;
                let _ = tracker
                    .update_job_progress(
                        &job_id,
                        crate::jobs::JobProgress {
                            current: summary.files_seen,
                            total: summary.files_seen,
                            current_file: None,
                        },
                    )
                    .await;
                summaries.push(summary);
            }
            Ok(serde_json::to_value(summaries).unwrap_or_default())
        })
        .await
}

#[derive(Deserialize)]
struct ListDocsQuery {
    collection: Option<String>,
    #[serde(default = "default_list_limit")]
    limit: i64,
    #[serde(default)]
    offset: i64,
}

fn default_list_limit() -> i64 {
    50
}

async fn handle_list_docs(
    State(state): State<AppState>,
    Query(q): Query<ListDocsQuery>,
) -> Result<Json<Vec<crate::models::Document>>, AppError> {
    let docs = state.store.list_documents(q.collection.as_deref(), q.limit, q.offset).await?;
    Ok(Json(docs))
}

#[derive(Deserialize)]
struct AddDocRequest {
    collection: String,
    rel_path: String,
    body: String,
}

async fn handle_add_doc(
    State(state): State<AppState>,
    Json(req): Json<AddDocRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let config = state.config.current().await;
    let collection = config
        .collections
        .iter()
        .find(|c| c.name == req.collection)
        .cloned()
        .ok_or_else(|| EngineError::NotFound(format!("collection '{}' not registered", req.collection)))?;

    let target = crate::scan::safe_join(&collection.path, &req.rel_path)?;
    if let Some(parent) = target.parent() {
        std::fs::create_dir_all(parent).map_err(EngineError::from)?;
    }
    std::fs::write(&target, req.body.as_bytes()).map_err(EngineError::from)?;

    let store = Arc::clone(&state.store);
    let ports = Arc::clone(&state.ports);
    let job_id = state
        .jobs
        .start_job(JobType::Add, move |_tracker, _job_id| async move {
            let summary = crate::ingest::run_ingest(&store, &config, &collection, &ports, None).await?;
            Ok(serde_json::to_value(summary).unwrap_or_default())
        })
        .await?;

    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, job_type: JobType::Add })))
}

#[derive(Deserialize)]
struct GetDocQuery {
    id: String,
}

async fn handle_get_doc(
    State(state): State<AppState>,
    Query(q): Query<GetDocQuery>,
) -> Result<Json<crate::get::DocumentResponse>, AppError> {
    let doc = crate::get::get_document(&state.store, &q.id).await?;
    Ok(Json(doc))
}

async fn handle_deactivate(State(state): State<AppState>, AxumPath(id): AxumPath<String>) -> Result<StatusCode, AppError> {
    let doc = crate::get::get_document(&state.store, &id).await?;
    let document = state.store.get_document_by_docid(&doc.docid).await?;
    state.store.deactivate(document.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default)]
    collection: Option<String>,
    #[serde(default)]
    tags_all: Vec<String>,
    #[serde(default)]
    tags_any: Vec<String>,
    limit: Option<i64>,
    #[serde(default)]
    no_expand: bool,
    #[serde(default)]
    no_rerank: bool,
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<crate::search::SearchOutcome>, AppError> {
    let config = state.config.current().await;
    let opts = crate::search::SearchOptions {
        collection: req.collection.as_deref(),
        tags_all: &req.tags_all,
        tags_any: &req.tags_any,
        limit: req.limit.unwrap_or(config.retrieval.final_limit),
        no_expand: true,
        no_rerank: true,
    };
    let outcome = crate::search::search(
        &state.store,
        &config,
        &state.ports,
        &req.query,
        crate::search::SearchMode::Lexical,
        opts,
    )
    .await?;
    Ok(Json(outcome))
}

async fn handle_query(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<crate::search::SearchOutcome>, AppError> {
    let config = state.config.current().await;
    let opts = crate::search::SearchOptions {
        collection: req.collection.as_deref(),
        tags_all: &req.tags_all,
        tags_any: &req.tags_any,
        limit: req.limit.unwrap_or(config.retrieval.final_limit),
        no_expand: req.no_expand || config.retrieval.no_expand,
        no_rerank: req.no_rerank || config.retrieval.no_rerank,
    };
    let outcome = crate::search::search(
        &state.store,
        &config,
        &state.ports,
        &req.query,
        crate::search::SearchMode::Hybrid,
        opts,
    )
    .await?;
    Ok(Json(outcome))
}

#[derive(Deserialize)]
struct AskRequest {
    question: String,
    #[serde(default)]
    collection: Option<String>,
}

async fn handle_ask(
    State(state): State<AppState>,
    Json(req): Json<AskRequest>,
) -> Result<Json<crate::search::AskOutcome>, AppError> {
    let config = state.config.current().await;
    let opts = crate::search::SearchOptions {
        collection: req.collection.as_deref(),
        tags_all: &[],
        tags_any: &[],
        limit: config.retrieval.final_limit,
        no_expand: config.retrieval.no_expand,
        no_rerank: config.retrieval.no_rerank,
    };
    let outcome = crate::search::ask(&state.store, &config, &state.ports, &req.question, opts).await?;
    Ok(Json(outcome))
}

async fn handle_links(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Vec<crate::models::Link>>, AppError> {
    let doc = crate::get::get_document(&state.store, &id).await?;
    Ok(Json(doc.links))
}

async fn handle_backlinks(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<Vec<crate::models::Backlink>>, AppError> {
    let doc = crate::get::get_document(&state.store, &id).await?;
    Ok(Json(doc.backlinks))
}

#[derive(Deserialize)]
struct SimilarQuery {
    limit: Option<i64>,
    #[serde(default)]
    cross_collection: bool,
}

async fn handle_similar(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
    Query(q): Query<SimilarQuery>,
) -> Result<Json<Vec<crate::models::SearchResultItem>>, AppError> {
    let config = state.config.current().await;
    let opts = crate::search::SimilarOptions {
        limit: q.limit.unwrap_or(config.retrieval.final_limit),
        threshold: config.retrieval.similar_threshold,
        cross_collection: q.cross_collection,
    };
    let results = crate::search::similar_documents(&state.store, &config, &id, opts).await?;
    Ok(Json(results))
}

#[derive(Deserialize, Default)]
struct GraphQuery {
    collection: Option<String>,
    #[serde(default = "default_graph_limit")]
    limit_nodes: i64,
    #[serde(default)]
    linked_only: bool,
    #[serde(default)]
    include_similar: bool,
}

fn default_graph_limit() -> i64 {
    500
}

async fn handle_graph(
    State(state): State<AppState>,
    Query(q): Query<GraphQuery>,
) -> Result<Json<crate::store::Graph>, AppError> {
    let config = state.config.current().await;
    let opts = crate::store::graph::GraphOptions {
        collection: q.collection.as_deref(),
        limit_nodes: q.limit_nodes,
        linked_only: q.linked_only,
        include_similar: q.include_similar,
        similar_top_k: 5,
        similarity_threshold: config.retrieval.similar_threshold as f32,
        active_model: config.embedding.model.as_deref(),
    };
    let graph = crate::store::get_graph(state.store.pool(), opts).await?;
    Ok(Json(graph))
}

#[derive(Serialize)]
struct TagsResponse {
    tags: Vec<TagCount>,
}

#[derive(Serialize)]
struct TagCount {
    tag: String,
    count: i64,
}

async fn handle_tags(State(state): State<AppState>) -> Result<Json<TagsResponse>, AppError> {
    let tags = state.store.list_tags().await?;
    Ok(Json(TagsResponse {
        tags: tags.into_iter().map(|(tag, count)| TagCount { tag, count }).collect(),
    }))
}

async fn handle_job_status(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<String>,
) -> Result<Json<crate::jobs::JobRecord>, AppError> {
    state
        .jobs
        .get_job_status(&id)
        .await
        .map(Json)
        .ok_or_else(|| AppError(EngineError::NotFound(format!("job '{id}' not found"))))
}

#[derive(Serialize)]
struct PresetsResponse {
    presets: Vec<crate::config::Preset>,
}

async fn handle_list_presets(State(state): State<AppState>) -> Json<PresetsResponse> {
    let config = state.config.current().await;
    Json(PresetsResponse {
        presets: config.models.as_ref().map(|m| m.presets.clone()).unwrap_or_default(),
    })
}

async fn handle_add_preset(
    State(state): State<AppState>,
    Json(preset): Json<crate::config::Preset>,
) -> Result<StatusCode, AppError> {
    state
        .config
        .mutate(&state.store, move |mut c| {
            let models = c.models.get_or_insert_with(Default::default);
            models.presets.retain(|p| p.name != preset.name);
            models.presets.push(preset);
            Ok(c)
        })
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn handle_models_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let config = state.config.current().await;
    Json(serde_json::json!({
        "embedding": {
            "provider": config.embedding.provider,
            "model": config.embedding.model,
            "enabled": config.embedding.is_enabled(),
        }
    }))
}

#[derive(Deserialize)]
struct ModelsPullRequest {
    model: String,
}

async fn handle_models_pull(
    State(state): State<AppState>,
    Json(req): Json<ModelsPullRequest>,
) -> Result<(StatusCode, Json<JobAccepted>), AppError> {
    let ports = Arc::clone(&state.ports);
    let job_id = state
        .jobs
        .start_job(JobType::Embed, move |_tracker, _job_id| async move {
            ports.embed.init().await?;
            Ok(serde_json::json!({ "model": req.model, "dimensions": ports.embed.dimensions() }))
        })
        .await?;
    Ok((StatusCode::ACCEPTED, Json(JobAccepted { job_id, job_type: JobType::Embed })))
}
