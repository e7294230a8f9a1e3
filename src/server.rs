//! HTTP server exposing indexing, search, summarization, and ignore-rule
//! administration as a JSON API.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `POST` | `/index` | Index one root or all configured roots |
//! | `POST` | `/search` | Semantic search, optionally prefix-restricted |
//! | `POST` | `/summarize` | Recursive summarization of a path or raw text |
//! | `GET`  | `/ignore` | List ignore rules |
//! | `POST` | `/ignore` | Add an ignore rule |
//! | `DELETE` | `/ignore` | Remove an ignore rule |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "query must not be empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support
//! browser-based clients.

use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;

use crate::config::Config;
use crate::embedding::Embedder;
use crate::error::IndexError;
use crate::ignore::PathFilter;
use crate::indexer::{Durability, IndexReport, Indexer};
use crate::llm::Generator;
use crate::search;
use crate::summarize;

/// Shared state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    indexer: Arc<Indexer>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
}

impl AppState {
    pub fn new(
        config: Arc<Config>,
        indexer: Arc<Indexer>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            config,
            indexer,
            embedder,
            generator,
        }
    }
}

/// Binds to `[server].bind` and serves until the process terminates.
pub async fn run_server(state: AppState) -> anyhow::Result<()> {
    let bind_addr = state.config.server.bind.clone();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(handle_health))
        .route("/index", post(handle_index))
        .route("/search", post(handle_search))
        .route("/summarize", post(handle_summarize))
        .route(
            "/ignore",
            get(handle_list_ignore)
                .post(handle_add_ignore)
                .delete(handle_remove_ignore),
        )
        .layer(cors)
        .with_state(state);

    info!("server listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<IndexError> for AppError {
    fn from(e: IndexError) -> Self {
        match &e {
            IndexError::Io { source, .. } if source.kind() == std::io::ErrorKind::NotFound => {
                not_found(e.to_string())
            }
            IndexError::UnsupportedFormat(_)
            | IndexError::EmbeddingDimension { .. }
            | IndexError::InvalidOverlap { .. }
            | IndexError::ConstraintViolation { .. } => bad_request(e.to_string()),
            _ => internal(e.to_string()),
        }
    }
}

// ============ Handlers ============

async fn handle_health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Deserialize)]
struct IndexRequest {
    /// Root to index; omitted means every configured root.
    root: Option<PathBuf>,
    #[serde(default)]
    overwrite: bool,
    durability: Option<Durability>,
}

async fn handle_index(
    State(state): State<AppState>,
    Json(req): Json<IndexRequest>,
) -> Result<Json<IndexReport>, AppError> {
    let durability = req.durability.unwrap_or(state.config.indexing.durability);
    let roots = match req.root {
        Some(root) => vec![root],
        None => state.config.indexing.roots.clone(),
    };
    if roots.is_empty() {
        return Err(bad_request("no root given and none configured"));
    }

    // Clear once before any worker starts; a clear inside one walk
    // would race the others' commits.
    if req.overwrite {
        state.indexer.clear_all().await?;
    }

    let mut workers = JoinSet::new();
    for root in roots {
        let indexer = state.indexer.clone();
        workers.spawn(async move { indexer.index_tree(&root, false, durability).await });
    }

    let mut merged = IndexReport::default();
    while let Some(joined) = workers.join_next().await {
        let report = joined
            .map_err(|e| internal(format!("indexing worker panicked: {}", e)))??;
        merged.indexed += report.indexed;
        merged.updated += report.updated;
        merged.unchanged += report.unchanged;
        merged.skipped += report.skipped;
        merged.failed += report.failed;
    }
    Ok(Json(merged))
}

#[derive(Deserialize)]
struct SearchRequest {
    query: String,
    #[serde(default = "default_top_k")]
    top_k: usize,
    /// Restrict results to records under this directory.
    prefix: Option<PathBuf>,
    /// Also score each hit with the LLM.
    #[serde(default)]
    rank: bool,
}

fn default_top_k() -> usize {
    5
}

async fn handle_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Response, AppError> {
    if req.query.trim().is_empty() {
        return Err(bad_request("query must not be empty"));
    }
    if req.top_k == 0 {
        return Err(bad_request("top_k must be at least 1"));
    }

    let store = state.indexer.store();
    let index = state.indexer.index();
    if req.rank {
        let ranked = search::search_and_rank(
            store,
            index,
            state.embedder.as_ref(),
            state.generator.as_ref(),
            &req.query,
            req.top_k,
            req.prefix.as_deref(),
        )
        .await?;
        Ok(Json(ranked).into_response())
    } else {
        let hits = search::run_search(
            store,
            index,
            state.embedder.as_ref(),
            &req.query,
            req.top_k,
            req.prefix.as_deref(),
        )
        .await?;
        Ok(Json(hits).into_response())
    }
}

#[derive(Deserialize)]
struct SummarizeRequest {
    /// Path to an indexed-format document; mutually exclusive with `text`.
    path: Option<PathBuf>,
    text: Option<String>,
    max_tokens: Option<usize>,
    chunk_size: Option<usize>,
    overlap: Option<usize>,
}

async fn handle_summarize(
    State(state): State<AppState>,
    Json(req): Json<SummarizeRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let text = match (&req.path, req.text) {
        (Some(path), None) => crate::extract::extract_text(path)?,
        (None, Some(text)) => text,
        _ => return Err(bad_request("provide exactly one of path or text")),
    };

    let mut config = state.config.summarize.clone();
    if let Some(v) = req.max_tokens {
        config.max_summary_tokens = v;
    }
    if let Some(v) = req.chunk_size {
        config.chunk_size = v;
    }
    if let Some(v) = req.overlap {
        config.overlap = v;
    }

    let summary = summarize::recursive_summarize(state.generator.as_ref(), &config, &text).await?;
    Ok(Json(serde_json::json!({ "summary": summary })))
}

#[derive(Deserialize)]
struct IgnoreRequest {
    path: PathBuf,
}

async fn handle_list_ignore(State(state): State<AppState>) -> Result<Response, AppError> {
    let rules = state.indexer.store().list_rules().await?;
    Ok(Json(rules).into_response())
}

async fn handle_add_ignore(
    State(state): State<AppState>,
    Json(req): Json<IgnoreRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = PathFilter::new(state.indexer.store());
    let canonical = filter.add(&req.path).await?;
    Ok(Json(serde_json::json!({ "ignored": canonical })))
}

async fn handle_remove_ignore(
    State(state): State<AppState>,
    Json(req): Json<IgnoreRequest>,
) -> Result<Json<serde_json::Value>, AppError> {
    let filter = PathFilter::new(state.indexer.store());
    let removed = filter.remove(&req.path).await?;
    Ok(Json(serde_json::json!({ "removed": removed })))
}
