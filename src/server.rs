//! Read-only status server.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/stats` | Row counts: total, processed, passed, failed |
//! | `GET`  | `/items` | Page of items; `processed`, `passed`, `limit`, `offset` |
//! | `GET`  | `/items/{id}` | One item |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "item not found: abc" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `internal` (500).

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

use crate::config::Config;
use crate::models::Item;
use crate::repository::{ItemFilter, RepoStats, Repository, SqliteRepository};

const DEFAULT_LIMIT: i64 = 50;
const MAX_LIMIT: i64 = 500;

#[derive(Clone)]
struct AppState {
    repo: Arc<dyn Repository>,
}

pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let repo: Arc<dyn Repository> = Arc::new(SqliteRepository::connect(&config.db).await?);
    let app = router(repo.clone());

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    info!(bind = %config.server.bind, "status server listening");
    println!("Status server listening on http://{}", config.server.bind);

    let served = axum::serve(listener, app).await;
    repo.close().await;
    served?;
    Ok(())
}

/// Build the router over any repository.
pub fn router(repo: Arc<dyn Repository>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/stats", get(handle_stats))
        .route("/items", get(handle_list_items))
        .route("/items/{id}", get(handle_get_item))
        .layer(cors)
        .with_state(AppState { repo })
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

fn internal(err: anyhow::Error) -> AppError {
    error!(error = %err, "request failed");
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: err.to_string(),
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /stats ============

async fn handle_stats(State(state): State<AppState>) -> Result<Json<RepoStats>, AppError> {
    state.repo.statistics().await.map(Json).map_err(internal)
}

// ============ GET /items ============

#[derive(Debug, Deserialize)]
struct ItemsQuery {
    processed: Option<bool>,
    passed: Option<bool>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct ItemsResponse {
    items: Vec<Item>,
    limit: i64,
    offset: i64,
}

async fn handle_list_items(
    State(state): State<AppState>,
    Query(query): Query<ItemsQuery>,
) -> Result<Json<ItemsResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_LIMIT);
    if !(1..=MAX_LIMIT).contains(&limit) {
        return Err(bad_request(format!(
            "limit must be between 1 and {}",
            MAX_LIMIT
        )));
    }
    let offset = query.offset.unwrap_or(0);
    if offset < 0 {
        return Err(bad_request("offset must not be negative"));
    }

    let filter = ItemFilter {
        processed: query.processed,
        passed: query.passed,
        limit: Some(limit),
        offset: Some(offset),
    };
    let items = state.repo.list_items(&filter).await.map_err(internal)?;

    Ok(Json(ItemsResponse {
        items,
        limit,
        offset,
    }))
}

// ============ GET /items/{id} ============

async fn handle_get_item(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Item>, AppError> {
    match state.repo.get_by_id(&id).await.map_err(internal)? {
        Some(item) => Ok(Json(item)),
        None => Err(not_found(format!("item not found: {}", id))),
    }
}
