//! Axum JSON surface: on-demand scrape, recent articles and health.

use std::sync::Arc;

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use plume_core::{Article, Identity};
use plume_storage::ArticleStore;
use plume_sync::{IngestError, IngestionPipeline, ScrapeError, MAX_SCRAPE_COUNT};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

pub const CRATE_NAME: &str = "plume-web";

const DEFAULT_ARTICLE_LIMIT: usize = 20;
const MAX_ARTICLE_LIMIT: usize = 100;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<IngestionPipeline>,
    pub default_scrape_count: usize,
}

impl AppState {
    pub fn new(pipeline: Arc<IngestionPipeline>, default_scrape_count: usize) -> Self {
        Self {
            pipeline,
            default_scrape_count: default_scrape_count.clamp(1, MAX_SCRAPE_COUNT),
        }
    }
}

#[derive(Debug, Deserialize)]
struct ScrapeRequest {
    #[serde(default)]
    identity: Option<String>,
    #[serde(default)]
    count: Option<usize>,
}

#[derive(Debug, Serialize)]
struct ScrapeResponse {
    identity: String,
    found: usize,
    fresh: usize,
    inserted: usize,
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize)]
struct ArticlesQuery {
    limit: Option<usize>,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/scrape", post(scrape_handler))
        .route("/articles", get(articles_handler))
        .route("/health", get(health_handler))
        .with_state(Arc::new(state))
}

pub async fn serve(state: AppState, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web server listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

async fn scrape_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<ScrapeRequest>, JsonRejection>,
) -> Response {
    let request = match body {
        Ok(Json(request)) => request,
        Err(rejection) => return error_response(StatusCode::BAD_REQUEST, rejection.body_text()),
    };
    let identity = match request.identity.as_deref().map(Identity::new) {
        Some(identity) if !identity.handle.is_empty() => identity,
        _ => return error_response(StatusCode::BAD_REQUEST, "identity is required"),
    };
    let count = request
        .count
        .unwrap_or(state.default_scrape_count)
        .clamp(1, MAX_SCRAPE_COUNT);

    info!(handle = %identity.handle, count, "on-demand scrape requested");
    match state.pipeline.scrape_now(&identity, count).await {
        Ok(report) => Json(ScrapeResponse {
            identity: report.handle,
            found: report.found,
            fresh: report.fresh,
            inserted: report.inserted,
            articles: report.articles,
        })
        .into_response(),
        Err(ScrapeError::Busy) => error_response(StatusCode::CONFLICT, ScrapeError::Busy.to_string()),
        Err(ScrapeError::Ingest(err @ IngestError::Extract(_))) => {
            warn!(handle = %identity.handle, error = %err, "on-demand extraction failed");
            error_response(StatusCode::BAD_GATEWAY, err.to_string())
        }
        Err(ScrapeError::Ingest(err)) => {
            error!(handle = %identity.handle, error = %err, "on-demand scrape failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

async fn articles_handler(State(state): State<Arc<AppState>>, Query(query): Query<ArticlesQuery>) -> Response {
    let limit = query
        .limit
        .unwrap_or(DEFAULT_ARTICLE_LIMIT)
        .clamp(1, MAX_ARTICLE_LIMIT);
    match state.pipeline.store().recent(limit).await {
        Ok(articles) => Json(articles).into_response(),
        Err(err) => {
            error!(error = %format!("{err:#}"), "listing articles failed");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, format!("{err:#}"))
        }
    }
}

async fn health_handler(State(state): State<Arc<AppState>>) -> Response {
    Json(json!({
        "status": "ok",
        "running": state.pipeline.guard().is_running(),
    }))
    .into_response()
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}
