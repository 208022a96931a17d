//! HTTP transport for Locus.
//!
//! Routes, relative to the configured API prefix:
//!
//! | Method | Path | Body |
//! |---|---|---|
//! | POST | `/forward` | [`RawFeatureRequest`] |
//! | POST | `/forward/geo` | [`SemanticRequest`] |
//! | GET | `/model` | - |
//! | GET | `/history` | - |
//! | GET | `/history/:id` | - |
//! | GET | `/stats` | - |
//!
//! `GET /` and `GET /health` are served outside the prefix.

use super::inference::{ErrorEnvelope, InferenceOrchestrator, RawFeatureRequest, RequestContext};
use super::mapper::SemanticRequest;
use crate::error::{ErrorClass, LocusError, Result};
use crate::history::{HistoryQuery, HistoryStats, InMemoryHistory, StatsFilter};
use crate::shutdown::ShutdownCoordinator;
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Largest page the history listing will return.
pub const MAX_HISTORY_LIMIT: usize = 1000;

/// Shared state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    orchestrator: Arc<InferenceOrchestrator>,
    history: Arc<InMemoryHistory>,
    api_prefix: String,
}

/// The HTTP front end over an [`InferenceOrchestrator`].
pub struct ModelServer {
    state: AppState,
}

impl ModelServer {
    pub fn new(
        orchestrator: Arc<InferenceOrchestrator>,
        history: Arc<InMemoryHistory>,
        api_prefix: &str,
    ) -> Self {
        Self {
            state: AppState {
                orchestrator,
                history,
                api_prefix: normalize_prefix(api_prefix),
            },
        }
    }

    pub fn api_prefix(&self) -> &str {
        &self.state.api_prefix
    }

    /// Builds the router with all routes mounted.
    pub fn router(&self) -> Router {
        let api = Router::new()
            .route("/forward", post(handle_forward))
            .route("/forward/geo", post(handle_forward_geo))
            .route("/model", get(handle_model_info))
            .route("/history", get(handle_list_history))
            .route("/history/:id", get(handle_get_history))
            .route("/stats", get(handle_stats));

        let root = Router::new()
            .route("/", get(handle_root))
            .route("/health", get(health_check));

        let app = if self.state.api_prefix.is_empty() {
            root.merge(api)
        } else {
            root.nest(&self.state.api_prefix, api)
        };

        app.with_state(self.state.clone())
    }

    /// Serves until the coordinator signals shutdown.
    pub async fn serve(self, listener: TcpListener, shutdown: ShutdownCoordinator) -> Result<()> {
        let addr = listener.local_addr()?;
        info!(addr = %addr, prefix = %self.state.api_prefix, "Model server listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.wait_for_shutdown().await })
            .await
            .map_err(|e| LocusError::Network(e.to_string()))?;

        info!("Model server stopped");
        Ok(())
    }

    /// Binds `addr` and serves until shutdown.
    pub async fn run(self, addr: SocketAddr, shutdown: ShutdownCoordinator) -> Result<()> {
        let listener = TcpListener::bind(addr).await?;
        self.serve(listener, shutdown).await
    }
}

/// Strips trailing slashes; `"/"` becomes the empty prefix.
fn normalize_prefix(prefix: &str) -> String {
    prefix.trim_end_matches('/').to_string()
}

fn context_from_headers(mut ctx: RequestContext, headers: &HeaderMap) -> RequestContext {
    for (name, value) in headers {
        if let Ok(value) = value.to_str() {
            ctx = ctx.with_header(name.as_str(), value);
        }
    }
    ctx
}

fn status(code: u16) -> StatusCode {
    StatusCode::from_u16(code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
}

fn error_response(class: ErrorClass, detail: &str) -> Response {
    (
        status(class.status_code()),
        Json(ErrorEnvelope::new(class, detail)),
    )
        .into_response()
}

fn not_found(detail: String) -> Response {
    let envelope = ErrorEnvelope {
        success: false,
        error: "not found".to_string(),
        detail: Some(detail),
        timestamp: Utc::now(),
    };
    (StatusCode::NOT_FOUND, Json(envelope)).into_response()
}

// Request/Response types

#[derive(Serialize)]
struct ServiceInfo {
    service: &'static str,
    version: &'static str,
    api_prefix: String,
    model_loaded: bool,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model_loaded: bool,
}

#[derive(Debug, Deserialize)]
struct HistoryParams {
    limit: Option<usize>,
    offset: Option<usize>,
    endpoint: Option<String>,
    status_code: Option<u16>,
}

#[derive(Serialize)]
struct StatsResponse {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<&'static str>,
    timestamp: DateTime<Utc>,
    filters_applied: StatsFilter,
    #[serde(flatten)]
    stats: HistoryStats,
}

// Handlers

async fn handle_root(State(state): State<AppState>) -> Json<ServiceInfo> {
    Json(ServiceInfo {
        service: "locus",
        version: env!("CARGO_PKG_VERSION"),
        api_prefix: state.api_prefix.clone(),
        model_loaded: state.orchestrator.loader().is_loaded(),
    })
}

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model_loaded: state.orchestrator.loader().is_loaded(),
    })
}

async fn handle_forward(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<RawFeatureRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(ErrorClass::Validation, &rejection.body_text()),
    };

    let ctx = context_from_headers(RequestContext::forward(), &headers);
    match state.orchestrator.forward(&request, &ctx).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(failure) => (status(failure.status_code()), Json(failure.envelope)).into_response(),
    }
}

async fn handle_forward_geo(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: std::result::Result<Json<SemanticRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return error_response(ErrorClass::Validation, &rejection.body_text()),
    };

    let ctx = context_from_headers(RequestContext::geo(), &headers);
    match state.orchestrator.forward_semantic(&request, &ctx).await {
        Ok(envelope) => Json(envelope).into_response(),
        Err(failure) => (status(failure.status_code()), Json(failure.envelope)).into_response(),
    }
}

async fn handle_model_info(State(state): State<AppState>) -> Response {
    match state.orchestrator.model_info().await {
        Ok(info) => Json(info).into_response(),
        Err(e) => error_response(e.class(), &e.to_string()),
    }
}

async fn handle_list_history(
    State(state): State<AppState>,
    Query(params): Query<HistoryParams>,
) -> Response {
    let limit = params.limit.unwrap_or(100);
    if !(1..=MAX_HISTORY_LIMIT).contains(&limit) {
        return error_response(
            ErrorClass::Validation,
            &format!("limit must be between 1 and {}", MAX_HISTORY_LIMIT),
        );
    }

    let page = state.history.query(&HistoryQuery {
        limit,
        offset: params.offset.unwrap_or(0),
        endpoint: params.endpoint,
        status_code: params.status_code,
        since: None,
    });
    Json(page).into_response()
}

async fn handle_get_history(State(state): State<AppState>, Path(id): Path<u64>) -> Response {
    match state.history.get(id) {
        Some(record) => Json(record).into_response(),
        None => not_found(format!("history record {} not found", id)),
    }
}

async fn handle_stats(
    State(state): State<AppState>,
    Query(filter): Query<StatsFilter>,
) -> Json<StatsResponse> {
    let stats = state.history.stats(&filter);
    let empty = stats.total_requests == 0;

    Json(StatsResponse {
        success: !empty,
        message: empty.then_some("no data available for the specified filters"),
        timestamp: Utc::now(),
        filters_applied: filter,
        stats,
    })
}
