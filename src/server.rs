//! Report HTTP server.
//!
//! Serves the query layer over a small JSON API. The caller is identified by
//! a header set by the authenticating front proxy (`X-AuthUser` by default);
//! see [`crate::auth`].
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/api/user` | The resolved caller: `{user, admin}` |
//! | `GET`  | `/api/periods` | Periods visible to the caller, with timestamps |
//! | `GET`  | `/api/report?period=N` | One period's sections, content table and titles |
//! | `POST` | `/api/data` | Raw per-user metadata for `{"periods": [..]}` |
//! | `GET`  | `/health` | Status, version and store phase |
//!
//! # Response Envelope
//!
//! Every `/api` response, success or failure, has the same shape:
//!
//! ```json
//! { "ok": false, "msg": "Period not found", "payload": null }
//! ```
//!
//! `ok` is true exactly when the status is `200`. Responses are
//! gzip-compressed when the client accepts it.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::Context;
use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, DefaultBodyLimit, Query, State},
    http::{header, HeaderMap, HeaderName, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::compression::CompressionLayer;
use tracing::{error, info};

use crate::auth::Principal;
use crate::config::Config;
use crate::models::PeriodId;
use crate::query::{get_raw_data, get_report, list_periods, QueryError};
use crate::store::{Phase, Store, StoreState};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
    admins: Arc<HashSet<String>>,
    user_header: HeaderName,
}

impl AppState {
    pub fn new(config: &Config, store: Arc<Store>) -> anyhow::Result<Self> {
        let user_header = HeaderName::from_bytes(config.server.user_header.as_bytes())
            .with_context(|| format!("Invalid user header: {}", config.server.user_header))?;
        Ok(Self {
            store,
            admins: Arc::new(config.auth.admins.iter().cloned().collect()),
            user_header,
        })
    }

    fn principal(&self, headers: &HeaderMap) -> Principal {
        let identity = headers
            .get(&self.user_header)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        Principal::resolve(identity, &self.admins)
    }
}

/// Builds the router. Request bodies above `max_request_bytes` are refused
/// with `413`.
pub fn router(state: AppState, max_request_bytes: usize) -> Router {
    Router::new()
        .route("/api/user", get(handle_user))
        .route("/api/periods", get(handle_periods))
        .route("/api/report", get(handle_report))
        .route("/api/data", post(handle_data))
        .route("/health", get(handle_health))
        .layer(DefaultBodyLimit::max(max_request_bytes))
        .layer(CompressionLayer::new())
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and runs until Ctrl-C.
pub async fn run_server(config: &Config, store: Arc<Store>) -> anyhow::Result<()> {
    let state = AppState::new(config, store)?;
    let app = router(state, config.server.max_request_bytes);

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    info!(bind = %config.server.bind, "report server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("report server stopped");

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

// ============ Envelope ============

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    ok: bool,
    msg: &'a str,
    payload: T,
}

/// Serializes the envelope to a response. Views borrowed from the store are
/// serialized here before the read lock is released.
fn envelope<T: Serialize>(status: StatusCode, msg: &str, payload: T) -> Response {
    let body = Envelope {
        ok: status == StatusCode::OK,
        msg,
        payload,
    };
    match serde_json::to_vec(&body) {
        Ok(bytes) => (
            status,
            [(header::CONTENT_TYPE, "application/json")],
            bytes,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "failed to serialize response");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

fn ok<T: Serialize>(payload: T) -> Response {
    envelope(StatusCode::OK, "", payload)
}

/// Runs `f` under the store's read lock on the blocking pool. The lock is
/// held by the pipeline for the whole of a period reload.
async fn with_store<F>(store: Arc<Store>, f: F) -> Response
where
    F: FnOnce(&StoreState) -> Response + Send + 'static,
{
    match tokio::task::spawn_blocking(move || f(&store.read())).await {
        Ok(response) => response,
        Err(e) => {
            error!(error = %e, "store reader task failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

// ============ Error response ============

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error("{0}")]
    NotFound(String),
    #[error("Request body too large")]
    PayloadTooLarge,
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }
}

impl From<QueryError> for ApiError {
    fn from(e: QueryError) -> Self {
        ApiError::NotFound(e.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        envelope(self.status(), &self.to_string(), ())
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    phase: Phase,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        phase: state.store.phase(),
    })
}

// ============ GET /api/user ============

#[derive(Serialize)]
struct UserPayload<'a> {
    user: &'a str,
    admin: bool,
}

async fn handle_user(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let who = state.principal(&headers);
    ok(UserPayload {
        user: &who.user,
        admin: who.is_admin,
    })
}

// ============ GET /api/periods ============

async fn handle_periods(State(state): State<AppState>, headers: HeaderMap) -> Response {
    let who = state.principal(&headers);
    with_store(state.store.clone(), move |store| ok(list_periods(store, &who))).await
}

// ============ GET /api/report ============

fn period_param(params: &HashMap<String, String>) -> Result<PeriodId, ApiError> {
    let raw = params
        .get("period")
        .ok_or_else(|| ApiError::BadRequest("Missing param period".to_string()))?;
    raw.trim()
        .parse()
        .map_err(|_| ApiError::BadRequest("Nonintegral param period".to_string()))
}

async fn handle_report(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Response, ApiError> {
    let who = state.principal(&headers);
    let period = period_param(&params)?;

    let response = with_store(state.store.clone(), move |store| {
        match get_report(store, period, &who) {
            Ok(view) => ok(view),
            Err(e) => ApiError::from(e).into_response(),
        }
    })
    .await;
    Ok(response)
}

// ============ POST /api/data ============

#[derive(Deserialize)]
struct DataRequest {
    periods: Vec<PeriodId>,
}

async fn handle_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, ApiError> {
    let body = body.map_err(|rejection| {
        if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            ApiError::PayloadTooLarge
        } else {
            ApiError::BadRequest(rejection.body_text())
        }
    })?;
    let request: DataRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiError::BadRequest(format!("Malformed request body: {}", e)))?;
    let who = state.principal(&headers);

    let response = with_store(state.store.clone(), move |store| {
        let out = get_raw_data(store, &request.periods, &who);
        if out.data.is_empty() {
            return ApiError::NotFound(out.msg).into_response();
        }
        envelope(StatusCode::OK, &out.msg, &out.data)
    })
    .await;
    Ok(response)
}
