//! HTTP front end: translates verbs and paths into broker and asset
//! operations.
//!
//! - `GET` (any path) → static asset server, `/` aliased to `/index.html`.
//! - `POST /move/…` → submit a move request, await the engine's answer,
//!   respond `{"move": …, "reqid": …}`.
//! - `POST /poll/…` → retrieve a stored result, respond
//!   `{"move": …, "info": …}`.
//!
//! Every failure maps to a status and a JSON error body: engine failures
//! to 5xx, request-shape failures to 400/404, poll-before-ready to 202
//! with a `computing` status so clients know to keep polling.

use crate::assets::{AssetError, AssetServer};
use crate::broker::{CorrelationId, PollError, RequestBroker};
use crate::protocol::{EngineError, MoveRequest};
use axum::extract::{Form, State};
use axum::http::{header, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::io;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub broker: RequestBroker,
    pub assets: Arc<AssetServer>,
}

// =============================================================================
// Wire Types
// =============================================================================

#[derive(Debug, Deserialize)]
struct MoveForm {
    position: Option<String>,
    moves: Option<String>,
    gotime: Option<String>,
    goinc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PollForm {
    reqid: Option<String>,
}

#[derive(Debug, Serialize)]
struct MoveResponse {
    #[serde(rename = "move")]
    best_move: String,
    reqid: CorrelationId,
}

#[derive(Debug, Serialize)]
struct PollResponse {
    #[serde(rename = "move")]
    best_move: String,
    info: String,
}

// =============================================================================
// Error Mapping
// =============================================================================

/// Failures a handler can answer, each with its HTTP mapping.
#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound(String),
    UnknownRequest(CorrelationId),
    NotReady(CorrelationId),
    Engine(EngineError),
    Internal(String),
}

impl From<PollError> for ApiError {
    fn from(err: PollError) -> Self {
        match err {
            PollError::UnknownRequest(id) => Self::UnknownRequest(id),
            PollError::NotReady(id) => Self::NotReady(id),
            PollError::Engine(err) => Self::Engine(err),
        }
    }
}

impl From<AssetError> for ApiError {
    fn from(err: AssetError) -> Self {
        match err {
            AssetError::NotFound(path) => Self::NotFound(path),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::BadRequest(msg) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "error": msg }))).into_response()
            }
            Self::NotFound(path) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("File Not Found: {path}") })),
            )
                .into_response(),
            Self::UnknownRequest(id) => (
                StatusCode::NOT_FOUND,
                Json(json!({ "error": format!("unknown request id {id}") })),
            )
                .into_response(),
            Self::NotReady(id) => (
                StatusCode::ACCEPTED,
                Json(json!({ "status": "computing", "reqid": id })),
            )
                .into_response(),
            Self::Engine(err) => {
                let status = match err {
                    EngineError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
                    _ => StatusCode::BAD_GATEWAY,
                };
                (status, Json(json!({ "error": err.to_string() }))).into_response()
            }
            Self::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": msg })),
            )
                .into_response(),
        }
    }
}

fn require_field(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value.ok_or_else(|| ApiError::BadRequest(format!("missing form field `{name}`")))
}

fn non_empty_field(value: Option<String>, name: &str) -> Result<String, ApiError> {
    let value = require_field(value, name)?;
    if value.trim().is_empty() {
        return Err(ApiError::BadRequest(format!("form field `{name}` is empty")));
    }
    Ok(value)
}

fn numeric_field(value: Option<String>, name: &str) -> Result<u64, ApiError> {
    let value = require_field(value, name)?;
    value
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("form field `{name}` is not a number: `{value}`")))
}

// =============================================================================
// Handlers
// =============================================================================

async fn handle_move(
    State(state): State<AppState>,
    Form(form): Form<MoveForm>,
) -> Result<Json<MoveResponse>, ApiError> {
    // A blank position is a malformed command; fail here instead of
    // burning an engine round-trip on it. An empty moves field is valid:
    // no history yet.
    let position = non_empty_field(form.position, "position")?;
    let moves = require_field(form.moves, "moves")?;
    let gotime = numeric_field(form.gotime, "gotime")?;
    let goinc = numeric_field(form.goinc, "goinc")?;

    let moves = moves.split_whitespace().map(str::to_string).collect();
    let request = MoveRequest::new(position, moves, gotime, goinc);

    let (id, done) = state.broker.submit(request);
    let outcome = done
        .await
        .map_err(|_| ApiError::Internal("engine worker went away".to_string()))?;
    let reply = outcome.map_err(ApiError::Engine)?;

    Ok(Json(MoveResponse {
        best_move: reply.best_move,
        reqid: id,
    }))
}

async fn handle_poll(
    State(state): State<AppState>,
    Form(form): Form<PollForm>,
) -> Result<Json<PollResponse>, ApiError> {
    let reqid = require_field(form.reqid, "reqid")?;
    let id: CorrelationId = reqid
        .trim()
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid reqid `{reqid}`")))?;

    debug!(id, "polling");
    let reply = state.broker.poll(id)?;

    Ok(Json(PollResponse {
        info: reply.diagnostics_text(),
        best_move: reply.best_move,
    }))
}

async fn handle_static(
    State(state): State<AppState>,
    method: Method,
    uri: Uri,
) -> Result<impl IntoResponse, ApiError> {
    if method != Method::GET {
        return Err(ApiError::NotFound(uri.path().to_string()));
    }

    let started = Instant::now();
    let asset = state.assets.serve(uri.path()).await?;
    debug!(path = %uri.path(), elapsed = ?started.elapsed(), "asset served");
    Ok((
        [(header::CONTENT_TYPE, asset.content_type)],
        asset.bytes,
    ))
}

// =============================================================================
// Router / Server
// =============================================================================

/// Builds the application router.
///
/// `/move` and `/poll` accept any path suffix, matching the GUI's
/// `/move/` and `/poll/` POST targets; everything else falls through to
/// the static asset server.
pub fn router(broker: RequestBroker, assets: Arc<AssetServer>) -> Router {
    let state = AppState { broker, assets };
    Router::new()
        .route("/move", post(handle_move))
        .route("/move/", post(handle_move))
        .route("/move/{*rest}", post(handle_move))
        .route("/poll", post(handle_poll))
        .route("/poll/", post(handle_poll))
        .route("/poll/{*rest}", post(handle_poll))
        .fallback(handle_static)
        .with_state(state)
}

/// Binds the listener and serves until `shutdown` cancels.
pub async fn serve(
    port: u16,
    broker: RequestBroker,
    assets: Arc<AssetServer>,
    shutdown: CancellationToken,
) -> io::Result<()> {
    let app = router(broker, assets);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port)).await?;
    info!(port, "web gui listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
}
