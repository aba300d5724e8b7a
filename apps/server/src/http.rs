//! Read-only session API plus thin HTTP aliases for the replay operations.
//!
//! The WebSocket protocol is the primary surface; these endpoints exist for
//! discovery, dashboards and curl-level control with identical semantics.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use paddock::ReplayError;
use serde::Deserialize;
use serde_json::json;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::app::AppState;
use crate::ws;
use crate::ws::protocol::ReplayStateData;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/sessions", get(list_sessions))
        .route("/api/sessions/{key}", get(get_session))
        .route("/api/sessions/{key}/status", get(session_status))
        .route("/api/sessions/{key}/refresh", post(refresh_session))
        .route("/api/sessions/{key}/play", post(play))
        .route("/api/sessions/{key}/pause", post(pause))
        .route("/api/sessions/{key}/stop", post(stop))
        .route("/api/sessions/{key}/seek", post(seek))
        .route("/api/sessions/{key}/speed", post(speed))
        .route("/ws/telemetry/{key}", get(ws::telemetry_ws))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn list_sessions(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "sessions": state.catalog.list() }))
}

async fn get_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = state
        .catalog
        .get(&key)
        .ok_or(ReplayError::UnknownSession(key))?;
    Ok(Json(json!(info)))
}

async fn session_status(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    if !state.catalog.exists(&key) {
        return Err(ReplayError::UnknownSession(key).into());
    }
    let has_data = state.catalog.has_data(&key).await;
    let replay = state.engine.state(&key).await;
    Ok(Json(json!({
        "sessionKey": key,
        "hasData": has_data,
        "replay": replay.as_ref().map(ReplayStateData::from),
    })))
}

async fn refresh_session(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let info = state
        .catalog
        .refresh(&key)
        .await
        .ok_or(ReplayError::UnknownSession(key))?;
    Ok(Json(json!(info)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayRequest {
    start_time: Option<DateTime<Utc>>,
}

async fn play(
    State(state): State<AppState>,
    Path(key): Path<String>,
    body: Option<Json<PlayRequest>>,
) -> Result<Json<ReplayStateData>, ApiError> {
    let start_time = body.and_then(|Json(req)| req.start_time);
    let replay = state.engine.play(&key, start_time).await?;
    Ok(Json(ReplayStateData::from(&replay)))
}

async fn pause(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ReplayStateData>, ApiError> {
    Ok(Json(ReplayStateData::from(&state.engine.pause(&key).await?)))
}

async fn stop(
    State(state): State<AppState>,
    Path(key): Path<String>,
) -> Result<Json<ReplayStateData>, ApiError> {
    Ok(Json(ReplayStateData::from(&state.engine.stop(&key).await?)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SeekRequest {
    target_time: DateTime<Utc>,
}

async fn seek(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SeekRequest>,
) -> Result<Json<ReplayStateData>, ApiError> {
    let replay = state.engine.seek(&key, req.target_time).await?;
    Ok(Json(ReplayStateData::from(&replay)))
}

#[derive(Debug, Deserialize)]
struct SpeedRequest {
    speed: f64,
}

async fn speed(
    State(state): State<AppState>,
    Path(key): Path<String>,
    Json(req): Json<SpeedRequest>,
) -> Result<Json<ReplayStateData>, ApiError> {
    let speed = paddock::PlaybackSpeed::from_multiplier(req.speed)
        .ok_or(ReplayError::InvalidSpeed(req.speed))?;
    let replay = state.engine.set_speed(&key, speed).await?;
    Ok(Json(ReplayStateData::from(&replay)))
}

/// HTTP mapping of engine errors: 404 for unknown sessions, 400 for other
/// client errors, 500 with a generic body for internal ones.
struct ApiError(ReplayError);

impl From<ReplayError> for ApiError {
    fn from(err: ReplayError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            ReplayError::UnknownSession(_) => StatusCode::NOT_FOUND,
            ReplayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self.0, "internal error");
        }
        (status, Json(json!({ "error": self.0.client_message() }))).into_response()
    }
}
