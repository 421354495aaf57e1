//! HTTP surface over the engine. Pure transport: every reply string and
//! every decision comes from the engine; this layer only shapes JSON and
//! status codes.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use dashmap::DashMap;
use engine::control::ControlError;
use engine::Engine;
use serde::Deserialize;
use tracing::error;

/// Undelivered notifications, queued per actor until the next drain.
pub type Inbox = Arc<DashMap<String, Vec<String>>>;

#[derive(Clone)]
pub struct ApiState {
    pub engine: Arc<Engine>,
    pub inbox: Inbox,
}

pub fn router() -> Router<ApiState> {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/session/{actor_id}/start", post(start_session))
        .route("/session/{actor_id}/input", post(session_input))
        .route("/session/{actor_id}/notifications", get(drain_notifications))
        .route("/control/{action}", post(control_action))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn start_session(
    State(state): State<ApiState>,
    Path(actor_id): Path<String>,
) -> Response {
    match state.engine.start_session(&actor_id).await {
        Ok(replies) => Json(serde_json::json!({ "replies": replies })).into_response(),
        Err(e) => {
            error!(actor = %actor_id, error = %e, "start_session failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
struct InputBody {
    text: String,
}

async fn session_input(
    State(state): State<ApiState>,
    Path(actor_id): Path<String>,
    Json(body): Json<InputBody>,
) -> Response {
    match state.engine.handle_session_input(&actor_id, &body.text).await {
        Ok(replies) => Json(serde_json::json!({ "replies": replies })).into_response(),
        Err(e) => {
            error!(actor = %actor_id, error = %e, "session input failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}

async fn drain_notifications(
    State(state): State<ApiState>,
    Path(actor_id): Path<String>,
) -> Response {
    let queued = state
        .inbox
        .remove(&actor_id)
        .map(|(_, queued)| queued)
        .unwrap_or_default();
    Json(serde_json::json!({ "notifications": queued })).into_response()
}

#[derive(Debug, Deserialize)]
struct ControlBody {
    actor_id: String,
    #[serde(default)]
    payload: serde_json::Value,
}

async fn control_action(
    State(state): State<ApiState>,
    Path(action): Path<String>,
    Json(body): Json<ControlBody>,
) -> Response {
    match state
        .engine
        .handle_control_action(&body.actor_id, &action, &body.payload)
        .await
    {
        Ok(replies) => Json(serde_json::json!({ "replies": replies })).into_response(),
        Err(ControlError::NotPrivileged) => (
            StatusCode::FORBIDDEN,
            Json(serde_json::json!({ "error": "not privileged" })),
        )
            .into_response(),
        Err(e @ ControlError::UnknownAction(_))
        | Err(e @ ControlError::MissingField(_))
        | Err(e @ ControlError::InvalidValue(_, _)) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(ControlError::Store(e)) => {
            error!(action = %action, error = %e, "control action failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "error": "internal error" })),
            )
                .into_response()
        }
    }
}
