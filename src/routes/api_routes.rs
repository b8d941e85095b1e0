use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::errors::AppError;
use crate::models::ChatRequest;
use crate::service::chat_service::ChatService;

// ── Handlers ─────────────────────────────────────────────────────────────────

/// GET `/health`
pub async fn health_handler() -> &'static str {
    "ok"
}

/// POST `/api/chat` — submit a user message, returns the assistant turn
pub async fn chat_handler(
    State(svc): State<ChatService>,
    Json(request): Json<ChatRequest>,
) -> Response {
    match svc.chat(request).await {
        Ok(response) => Json(response).into_response(),
        Err(err) => error_response(&err),
    }
}

/// GET `/api/sessions` — session summaries, most recent first
pub async fn list_sessions_handler(State(svc): State<ChatService>) -> impl IntoResponse {
    Json(svc.list_sessions().await)
}

/// GET `/api/sessions/{id}/messages` — transcript of one session
pub async fn list_messages_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.get_turns(&id).await {
        Ok(turns) => Json(turns).into_response(),
        Err(err) => error_response(&err),
    }
}

/// DELETE `/api/sessions/{id}/messages` — clear the conversation
pub async fn clear_messages_handler(
    Path(id): Path<String>,
    State(svc): State<ChatService>,
) -> Response {
    match svc.clear(&id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(&err),
    }
}

// ── Helper ────────────────────────────────────────────────────────────────────

fn error_response(err: &AppError) -> Response {
    let status = if err.is_validation() {
        StatusCode::BAD_REQUEST
    } else if err.is_not_found() {
        StatusCode::NOT_FOUND
    } else if err.is_backend_unavailable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::INTERNAL_SERVER_ERROR
    };

    (status, Json(json!({ "error": err.to_string() }))).into_response()
}
