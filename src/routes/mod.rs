pub mod api_routes;

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::service::chat_service::ChatService;

use self::api_routes::{
    chat_handler, clear_messages_handler, health_handler, list_messages_handler,
    list_sessions_handler,
};

pub fn router(chat_service: ChatService) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/chat", post(chat_handler))
        .route("/api/sessions", get(list_sessions_handler))
        .route(
            "/api/sessions/{id}/messages",
            get(list_messages_handler).delete(clear_messages_handler),
        )
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(chat_service)
}
