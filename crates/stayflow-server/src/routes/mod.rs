pub mod addons;
pub mod bookings;
pub mod chat;
pub mod events;
pub mod sessions;
pub mod webhook;

use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use stayflow_core::CoreError;

use crate::state::AppState;

pub fn api_router() -> Router<AppState> {
    Router::new()
        .route("/chat", post(chat::post_message))
        .nest("/bookings", bookings::router())
        .nest("/addons", addons::router())
        .nest("/sessions", sessions::router())
        .nest("/events", events::router())
}

pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Map core errors onto HTTP statuses; the body carries the display form.
pub(crate) fn error_response(err: CoreError) -> (StatusCode, String) {
    let status = match &err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::InvalidInput(_) | CoreError::IncompleteDraft(_) => {
            StatusCode::UNPROCESSABLE_ENTITY
        }
        CoreError::AlreadyFinalized { .. } => StatusCode::CONFLICT,
        CoreError::ExternalServiceFailure { .. } => StatusCode::BAD_GATEWAY,
        CoreError::ConcurrencyViolation { .. } => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
