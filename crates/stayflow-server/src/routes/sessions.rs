//! Session inspection and reset, for reconnecting clients and operators.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use stayflow_core::Session;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{guest_id}", get(get_session))
        .route("/{guest_id}/reset", post(reset_session))
}

async fn get_session(
    State(state): State<AppState>,
    Path(guest_id): Path<String>,
) -> Result<Json<Session>, StatusCode> {
    state
        .gateway
        .session_state(&guest_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}

async fn reset_session(
    State(state): State<AppState>,
    Path(guest_id): Path<String>,
) -> Result<Json<Session>, StatusCode> {
    state
        .gateway
        .reset_session(&guest_id)
        .await
        .map(Json)
        .ok_or(StatusCode::NOT_FOUND)
}
