//! Structured booking endpoints used by the live-chat form.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use stayflow_schema::{
    CancelBookingRequest, CancelBookingResponse, ConfirmBookingRequest, ConfirmBookingResponse,
    StageBookingRequest, StageBookingResponse,
};

use crate::routes::error_response;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/stage", post(stage))
        .route("/confirm", post(confirm))
        .route("/cancel", post(cancel))
}

async fn stage(
    State(state): State<AppState>,
    Json(req): Json<StageBookingRequest>,
) -> Result<Json<StageBookingResponse>, (StatusCode, String)> {
    state
        .gateway
        .stage_booking(req)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn confirm(
    State(state): State<AppState>,
    Json(req): Json<ConfirmBookingRequest>,
) -> Result<Json<ConfirmBookingResponse>, (StatusCode, String)> {
    state
        .gateway
        .confirm_booking(req)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn cancel(
    State(state): State<AppState>,
    Json(req): Json<CancelBookingRequest>,
) -> Result<Json<CancelBookingResponse>, (StatusCode, String)> {
    state
        .gateway
        .cancel_booking(req)
        .await
        .map(Json)
        .map_err(error_response)
}
