//! Live-chat message endpoint.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use stayflow_channels::chat;
use stayflow_schema::{ChatRequest, ChatResponse};

use crate::state::AppState;

pub async fn post_message(
    State(state): State<AppState>,
    Json(req): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, (StatusCode, String)> {
    let session_id = chat::session_id(&req);
    let inbound = chat::to_inbound(&req, &session_id);
    let reply = state.gateway.handle_inbound(inbound).await.map_err(|err| {
        let status = if err.to_string().contains("rate limited") {
            StatusCode::TOO_MANY_REQUESTS
        } else {
            StatusCode::INTERNAL_SERVER_ERROR
        };
        (status, err.to_string())
    })?;
    Ok(Json(chat::to_response(reply, session_id)))
}
