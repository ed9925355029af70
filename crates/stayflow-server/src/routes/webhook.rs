//! Provider-facing webhook: form fields in, XML message document out.

use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Form;
use stayflow_channels::webhook::{render_reply, render_text, WebhookForm};

use crate::state::AppState;

pub async fn receive_message(
    State(state): State<AppState>,
    Form(form): Form<WebhookForm>,
) -> Response {
    let inbound = form.to_inbound();
    match state.gateway.handle_inbound(inbound).await {
        Ok(reply) => xml_response(StatusCode::OK, render_reply(&reply)),
        Err(err) if err.to_string().contains("rate limited") => xml_response(
            StatusCode::TOO_MANY_REQUESTS,
            render_text("You're sending messages a little quickly. Give me a moment and try again."),
        ),
        Err(err) => {
            tracing::error!(error = %err, "webhook processing failed");
            // the provider relays whatever we send; a 5xx would only make
            // it retry the same message
            xml_response(
                StatusCode::OK,
                render_text("Sorry, something went wrong on our side. Please try again."),
            )
        }
    }
}

fn xml_response(status: StatusCode, body: String) -> Response {
    (status, [(header::CONTENT_TYPE, "application/xml")], body).into_response()
}
