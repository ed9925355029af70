//! Standalone add-on purchases from the live-chat UI.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use stayflow_schema::{PurchaseAddonsRequest, PurchaseAddonsResponse};

use crate::routes::error_response;
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/purchase", post(purchase))
}

async fn purchase(
    State(state): State<AppState>,
    Json(req): Json<PurchaseAddonsRequest>,
) -> Result<Json<PurchaseAddonsResponse>, (StatusCode, String)> {
    state
        .gateway
        .purchase_addons(req)
        .await
        .map(Json)
        .map_err(error_response)
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use stayflow_schema::PurchaseAddonsResponse;
    use tower::ServiceExt;

    use crate::create_router;
    use crate::testing::make_state;

    fn post_json(uri: &str, json: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(json.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn purchase_prices_the_cart_and_links_checkout() {
        let state = make_state();
        let body = r#"{"session_id":"chat-x","extras":["spa","brownie","brownie"]}"#;

        let response = create_router(state)
            .oneshot(post_json("/api/addons/purchase", body))
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let receipt: PurchaseAddonsResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(receipt.total, 5400);
        assert!(receipt.items.iter().any(|item| item.contains("x2")));
        assert!(receipt.payment_link.is_some());
    }

    #[tokio::test]
    async fn complimentary_only_purchase_has_no_checkout() {
        let state = make_state();
        let body = r#"{"session_id":"chat-y","extras":["morning_coffee"]}"#;

        let response = create_router(state)
            .oneshot(post_json("/api/addons/purchase", body))
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let receipt: PurchaseAddonsResponse = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(receipt.total, 0);
        assert!(receipt.payment_link.is_none());
    }
}
