//! Per-guest SSE feed of bus events.

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use axum::Router;
use futures_core::Stream;

use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/{guest_id}", get(event_stream))
}

/// The subscription is registered before the stream is handed back, so an
/// event published right after the response starts is never missed. Dropping
/// the connection drops the receiver and the bus prunes it on the next
/// publish.
async fn event_stream(
    State(state): State<AppState>,
    Path(guest_id): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.bus.subscribe(&guest_id).await;

    let stream = async_stream::stream! {
        yield Ok(Event::default().event("connected").data("{}"));

        let mut interval = tokio::time::interval(Duration::from_millis(100));
        loop {
            interval.tick().await;

            while let Ok(msg) = rx.try_recv() {
                if let Ok(json) = serde_json::to_string(&msg) {
                    yield Ok(Event::default().event(msg.event_name()).data(json));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::Request;
    use chrono::Utc;
    use stayflow_schema::BusMessage;
    use tokio::time::timeout;
    use tokio_stream::StreamExt;
    use tower::ServiceExt;

    use crate::create_router;
    use crate::testing::make_state;

    fn get(uri: &str) -> Request<Body> {
        Request::builder()
            .method("GET")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn stream_opens_with_a_connected_event() {
        let state = make_state();
        let response = create_router(state)
            .oneshot(get("/api/events/g-sse"))
            .await
            .unwrap();
        assert_eq!(response.status(), axum::http::StatusCode::OK);
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        assert!(content_type.starts_with("text/event-stream"));

        let mut body = response.into_body().into_data_stream();
        let first = timeout(Duration::from_millis(500), body.next())
            .await
            .expect("timed out waiting for first frame")
            .expect("stream ended")
            .unwrap();
        let first = String::from_utf8(first.to_vec()).unwrap();
        assert!(first.contains("event: connected"));
    }

    #[tokio::test]
    async fn stream_carries_bus_events_for_the_guest() {
        let state = make_state();
        let response = create_router(state.clone())
            .oneshot(get("/api/events/g-live"))
            .await
            .unwrap();
        let mut body = response.into_body().into_data_stream();

        // Skip the connected frame.
        timeout(Duration::from_millis(500), body.next())
            .await
            .expect("timed out waiting for first frame")
            .expect("stream ended")
            .unwrap();

        state
            .bus
            .publish(BusMessage::BookingStaged {
                guest_id: "g-live".to_string(),
                booking_id: "STAY20260901AB12CD".to_string(),
                at: Utc::now(),
            })
            .await
            .unwrap();

        let mut seen = String::new();
        while !seen.contains("event: booking_staged") {
            let chunk = timeout(Duration::from_millis(500), body.next())
                .await
                .expect("timed out waiting for the staged event")
                .expect("stream ended")
                .unwrap();
            seen.push_str(&String::from_utf8(chunk.to_vec()).unwrap());
        }
        assert!(seen.contains("STAY20260901AB12CD"));
    }
}
