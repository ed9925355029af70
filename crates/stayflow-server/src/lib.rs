pub mod routes;
pub mod state;

use anyhow::Result;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::state::AppState;

pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(routes::health))
        .route("/webhook/message", post(routes::webhook::receive_message))
        .nest("/api", routes::api_router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(state: AppState, addr: &str) -> Result<()> {
    let app = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("stayflow-server listening on {}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::Arc;

    use stayflow_bus::EventBus;
    use stayflow_core::config::{CatalogConfig, RateLimitConfig};
    use stayflow_core::{BookingLedger, Catalog, SessionLocks, SessionStore};
    use stayflow_gateway::{Gateway, RateLimiter};
    use stayflow_services::{StubAnswerService, StubPaymentProcessor};

    use crate::state::AppState;

    pub(crate) fn make_state() -> AppState {
        make_state_with(Arc::new(StubPaymentProcessor::new()))
    }

    pub(crate) fn make_state_with(payments: Arc<StubPaymentProcessor>) -> AppState {
        let catalog = Arc::new(Catalog::from_config(&CatalogConfig::default()));
        let store = Arc::new(SessionStore::new(60));
        let locks = Arc::new(SessionLocks::new());
        let ledger = Arc::new(BookingLedger::new(catalog.clone(), payments));
        let bus = Arc::new(EventBus::new(16));
        let gateway = Gateway::new(
            catalog,
            "Acacia Ridge Lodge",
            store,
            locks,
            ledger,
            Arc::new(StubAnswerService::new("The pool opens at 7.")),
            bus.publisher(),
            RateLimiter::new(RateLimitConfig::default()),
        );
        AppState {
            gateway: Arc::new(gateway),
            bus,
        }
    }
}
