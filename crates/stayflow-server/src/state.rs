use std::sync::Arc;

use stayflow_bus::EventBus;
use stayflow_gateway::Gateway;

/// Shared application state accessible from all route handlers.
#[derive(Clone)]
pub struct AppState {
    pub gateway: Arc<Gateway>,
    /// Event bus handle for SSE streaming.
    pub bus: Arc<EventBus>,
}
