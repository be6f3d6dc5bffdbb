//! Shared application state for the server.

use std::sync::Arc;

use engine::observer::RunEvent;
use engine::orchestrate::Engine;
use tokio::sync::broadcast;

/// Shared state accessible from all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    /// Sender side of the engine's run-event broadcast; SSE clients subscribe here.
    pub event_tx: broadcast::Sender<RunEvent>,
}

impl AppState {
    pub fn new(engine: Arc<Engine>, event_tx: broadcast::Sender<RunEvent>) -> Self {
        Self { engine, event_tx }
    }
}
