//! JSON-over-HTTP surface for the orchestrator.

mod error;
pub mod orders;
pub mod payments;
pub mod webhooks;

use crate::application::PaymentOrchestrator;
use axum::Router;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<PaymentOrchestrator>,
}

impl AppState {
    pub fn new(orchestrator: PaymentOrchestrator) -> Self {
        Self {
            orchestrator: Arc::new(orchestrator),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .merge(payments::router())
        .merge(webhooks::router())
        .merge(orders::router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
