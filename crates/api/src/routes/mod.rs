//! API routes

pub mod billing;
pub mod health;

use axum::{
    routing::{get, post},
    Router,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// Create all API routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check routes (at root level for infrastructure monitoring)
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        // Billing core
        .route("/billing/webhook", post(billing::webhook))
        .route("/billing/access", get(billing::check_access))
        .route("/billing/trial", post(billing::start_trial))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
