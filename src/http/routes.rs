use super::handlers;
use super::state::AppState;
use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

/// Create the HTTP router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health check
        .route("/healthz", get(handlers::health_check))
        // Session control
        .route("/start", get(handlers::start_session))
        .route("/stop", get(handlers::stop_session))
        // Session queries
        .route("/sessions", get(handlers::list_sessions))
        // Add tracing middleware for request logging
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
