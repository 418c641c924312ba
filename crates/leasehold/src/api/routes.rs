use axum::{
    Router,
    routing::{get, post},
};

use super::AppState;
use super::handlers;

/// Lease routes, relative to the server root.
pub fn lease_routes() -> Router<AppState> {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/sessions/acquire", post(handlers::acquire))
        .route("/sessions/{id}", get(handlers::export))
        .route("/sessions/{id}/release", post(handlers::release))
}
