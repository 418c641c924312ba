//! HTTP surface over [`LeaseService`].

mod error;
mod handlers;
mod routes;

use axum::{Router, extract::DefaultBodyLimit};
use tower_http::trace::TraceLayer;

use crate::service::LeaseService;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use handlers::{AcquireResponse, HealthResponse, ReleaseResponse};
pub use routes::lease_routes;

/// Room for multipart boundaries and headers on top of the archive itself.
const MULTIPART_OVERHEAD: u64 = 64 * 1024;

/// Application state shared across handlers.
#[derive(Debug, Clone)]
pub struct AppState {
    pub service: LeaseService,
}

impl AppState {
    pub fn new(service: LeaseService) -> Self {
        Self { service }
    }

    /// Upload limit in bytes; 0 means unlimited.
    pub fn max_upload_bytes(&self) -> u64 {
        self.service.manager().transfer().limits().max_bytes
    }
}

pub fn create_router(state: AppState) -> Router {
    let body_limit = match state.max_upload_bytes() {
        0 => DefaultBodyLimit::disable(),
        max => DefaultBodyLimit::max(
            usize::try_from(max.saturating_add(MULTIPART_OVERHEAD)).unwrap_or(usize::MAX),
        ),
    };

    lease_routes()
        .layer(body_limit)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
