//! HTTP REST API routes

mod adapter_routes;
mod generation_routes;

use axum::{
    routing::{delete, get, post},
    Router,
};
use std::sync::Arc;

use crate::infrastructure::state::AppState;

pub use adapter_routes::*;
pub use generation_routes::*;

/// Create all API routes
pub fn create_routes() -> Router<Arc<AppState>> {
    Router::new()
        // Generation
        .route("/api/generate", post(generation_routes::generate))
        .route("/api/jobs/{id}", get(generation_routes::get_job))
        .route("/api/jobs/{id}/retry", post(generation_routes::retry_job))
        .route(
            "/api/jobs/{id}/poll",
            delete(generation_routes::cancel_poll),
        )
        // Adapter training
        .route(
            "/api/characters/{id}/adapter/train",
            post(adapter_routes::start_training),
        )
        .route(
            "/api/adapters/{id}/resume",
            post(adapter_routes::resume_pipeline),
        )
        .route(
            "/api/adapters/{id}/archive",
            post(adapter_routes::archive_pipeline),
        )
        .route(
            "/api/adapters/{id}/dataset",
            post(adapter_routes::add_dataset_image),
        )
        .route("/api/adapters/{id}", get(adapter_routes::get_pipeline))
}
