//! HTTP surface for tracking jobs over uploaded videos.

pub mod api;
pub mod config;

use axum::{
    routing::{get, post},
    Router,
};
use jobs::{JobRegistry, Tracker};
use std::path::PathBuf;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

pub use config::ServerConfig;

#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<JobRegistry>,
    pub upload_dir: Arc<PathBuf>,
}

impl AppState {
    pub fn new(tracker: Arc<dyn Tracker>, upload_dir: PathBuf) -> Self {
        Self {
            registry: Arc::new(JobRegistry::new(tracker)),
            upload_dir: Arc::new(upload_dir),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/track", post(api::start_track))
        .route("/track/:job_id/progress", get(api::track_progress))
        .route("/track/:job_id/result", get(api::track_result))
        .route("/video/:video_id", get(api::get_video))
        .route("/health", get(api::health))
        // CORS for browser front ends
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
