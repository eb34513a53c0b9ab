/// REST API endpoints for tracking jobs
/// Start a job for an uploaded video, follow its progress, fetch the result
use annotations::AnnotationTable;
use axum::{
    extract::{rejection::JsonRejection, Path, Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use jobs::{JobId, JobStatus, RegistryError, TrackParams};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::{Path as FsPath, PathBuf};
use std::sync::Arc;
use tower::ServiceExt;
use tower_http::services::ServeFile;
use tracing::{info, warn};

use crate::AppState;

/// API error type
#[derive(Debug)]
pub enum ApiError {
    NotFound(&'static str),
    BadRequest(String),
    Conflict(String),
    NotReady,
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, what.to_string()),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::NotReady => (StatusCode::ACCEPTED, "Job not finished".to_string()),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<RegistryError> for ApiError {
    fn from(e: RegistryError) -> Self {
        let message = e.to_string();
        match e {
            RegistryError::Busy { .. } => ApiError::Conflict(message),
            RegistryError::NotFound(_) => ApiError::NotFound("Job not found"),
            RegistryError::NotReady(_) => ApiError::NotReady,
            RegistryError::Failed(message) => ApiError::Internal(message),
            RegistryError::Params(_) => ApiError::BadRequest(message),
            RegistryError::Spawn(_) => ApiError::Internal(message),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub video_id: String,
    #[serde(default)]
    pub params: TrackParams,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TrackResponse {
    pub job_id: JobId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ProgressResponse {
    pub status: JobStatus,
    pub current_frame: u64,
    pub total_frames: u64,
    pub message: String,
}

/// A client supplied id, trimmed. Ids that could name a path outside the
/// upload directory are refused.
pub fn validate_video_id(video_id: &str) -> Option<&str> {
    let id = video_id.trim();
    let unsafe_id = id.is_empty() || id.contains(['/', '\\']) || id.contains("..");
    (!unsafe_id).then_some(id)
}

/// `<upload_dir>/<id>.mp4` (or `.MP4`) if it exists.
pub fn resolve_video(upload_dir: &FsPath, video_id: &str) -> Option<PathBuf> {
    let id = validate_video_id(video_id)?;
    [".mp4", ".MP4"]
        .iter()
        .map(|ext| upload_dir.join(format!("{id}{ext}")))
        .find(|path| path.is_file())
}

fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse().map_err(|_| ApiError::NotFound("Job not found"))
}

/// POST /track - Start tracking an uploaded video
pub async fn start_track(
    State(state): State<AppState>,
    payload: Result<Json<TrackRequest>, JsonRejection>,
) -> Result<Json<TrackResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::BadRequest(e.body_text()))?;
    let path = resolve_video(&state.upload_dir, &req.video_id)
        .ok_or(ApiError::NotFound("Video not found"))?;

    let key = req.video_id.trim();
    let job_id = state.registry.submit(key, path, req.params).map_err(|e| {
        warn!(video = %key, error = %e, "track request refused");
        ApiError::from(e)
    })?;
    info!(job = %job_id, video = %key, "track job started");
    Ok(Json(TrackResponse { job_id }))
}

/// GET /track/:job_id/progress - Job status and frame progress
pub async fn track_progress(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<ProgressResponse>, ApiError> {
    let id = parse_job_id(&job_id)?;
    let job = state
        .registry
        .state(id)
        .ok_or(ApiError::NotFound("Job not found"))?;
    let (current_frame, total_frames) = job.progress();
    Ok(Json(ProgressResponse {
        status: job.status(),
        current_frame,
        total_frames,
        message: job.message().to_string(),
    }))
}

/// GET /track/:job_id/result - The annotation table once the job is done
pub async fn track_result(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<Arc<AnnotationTable>>, ApiError> {
    let id = parse_job_id(&job_id)?;
    Ok(Json(state.registry.result(id)?))
}

/// GET /video/:video_id - Stream an uploaded video
pub async fn get_video(
    State(state): State<AppState>,
    Path(video_id): Path<String>,
    request: Request,
) -> Result<Response, ApiError> {
    let path = resolve_video(&state.upload_dir, &video_id)
        .ok_or(ApiError::NotFound("Video not found"))?;
    let response = ServeFile::new(path)
        .oneshot(request)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(response.into_response())
}

/// GET /health
pub async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}
