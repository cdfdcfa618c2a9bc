//! Job polling, artifact delivery and cancellation.

use axum::extract::{Path, State};
use axum::http::{header, HeaderMap};
use axum::response::Response;
use axum::Json;

use vget_jobs::validate::is_valid_job_id;
use vget_models::{JobId, JobState, JobView};

use crate::delivery::serve_file;
use crate::error::{ApiError, ApiResult};
use crate::identity::Identity;
use crate::state::AppState;

fn parse_job_id(raw: &str) -> ApiResult<JobId> {
    if !is_valid_job_id(raw) {
        return Err(ApiError::bad_request("Invalid job id"));
    }
    Ok(JobId::from_string(raw))
}

/// Poll job status.
///
/// GET /api/jobs/:job_id/status
pub async fn get_status(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let id = parse_job_id(&job_id)?;
    state
        .orchestrator
        .status(&id, &caller)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::not_found("Job not found"))
}

/// Stream the artifact of a completed download job.
///
/// GET /api/jobs/:job_id/artifact
pub async fn get_artifact(
    State(state): State<AppState>,
    identity: Identity,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    if id.is_subtitle() {
        // Subtitle artifacts have their own endpoint; do not leak across.
        return Err(ApiError::not_found("Job not found"));
    }
    stream_artifact(state, identity, id, headers).await
}

/// Stream the artifact of a completed subtitle job.
///
/// GET /api/subtitles/:job_id/artifact
pub async fn get_subtitle_artifact(
    State(state): State<AppState>,
    identity: Identity,
    Path(job_id): Path<String>,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let id = parse_job_id(&job_id)?;
    if !id.is_subtitle() {
        return Err(ApiError::not_found("Job not found"));
    }
    stream_artifact(state, identity, id, headers).await
}

async fn stream_artifact(
    state: AppState,
    Identity(caller): Identity,
    id: JobId,
    headers: HeaderMap,
) -> ApiResult<Response> {
    let view = state
        .orchestrator
        .status(&id, &caller)
        .await
        .ok_or_else(|| ApiError::not_found("Job not found"))?;

    match view.status {
        JobState::Completed => {}
        JobState::Failed => {
            let reason = view
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "no artifact was produced".to_string());
            return Err(ApiError::NotReady(format!("Job failed: {reason}")));
        }
        JobState::Pending | JobState::Processing => {
            return Err(ApiError::NotReady("Job is still in progress".to_string()))
        }
    }

    let (path, content_type) = state
        .orchestrator
        .artifact(&id, &caller)
        .await
        .ok_or_else(|| ApiError::not_found("Job produced no artifact"))?;

    let range_header = headers.get(header::RANGE).and_then(|v| v.to_str().ok());
    serve_file(&path, &content_type, range_header).await
}

/// Cancel an in-flight job.
///
/// DELETE /api/jobs/:job_id
pub async fn cancel_job(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Path(job_id): Path<String>,
) -> ApiResult<Json<JobView>> {
    let id = parse_job_id(&job_id)?;
    let view = state.orchestrator.cancel(&id, &caller).await?;
    Ok(Json(view))
}
