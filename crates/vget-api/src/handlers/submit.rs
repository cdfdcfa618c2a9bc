//! Submission handlers.
//!
//! Each returns 202 with a pending job view, except info cache hits which
//! come back 200 and terminal. The `X-Cache` header tells callers which path
//! they hit without digging into the body.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use validator::Validate;

use vget_jobs::{DownloadRequest, Submission};
use vget_models::JobView;

use crate::error::{ApiError, ApiResult};
use crate::identity::Identity;
use crate::state::AppState;

#[derive(Deserialize, Validate)]
pub struct InfoRequest {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
}

#[derive(Deserialize, Validate)]
pub struct DownloadRequestBody {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    #[validate(length(min = 1, max = 128))]
    pub format_id: String,
    /// Quality label of the chosen format, e.g. "720p" or "audio".
    pub quality: Option<String>,
}

#[derive(Deserialize, Validate)]
pub struct SubtitlesRequest {
    #[validate(length(min = 1, max = 2048))]
    pub url: String,
    /// Language code; omitted means the source default.
    #[validate(length(min = 2, max = 16))]
    pub lang: Option<String>,
}

fn submission_response(submission: Submission) -> Response {
    match submission {
        Submission::Cached(view) => {
            (StatusCode::OK, [("X-Cache", "HIT")], Json(view)).into_response()
        }
        Submission::Queued(view) => {
            (StatusCode::ACCEPTED, [("X-Cache", "MISS")], Json(view)).into_response()
        }
    }
}

/// Request media metadata.
///
/// POST /api/videos/info
pub async fn submit_info(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(request): Json<InfoRequest>,
) -> ApiResult<Response> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let submission = state.orchestrator.submit_info(&caller, &request.url).await?;
    Ok(submission_response(submission))
}

/// Request a media download.
///
/// POST /api/videos/download
pub async fn submit_download(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(request): Json<DownloadRequestBody>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let submission = state
        .orchestrator
        .submit_download(
            &caller,
            DownloadRequest {
                url: request.url,
                format_id: request.format_id,
                quality: request.quality,
            },
        )
        .await?;
    Ok((StatusCode::ACCEPTED, Json(submission.view().clone())))
}

/// Request a subtitle track.
///
/// POST /api/videos/subtitles
pub async fn submit_subtitles(
    State(state): State<AppState>,
    Identity(caller): Identity,
    Json(request): Json<SubtitlesRequest>,
) -> ApiResult<(StatusCode, Json<JobView>)> {
    request
        .validate()
        .map_err(|e| ApiError::bad_request(e.to_string()))?;

    let submission = state
        .orchestrator
        .submit_subtitles(&caller, &request.url, request.lang)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(submission.view().clone())))
}
