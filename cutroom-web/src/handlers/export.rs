//! Export job endpoints.

use axum::Json;
use axum::body::Body;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use cutroom_core::export::JobSummary;
use cutroom_core::{ExportRequest, JobId};
use serde::Serialize;

use super::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub job_id: Option<JobId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub success: bool,
    pub job: JobSummary,
}

#[derive(Debug, Serialize)]
pub struct CancelResponse {
    pub success: bool,
}

/// Unparseable ids cannot name a job, so they are reported as unknown.
fn parse_job_id(raw: &str) -> Result<JobId, ApiError> {
    raw.parse().map_err(|_| ApiError::JobNotFound {
        job_id: raw.to_string(),
    })
}

/// `POST /export/start`
///
/// Responds 202 with the new job id, or 400 when the timeline is rejected.
/// Warnings are returned either way.
pub async fn start_export(
    State(state): State<AppState>,
    payload: Result<Json<ExportRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match payload {
        Ok(request) => request,
        Err(rejection) => {
            return ApiError::BadRequest {
                message: format!("Invalid export request: {}", rejection.body_text()),
            }
            .into_response();
        }
    };

    match state.orchestrator.start_export(request).await {
        Ok(accepted) => (
            StatusCode::ACCEPTED,
            Json(StartResponse {
                success: true,
                job_id: Some(accepted.job_id),
                error: None,
                warnings: accepted.warnings,
            }),
        )
            .into_response(),
        Err(rejected) => (
            StatusCode::BAD_REQUEST,
            Json(StartResponse {
                success: false,
                job_id: None,
                error: Some(rejected.error),
                warnings: rejected.warnings,
            }),
        )
            .into_response(),
    }
}

/// `GET /export/status/{job_id}`
pub async fn export_status(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<StatusResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let job = state.orchestrator.status(&job_id).await?;
    Ok(Json(StatusResponse {
        success: true,
        job: job.summary(),
    }))
}

/// `DELETE /export/cancel/{job_id}`
///
/// Jobs that already finished answer 409.
pub async fn cancel_export(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Json<CancelResponse>, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    state.orchestrator.cancel(&job_id).await?;
    Ok(Json(CancelResponse { success: true }))
}

/// `GET /export/download/{job_id}`
///
/// Streams the finished MP4 through the server as an attachment.
pub async fn download_export(
    State(state): State<AppState>,
    Path(job_id): Path<String>,
) -> Result<Response, ApiError> {
    let job_id = parse_job_id(&job_id)?;
    let (job, body) = state.orchestrator.open_artifact(&job_id).await?;

    let content_type = job
        .artifact
        .as_ref()
        .map(|artifact| mime_guess::from_path(&artifact.key).first_or_octet_stream())
        .unwrap_or(mime_guess::mime::APPLICATION_OCTET_STREAM);

    tracing::debug!(job_id = %job_id, "Serving artifact ({} bytes)", body.size);

    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, body.size.to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"export-{job_id}.mp4\""),
            ),
        ],
        Body::from_stream(body.stream),
    )
        .into_response())
}
