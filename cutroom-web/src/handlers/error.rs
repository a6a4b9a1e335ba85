//! JSON error responses.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use cutroom_core::{CutroomError, JobError};
use serde::Serialize;

/// Errors surfaced to API clients as `{"success": false, "error": ...}`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Export job {job_id} not found")]
    JobNotFound { job_id: String },

    #[error("{message}")]
    BadRequest { message: String },

    #[error("{message}")]
    Conflict { message: String },

    #[error("{message}")]
    Internal { message: String },
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    error: String,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::JobNotFound { .. } => StatusCode::NOT_FOUND,
            ApiError::BadRequest { .. } => StatusCode::BAD_REQUEST,
            ApiError::Conflict { .. } => StatusCode::CONFLICT,
            ApiError::Internal { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<JobError> for ApiError {
    fn from(error: JobError) -> Self {
        match error {
            JobError::NotFound { job_id } => ApiError::JobNotFound {
                job_id: job_id.to_string(),
            },
            JobError::NotReady { .. } => ApiError::BadRequest {
                message: error.to_string(),
            },
            JobError::Finished { .. } | JobError::InvalidTransition { .. } => ApiError::Conflict {
                message: error.to_string(),
            },
            JobError::Storage { .. } => {
                tracing::error!("Job store failure: {}", error);
                ApiError::Internal {
                    message: "Export job error occurred".to_string(),
                }
            }
        }
    }
}

impl From<CutroomError> for ApiError {
    fn from(error: CutroomError) -> Self {
        match error {
            CutroomError::Job(e) => e.into(),
            e if e.is_user_error() => ApiError::BadRequest {
                message: e.user_message(),
            },
            e => {
                tracing::error!("Request failed: {}", e);
                ApiError::Internal {
                    message: e.user_message(),
                }
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use cutroom_core::{JobId, JobStatus};

    use super::*;

    #[test]
    fn test_job_errors_map_to_status_codes() {
        let job_id = JobId::new();
        let cases = [
            (JobError::NotFound { job_id }, StatusCode::NOT_FOUND),
            (
                JobError::NotReady {
                    job_id,
                    status: JobStatus::Processing,
                },
                StatusCode::BAD_REQUEST,
            ),
            (
                JobError::Finished {
                    job_id,
                    status: JobStatus::Completed,
                },
                StatusCode::CONFLICT,
            ),
            (
                JobError::Storage {
                    reason: "unavailable".to_string(),
                },
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(ApiError::from(error).status(), expected);
        }
    }

    #[test]
    fn test_internal_errors_hide_details() {
        let error = ApiError::from(CutroomError::Configuration {
            reason: "work dir /secret missing".to_string(),
        });
        assert_eq!(error.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!error.to_string().contains("/secret"));
    }
}
