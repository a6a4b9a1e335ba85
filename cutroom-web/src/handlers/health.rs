//! Liveness endpoint.

use axum::Json;
use axum::extract::State;
use chrono::Utc;
use serde::Serialize;

use super::ApiError;
use crate::server::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    pub status: &'static str,
    pub jobs: usize,
    pub uptime_secs: i64,
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, ApiError> {
    let jobs = state.orchestrator.jobs().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        jobs: jobs.len(),
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
    }))
}
