//! HTTP server wiring for the export control plane.

use axum::Router;
use axum::routing::{delete, get, post};
use chrono::{DateTime, Utc};
use cutroom_core::ExportOrchestrator;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{cancel_export, download_export, export_status, health, start_export};

/// Shared state handed to every handler.
#[derive(Clone, Debug)]
pub struct AppState {
    pub orchestrator: ExportOrchestrator,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    pub fn new(orchestrator: ExportOrchestrator) -> Self {
        Self {
            orchestrator,
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Builds the API router over `state`.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/export/start", post(start_export))
        .route("/export/status/{job_id}", get(export_status))
        .route("/export/cancel/{job_id}", delete(cancel_export))
        .route("/export/download/{job_id}", get(download_export))
        .route("/health", get(health))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Serves the API on the configured address until the process exits.
///
/// Also runs the job eviction sweep for the lifetime of the server.
///
/// # Errors
///
/// - `ServerError::Bind` - Address unavailable
/// - `ServerError::Serve` - Listener failed while serving
pub async fn run_server(orchestrator: ExportOrchestrator) -> Result<(), ServerError> {
    let address = orchestrator.config().server.bind_address();
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|source| ServerError::Bind {
            address: address.clone(),
            source,
        })?;

    let sweep = orchestrator.spawn_eviction_sweep();
    let app = build_router(AppState::new(orchestrator));

    tracing::info!("Cutroom export API listening on http://{}", address);
    let result = axum::serve(listener, app).await;
    sweep.abort();
    result.map_err(ServerError::from)
}
