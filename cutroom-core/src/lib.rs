//! Cutroom Core - timeline export pipeline
//!
//! This crate turns a declarative multi-track timeline into a rendered MP4:
//! timeline validation, output settings resolution, asset download, filter
//! graph compilation, ffmpeg supervision, and export job orchestration.

pub mod assets;
pub mod config;
pub mod export;
pub mod graph;
pub mod mode;
pub mod render;
pub mod settings;
pub mod timeline;
pub mod tracing_setup;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_fixtures;

// Re-export main types for convenient access
pub use assets::{AssetDownloader, AssetError, AssetResolver, DownloadedAssetMap, RetryPolicy};
pub use config::CutroomConfig;
pub use export::{
    ArtifactStore, DeliveryError, ExportJob, ExportOrchestrator, ExportRequest, JobError, JobId,
    JobStatus, JobStore, LocalArtifactStore,
};
pub use graph::{FilterGraph, GraphError, compile_graph};
pub use mode::RuntimeMode;
pub use render::{FailureClass, FfmpegRenderer, RenderError, Renderer, SimulatedRenderer};
pub use settings::{ExportSettings, OutputProfile, SettingsError, resolve_output_profile};
pub use timeline::{
    TimelineElement, Track, ValidationOptions, ValidationReport, validate_timeline,
    validate_timeline_with,
};

/// Core errors that can bubble up from any Cutroom subsystem.
#[derive(Debug, thiserror::Error)]
pub enum CutroomError {
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    #[error("Filter graph error: {0}")]
    Graph(#[from] GraphError),

    #[error("Render error: {0}")]
    Render(#[from] RenderError),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Settings error: {0}")]
    Settings(#[from] SettingsError),

    #[error("Configuration error: {reason}")]
    Configuration { reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CutroomError {
    /// Returns a user-friendly error message suitable for display.
    pub fn user_message(&self) -> String {
        match self {
            CutroomError::Asset(_) => "A media asset could not be retrieved".to_string(),
            CutroomError::Graph(e) => format!("Timeline could not be compiled: {e}"),
            CutroomError::Render(e) => e.user_message(),
            CutroomError::Delivery(_) => "The rendered video could not be stored".to_string(),
            CutroomError::Job(JobError::NotFound { job_id }) => {
                format!("Export job {job_id} not found")
            }
            CutroomError::Job(JobError::NotReady { job_id, status }) => {
                format!("Export job {job_id} is {status}, not completed")
            }
            CutroomError::Job(_) => "Export job error occurred".to_string(),
            CutroomError::Settings(e) => format!("Invalid export settings: {e}"),
            CutroomError::Configuration { .. } => "Configuration error occurred".to_string(),
            CutroomError::Io(_) => "File system error occurred".to_string(),
        }
    }

    /// Checks if this error is due to user input validation.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            CutroomError::Settings(_)
                | CutroomError::Job(JobError::NotFound { .. } | JobError::NotReady { .. })
        )
    }
}

pub type Result<T> = std::result::Result<T, CutroomError>;
