//! Export jobs: lifecycle, registry, artifact delivery and the orchestrator
//! that drives a job through its phases.

pub mod delivery;
pub mod job;
pub mod orchestrator;
pub mod store;

use serde::{Deserialize, Serialize};

pub use delivery::{
    ArtifactBody, ArtifactStore, DeliveryError, LocalArtifactStore, StoredArtifact,
};
pub use job::{
    CANCELLED_BY_USER, ExportJob, INTERNAL_FAILURE, JobId, JobStatus, JobSummary, JobUpdate,
};
pub use orchestrator::{ExportAccepted, ExportOrchestrator, ExportRejected};
pub use store::{InMemoryJobStore, JobStore};

use crate::settings::ExportSettings;
use crate::timeline::{TimelineElement, Track};

/// Errors from the job registry.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error("Export job {job_id} not found")]
    NotFound { job_id: JobId },

    #[error("Export job {job_id} is already {status}")]
    Finished { job_id: JobId, status: JobStatus },

    #[error("Export job {job_id} cannot {update} while {status}")]
    InvalidTransition {
        job_id: JobId,
        status: JobStatus,
        update: &'static str,
    },

    #[error("Export job {job_id} has no artifact yet ({status})")]
    NotReady { job_id: JobId, status: JobStatus },

    #[error("Job store failure: {reason}")]
    Storage { reason: String },
}

/// Body of an export request as sent by the editor.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportRequest {
    pub clips: Vec<TimelineElement>,
    pub tracks: Vec<Track>,
    pub export_settings: ExportSettings,
}
