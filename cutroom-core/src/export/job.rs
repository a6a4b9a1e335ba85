//! Export job record and its state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::JobError;
use super::delivery::StoredArtifact;
use crate::settings::OutputProfile;

pub const CANCELLED_BY_USER: &str = "Cancelled by user";
/// Error recorded when a job's task dies without reporting an outcome.
pub const INTERNAL_FAILURE: &str = "Export failed due to an internal error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobId(Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for JobId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            JobStatus::Queued => "queued",
            JobStatus::Processing => "processing",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
            JobStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change applied to a job through [`ExportJob::apply`].
#[derive(Debug, Clone, PartialEq)]
pub enum JobUpdate {
    Start,
    /// Overall progress; lower values than the current one are ignored.
    Progress(u8),
    Complete {
        download_url: String,
        artifact: StoredArtifact,
    },
    Fail {
        message: String,
    },
    Cancel,
}

impl JobUpdate {
    fn name(&self) -> &'static str {
        match self {
            JobUpdate::Start => "start",
            JobUpdate::Progress(_) => "progress",
            JobUpdate::Complete { .. } => "complete",
            JobUpdate::Fail { .. } => "fail",
            JobUpdate::Cancel => "cancel",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportJob {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    pub error: Option<String>,
    pub download_url: Option<String>,
    pub artifact: Option<StoredArtifact>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub profile: OutputProfile,
}

impl ExportJob {
    pub fn new(id: JobId, profile: OutputProfile, created_at: DateTime<Utc>) -> Self {
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            error: None,
            download_url: None,
            artifact: None,
            created_at,
            completed_at: None,
            profile,
        }
    }

    /// Applies `update` at time `now`.
    ///
    /// Terminal jobs reject every update, so a late result from a job that
    /// was cancelled never overwrites the cancellation.
    ///
    /// # Errors
    ///
    /// - `JobError::Finished` - Job already reached a terminal state
    /// - `JobError::InvalidTransition` - Update does not apply to the current state
    pub fn apply(&mut self, update: JobUpdate, now: DateTime<Utc>) -> Result<(), JobError> {
        if self.status.is_terminal() {
            return Err(JobError::Finished {
                job_id: self.id,
                status: self.status,
            });
        }

        match (self.status, update) {
            (JobStatus::Queued, JobUpdate::Start) => {
                self.status = JobStatus::Processing;
            }
            (_, JobUpdate::Progress(percent)) => {
                self.progress = self.progress.max(percent.min(100));
            }
            (
                JobStatus::Processing,
                JobUpdate::Complete {
                    download_url,
                    artifact,
                },
            ) => {
                self.status = JobStatus::Completed;
                self.progress = 100;
                self.download_url = Some(download_url);
                self.artifact = Some(artifact);
                self.completed_at = Some(now);
            }
            (_, JobUpdate::Fail { message }) => {
                self.status = JobStatus::Failed;
                self.error = Some(message);
                self.completed_at = Some(now);
            }
            (_, JobUpdate::Cancel) => {
                self.status = JobStatus::Cancelled;
                self.error = Some(CANCELLED_BY_USER.to_string());
                self.completed_at = Some(now);
            }
            (status, update) => {
                return Err(JobError::InvalidTransition {
                    job_id: self.id,
                    status,
                    update: update.name(),
                });
            }
        }

        Ok(())
    }

    pub fn summary(&self) -> JobSummary {
        JobSummary {
            id: self.id,
            status: self.status,
            progress: self.progress,
            error: self.error.clone(),
            download_url: self.download_url.clone(),
            created_at: self.created_at,
            completed_at: self.completed_at,
        }
    }
}

/// Public view of a job, as returned by the status endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSummary {
    pub id: JobId,
    pub status: JobStatus,
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{ExportSettings, resolve_output_profile};

    fn job() -> ExportJob {
        let profile = resolve_output_profile(&ExportSettings::default()).unwrap();
        ExportJob::new(JobId::new(), profile, Utc::now())
    }

    fn artifact() -> StoredArtifact {
        StoredArtifact {
            key: "a.mp4".to_string(),
            download_url: "http://localhost/export/download/a".to_string(),
            size: 10,
        }
    }

    #[test]
    fn test_happy_path() {
        let mut job = job();
        job.apply(JobUpdate::Start, Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Processing);

        job.apply(JobUpdate::Progress(40), Utc::now()).unwrap();
        job.apply(
            JobUpdate::Complete {
                download_url: artifact().download_url,
                artifact: artifact(),
            },
            Utc::now(),
        )
        .unwrap();

        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert!(job.download_url.is_some());
        assert!(job.completed_at.is_some());
    }

    #[test]
    fn test_progress_is_monotonic_and_clamped() {
        let mut job = job();
        job.apply(JobUpdate::Progress(45), Utc::now()).unwrap();
        job.apply(JobUpdate::Progress(20), Utc::now()).unwrap();
        assert_eq!(job.progress, 45);
        job.apply(JobUpdate::Progress(250), Utc::now()).unwrap();
        assert_eq!(job.progress, 100);
    }

    #[test]
    fn test_terminal_states_are_final() {
        let mut job = job();
        job.apply(JobUpdate::Start, Utc::now()).unwrap();
        job.apply(JobUpdate::Cancel, Utc::now()).unwrap();
        assert_eq!(job.status, JobStatus::Cancelled);
        assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));

        let late = job.apply(
            JobUpdate::Complete {
                download_url: "x".to_string(),
                artifact: artifact(),
            },
            Utc::now(),
        );
        assert!(matches!(late, Err(JobError::Finished { .. })));
        assert!(matches!(
            job.apply(JobUpdate::Progress(99), Utc::now()),
            Err(JobError::Finished { .. })
        ));
        assert_eq!(job.status, JobStatus::Cancelled);
        assert!(job.download_url.is_none());
    }

    #[test]
    fn test_complete_requires_processing() {
        let mut job = job();
        let result = job.apply(
            JobUpdate::Complete {
                download_url: "x".to_string(),
                artifact: artifact(),
            },
            Utc::now(),
        );
        assert!(matches!(
            result,
            Err(JobError::InvalidTransition {
                status: JobStatus::Queued,
                update: "complete",
                ..
            })
        ));
    }

    #[test]
    fn test_summary_serialization() {
        let mut job = job();
        job.apply(JobUpdate::Start, Utc::now()).unwrap();
        let value = serde_json::to_value(job.summary()).unwrap();

        assert_eq!(value["status"], "processing");
        assert_eq!(value["progress"], 0);
        assert_eq!(value["id"], job.id.to_string());
        assert!(value.get("createdAt").is_some());
        assert!(value.get("downloadUrl").is_none());
        assert!(value.get("error").is_none());
    }

    #[test]
    fn test_job_id_round_trips_through_display() {
        let id = JobId::new();
        assert_eq!(id.to_string().parse::<JobId>().unwrap(), id);
        assert!("not-a-uuid".parse::<JobId>().is_err());
    }
}
