//! Job registry abstraction.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::JobError;
use super::job::{ExportJob, JobId, JobUpdate};

/// Shared registry of export jobs.
///
/// The only mutable state shared between concurrently running jobs.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn put(&self, job: ExportJob) -> Result<(), JobError>;

    async fn get(&self, id: &JobId) -> Result<Option<ExportJob>, JobError>;

    /// Applies `update` atomically and returns the job as it is afterwards.
    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<ExportJob, JobError>;

    async fn delete(&self, id: &JobId) -> Result<Option<ExportJob>, JobError>;

    /// Jobs created before `cutoff`, whatever their state.
    async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExportJob>, JobError>;

    async fn list(&self) -> Result<Vec<ExportJob>, JobError>;
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryJobStore {
    jobs: Arc<RwLock<HashMap<JobId, ExportJob>>>,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn put(&self, job: ExportJob) -> Result<(), JobError> {
        self.jobs.write().await.insert(job.id, job);
        Ok(())
    }

    async fn get(&self, id: &JobId) -> Result<Option<ExportJob>, JobError> {
        Ok(self.jobs.read().await.get(id).cloned())
    }

    async fn update(&self, id: &JobId, update: JobUpdate) -> Result<ExportJob, JobError> {
        let mut jobs = self.jobs.write().await;
        let job = jobs.get_mut(id).ok_or(JobError::NotFound { job_id: *id })?;
        job.apply(update, Utc::now())?;
        Ok(job.clone())
    }

    async fn delete(&self, id: &JobId) -> Result<Option<ExportJob>, JobError> {
        Ok(self.jobs.write().await.remove(id))
    }

    async fn list_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<ExportJob>, JobError> {
        Ok(self
            .jobs
            .read()
            .await
            .values()
            .filter(|job| job.created_at < cutoff)
            .cloned()
            .collect())
    }

    async fn list(&self) -> Result<Vec<ExportJob>, JobError> {
        let mut jobs: Vec<ExportJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }
}
