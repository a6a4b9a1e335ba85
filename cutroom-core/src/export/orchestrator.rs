//! Drives export jobs through their phases.
//!
//! Each accepted export runs as its own tokio task: download, configure,
//! render, deliver. Phases push overall progress into one unbounded channel
//! per job whose only consumer writes it to the [`JobStore`]. Cancellation
//! is cooperative: the job record is flipped immediately and the task stops
//! at the next phase boundary. A supervising task awaits each job task and
//! fails the job if it panics, so no record is left in `processing`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::MissedTickBehavior;

use super::delivery::{
    ArtifactBody, ArtifactStore, DeliveryError, LocalArtifactStore, StoredArtifact,
};
use super::job::{ExportJob, INTERNAL_FAILURE, JobId, JobStatus, JobSummary, JobUpdate};
use super::store::{InMemoryJobStore, JobStore};
use super::{ExportRequest, JobError};
use crate::CutroomError;
use crate::assets::{
    AssetCatalog, AssetDownloader, AssetResolver, BaseUrlSigner, DownloadedAssetMap,
};
use crate::config::CutroomConfig;
use crate::graph::{GraphError, compile_graph};
use crate::render::{RenderError, RenderEvent, RenderRequest, Renderer};
use crate::settings::{OutputProfile, resolve_output_profile};
use crate::timeline::{
    ElementKind, TimelineElement, Track, ValidationOptions, validate_timeline_with,
};

/// Overall progress once each phase is done.
const VALIDATED: u8 = 10;
const DOWNLOADED: u8 = 40;
const CONFIGURED: u8 = 45;
const RENDERED: u8 = 90;

#[derive(Debug, Clone, PartialEq)]
pub struct ExportAccepted {
    pub job_id: JobId,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExportRejected {
    pub error: String,
    pub warnings: Vec<String>,
}

/// Why a job stopped before delivering.
#[derive(Debug)]
enum Interrupted {
    Cancelled,
    Failed(CutroomError),
}

impl From<JobError> for Interrupted {
    fn from(error: JobError) -> Self {
        match error {
            // The record went terminal or away underneath us.
            JobError::Finished { .. } | JobError::NotFound { .. } => Interrupted::Cancelled,
            other => Interrupted::Failed(other.into()),
        }
    }
}

impl From<GraphError> for Interrupted {
    fn from(error: GraphError) -> Self {
        Interrupted::Failed(error.into())
    }
}

impl From<RenderError> for Interrupted {
    fn from(error: RenderError) -> Self {
        Interrupted::Failed(error.into())
    }
}

impl From<std::io::Error> for Interrupted {
    fn from(error: std::io::Error) -> Self {
        Interrupted::Failed(error.into())
    }
}

impl From<DeliveryError> for Interrupted {
    fn from(error: DeliveryError) -> Self {
        Interrupted::Failed(error.into())
    }
}

/// Sending half of a job's progress channel.
struct ProgressSender(mpsc::UnboundedSender<u8>);

impl ProgressSender {
    fn report(&self, percent: u8) {
        let _ = self.0.send(percent);
    }
}

/// Maps `done` of `total` onto the `[low, high]` band.
fn band(low: u8, high: u8, done: usize, total: usize) -> u8 {
    if total == 0 {
        return high;
    }
    let span = usize::from(high - low);
    low + (span * done.min(total) / total) as u8
}

fn render_band(percent: f64) -> u8 {
    let span = f64::from(RENDERED - CONFIGURED);
    CONFIGURED + (span * percent.clamp(0.0, 100.0) / 100.0).floor() as u8
}

#[derive(Clone)]
pub struct ExportOrchestrator {
    config: Arc<CutroomConfig>,
    store: Arc<dyn JobStore>,
    artifacts: Arc<dyn ArtifactStore>,
    downloader: Arc<AssetDownloader>,
    renderer: Arc<dyn Renderer>,
}

impl ExportOrchestrator {
    pub fn new(
        config: CutroomConfig,
        store: Arc<dyn JobStore>,
        artifacts: Arc<dyn ArtifactStore>,
        downloader: AssetDownloader,
        renderer: Arc<dyn Renderer>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            store,
            artifacts,
            downloader: Arc::new(downloader),
            renderer,
        }
    }

    /// Wires the in-process collaborators: in-memory job store, local
    /// artifact store and a base-URL signer for library assets.
    ///
    /// # Errors
    ///
    /// - `CutroomError::Asset` - Signer base URL is invalid or the HTTP client failed to build
    pub fn from_config(
        config: CutroomConfig,
        renderer: Arc<dyn Renderer>,
        catalog: Arc<dyn AssetCatalog>,
    ) -> Result<Self, CutroomError> {
        let signer_base = config.storage.asset_base_url.clone().unwrap_or_else(|| {
            format!(
                "{}/assets",
                config.storage.public_base_url.trim_end_matches('/')
            )
        });
        let signer = BaseUrlSigner::new(&signer_base)?;
        let resolver = AssetResolver::new(catalog, Arc::new(signer), config.export.signed_url_ttl);
        let downloader = AssetDownloader::new(&config.download, resolver)?
            .with_local_files(config.storage.allow_local_files);
        let artifacts = Arc::new(LocalArtifactStore::new(&config.storage));

        Ok(Self::new(
            config,
            Arc::new(InMemoryJobStore::new()),
            artifacts,
            downloader,
            renderer,
        ))
    }

    pub fn config(&self) -> &CutroomConfig {
        &self.config
    }

    /// Validates `request` and, when valid, starts a job in the background.
    pub async fn start_export(
        &self,
        request: ExportRequest,
    ) -> Result<ExportAccepted, ExportRejected> {
        let options = ValidationOptions {
            allow_local_files: self.config.storage.allow_local_files,
        };
        let report = validate_timeline_with(
            &request.tracks,
            &request.clips,
            &request.export_settings,
            options,
        );
        let warnings = report.warning_messages();
        for warning in &warnings {
            tracing::warn!("Timeline warning: {}", warning);
        }

        if !report.valid {
            let error = report.error_summary();
            tracing::warn!("Rejected export request: {}", error);
            return Err(ExportRejected { error, warnings });
        }

        let profile = match resolve_output_profile(&request.export_settings) {
            Ok(profile) => profile,
            Err(e) => {
                return Err(ExportRejected {
                    error: format!("Invalid export settings: {e}"),
                    warnings,
                });
            }
        };

        let job = ExportJob::new(JobId::new(), profile.clone(), Utc::now());
        let job_id = job.id;
        if let Err(e) = self.store.put(job).await {
            return Err(ExportRejected {
                error: e.to_string(),
                warnings,
            });
        }

        tracing::info!(
            job_id = %job_id,
            "Accepted export: {} elements on {} tracks at {}@{}fps",
            report.corrected_elements.len(),
            request.tracks.len(),
            profile.size_arg(),
            profile.fps
        );

        let orchestrator = self.clone();
        let elements = report.corrected_elements;
        let tracks = request.tracks;
        tokio::spawn(async move {
            let run = tokio::spawn(orchestrator.clone().run_job(job_id, elements, tracks, profile));
            if let Err(e) = run.await {
                orchestrator.recover_crashed(job_id, e).await;
            }
        });

        Ok(ExportAccepted { job_id, warnings })
    }

    /// # Errors
    ///
    /// - `JobError::NotFound` - No such job, or it was evicted
    pub async fn status(&self, job_id: &JobId) -> Result<ExportJob, JobError> {
        self.store
            .get(job_id)
            .await?
            .ok_or(JobError::NotFound { job_id: *job_id })
    }

    /// Marks a job cancelled. The running task notices at its next phase
    /// boundary; a render already in flight runs to completion.
    ///
    /// # Errors
    ///
    /// - `JobError::NotFound` - No such job
    /// - `JobError::Finished` - Job already reached a terminal state
    pub async fn cancel(&self, job_id: &JobId) -> Result<ExportJob, JobError> {
        let job = self.store.update(job_id, JobUpdate::Cancel).await?;
        tracing::info!(job_id = %job_id, "Export cancelled at {}%", job.progress);
        Ok(job)
    }

    /// Opens the artifact of a completed job for streaming.
    ///
    /// # Errors
    ///
    /// - `JobError::NotFound` - No such job
    /// - `JobError::NotReady` - Job has not completed
    /// - `DeliveryError` - Artifact store could not open the file
    pub async fn open_artifact(
        &self,
        job_id: &JobId,
    ) -> Result<(ExportJob, ArtifactBody), CutroomError> {
        let job = self.status(job_id).await?;
        let artifact = match (job.status, &job.artifact) {
            (JobStatus::Completed, Some(artifact)) => artifact.clone(),
            (status, _) => {
                return Err(JobError::NotReady {
                    job_id: *job_id,
                    status,
                }
                .into());
            }
        };
        let body = self.artifacts.open(&artifact).await?;
        Ok((job, body))
    }

    /// Polls until the job reaches a terminal state.
    pub async fn wait_for_completion(
        &self,
        job_id: &JobId,
        poll_interval: Duration,
    ) -> Result<ExportJob, JobError> {
        loop {
            let job = self.status(job_id).await?;
            if job.status.is_terminal() {
                return Ok(job);
            }
            tokio::time::sleep(poll_interval).await;
        }
    }

    pub async fn jobs(&self) -> Result<Vec<JobSummary>, JobError> {
        Ok(self
            .store
            .list()
            .await?
            .iter()
            .map(ExportJob::summary)
            .collect())
    }

    /// Removes jobs older than the retention period, with their artifacts.
    pub async fn evict_expired(&self, now: DateTime<Utc>) -> Result<usize, CutroomError> {
        let Some(cutoff) = chrono::Duration::from_std(self.config.export.job_retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return Ok(0);
        };

        let expired = self.store.list_expired(cutoff).await?;
        for job in &expired {
            if let Some(artifact) = &job.artifact
                && let Err(e) = self.artifacts.delete(artifact).await
            {
                tracing::warn!(job_id = %job.id, "Failed to delete artifact: {}", e);
            }
            self.store.delete(&job.id).await?;
            tracing::debug!(job_id = %job.id, "Evicted {} export job", job.status);
        }

        if !expired.is_empty() {
            tracing::info!("Evicted {} expired export jobs", expired.len());
        }
        Ok(expired.len())
    }

    /// Runs [`evict_expired`](Self::evict_expired) on the configured interval.
    pub fn spawn_eviction_sweep(&self) -> JoinHandle<()> {
        let orchestrator = self.clone();
        let period = self.config.export.eviction_interval.max(Duration::from_secs(1));

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // First tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = orchestrator.evict_expired(Utc::now()).await {
                    tracing::warn!("Eviction sweep failed: {}", e);
                }
            }
        })
    }

    fn scratch_dir(&self, job_id: JobId) -> PathBuf {
        self.config.storage.work_dir.join(job_id.to_string())
    }

    async fn remove_scratch(&self, job_id: JobId) {
        let scratch_dir = self.scratch_dir(job_id);
        match tokio::fs::remove_dir_all(&scratch_dir).await {
            Ok(()) => tracing::debug!(job_id = %job_id, "Removed scratch directory"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(
                job_id = %job_id,
                "Failed to remove scratch directory {}: {}",
                scratch_dir.display(),
                e
            ),
        }
    }

    async fn run_job(
        self,
        job_id: JobId,
        elements: Vec<TimelineElement>,
        tracks: Vec<Track>,
        profile: OutputProfile,
    ) {
        let scratch_dir = self.scratch_dir(job_id);
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(record_progress(
            Arc::clone(&self.store),
            job_id,
            progress_rx,
        ));

        let progress = ProgressSender(progress_tx);
        let outcome = self
            .execute(job_id, &elements, &tracks, &profile, &scratch_dir, &progress)
            .await;
        drop(progress);
        if let Err(e) = consumer.await {
            tracing::warn!(job_id = %job_id, "Progress consumer ended abnormally: {}", e);
        }

        self.remove_scratch(job_id).await;
        self.finish(job_id, outcome).await;
    }

    /// Fails a job whose task panicked or was aborted before `finish` ran.
    async fn recover_crashed(&self, job_id: JobId, error: JoinError) {
        tracing::error!(job_id = %job_id, "Export task died: {}", error);
        self.remove_scratch(job_id).await;

        let update = JobUpdate::Fail {
            message: INTERNAL_FAILURE.to_string(),
        };
        match self.store.update(&job_id, update).await {
            Ok(_) | Err(JobError::Finished { .. }) | Err(JobError::NotFound { .. }) => {}
            Err(e) => tracing::warn!(job_id = %job_id, "Could not record failure: {}", e),
        }
    }

    async fn execute(
        &self,
        job_id: JobId,
        elements: &[TimelineElement],
        tracks: &[Track],
        profile: &OutputProfile,
        scratch_dir: &Path,
        progress: &ProgressSender,
    ) -> Result<StoredArtifact, Interrupted> {
        self.store.update(&job_id, JobUpdate::Start).await?;
        progress.report(VALIDATED);

        // Download
        self.checkpoint(&job_id).await?;
        let downloads = self
            .downloader
            .download_all(job_id, elements, scratch_dir, |done, total| {
                progress.report(band(VALIDATED, DOWNLOADED, done, total));
            })
            .await;
        if !downloads.failures.is_empty() {
            tracing::warn!(
                job_id = %job_id,
                "{} assets unavailable, rendering without elements {:?}",
                downloads.failures.len(),
                downloads.dropped_element_ids()
            );
        }
        progress.report(DOWNLOADED);

        // Configure
        self.checkpoint(&job_id).await?;
        let mut assets = downloads.assets;
        self.mark_silent_assets(elements, &mut assets).await;
        let graph = compile_graph(elements, tracks, profile, &assets)?;
        tracing::debug!(job_id = %job_id, "filter_complex: {}", graph.to_filter_complex());
        progress.report(CONFIGURED);

        // Render
        self.checkpoint(&job_id).await?;
        tokio::fs::create_dir_all(scratch_dir).await?;
        let request = RenderRequest {
            job_label: job_id.to_string(),
            graph,
            profile: profile.clone(),
            output_path: scratch_dir.join(format!("{job_id}.mp4")),
        };
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let forward = async {
            while let Some(event) = events_rx.recv().await {
                if let RenderEvent::Progress { percent, .. } = event {
                    progress.report(render_band(percent));
                }
            }
        };
        let (rendered, ()) = tokio::join!(self.renderer.render(&request, events_tx), forward);
        let rendered = rendered?;
        progress.report(RENDERED);

        // Deliver
        self.checkpoint(&job_id).await?;
        let artifact = self.artifacts.upload(&job_id, &rendered.path).await?;
        Ok(artifact)
    }

    async fn finish(&self, job_id: JobId, outcome: Result<StoredArtifact, Interrupted>) {
        match outcome {
            Ok(artifact) => {
                let update = JobUpdate::Complete {
                    download_url: artifact.download_url.clone(),
                    artifact: artifact.clone(),
                };
                match self.store.update(&job_id, update).await {
                    Ok(job) => tracing::info!(
                        job_id = %job_id,
                        "Export completed: {} bytes at {}",
                        artifact.size,
                        job.download_url.as_deref().unwrap_or_default()
                    ),
                    Err(e) => {
                        tracing::info!(job_id = %job_id, "Discarding finished render: {}", e);
                        if let Err(e) = self.artifacts.delete(&artifact).await {
                            tracing::warn!(job_id = %job_id, "Failed to delete artifact: {}", e);
                        }
                    }
                }
            }
            Err(Interrupted::Cancelled) => {
                tracing::info!(job_id = %job_id, "Export stopped after cancellation");
            }
            Err(Interrupted::Failed(error)) => {
                tracing::error!(job_id = %job_id, "Export failed: {}", error);
                let update = JobUpdate::Fail {
                    message: error.user_message(),
                };
                if let Err(e) = self.store.update(&job_id, update).await {
                    tracing::warn!(job_id = %job_id, "Could not record failure: {}", e);
                }
            }
        }
    }

    /// Fails with `Cancelled` once the job record has gone terminal.
    async fn checkpoint(&self, job_id: &JobId) -> Result<(), Interrupted> {
        match self.store.get(job_id).await? {
            Some(job) if !job.status.is_terminal() => Ok(()),
            _ => Err(Interrupted::Cancelled),
        }
    }

    /// Probes downloaded video files so the graph never references an audio
    /// stream that does not exist.
    async fn mark_silent_assets(
        &self,
        elements: &[TimelineElement],
        assets: &mut DownloadedAssetMap,
    ) {
        let mut probed = HashSet::new();
        for element in elements.iter().filter(|e| e.kind == ElementKind::Video) {
            let Some(key) = element.asset_ref().map(|asset| asset.key()) else {
                continue;
            };
            if !probed.insert(key.clone()) {
                continue;
            }
            let Some(path) = assets.get(&key).map(Path::to_path_buf) else {
                continue;
            };

            match self.renderer.probe(&path).await {
                Ok(probe) if probe.has_audio => {}
                Ok(_) => {
                    tracing::debug!(asset = %key, "No audio stream");
                    assets.mark_silent(&key);
                }
                Err(e) => {
                    tracing::warn!(asset = %key, "Probe failed, muting asset: {}", e);
                    assets.mark_silent(&key);
                }
            }
        }
    }
}

impl std::fmt::Debug for ExportOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExportOrchestrator")
            .field("renderer", &self.renderer.name())
            .finish_non_exhaustive()
    }
}

/// Sole consumer of a job's progress channel.
async fn record_progress(
    store: Arc<dyn JobStore>,
    job_id: JobId,
    mut progress: mpsc::UnboundedReceiver<u8>,
) {
    while let Some(percent) = progress.recv().await {
        match store.update(&job_id, JobUpdate::Progress(percent)).await {
            Ok(_) | Err(JobError::Finished { .. }) | Err(JobError::NotFound { .. }) => {}
            Err(e) => tracing::warn!(job_id = %job_id, "Failed to record progress: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::render::{MediaProbe, RenderedFile, SimulatedRenderer};
    use crate::settings::ExportSettings;
    use crate::test_fixtures::{TestEnvironment, track, text_element};
    use crate::timeline::TrackKind;

    /// Renderer that panics mid-render.
    struct PanickingRenderer;

    #[async_trait]
    impl Renderer for PanickingRenderer {
        async fn render(
            &self,
            request: &RenderRequest,
            _events: mpsc::UnboundedSender<RenderEvent>,
        ) -> Result<RenderedFile, RenderError> {
            panic!("renderer blew up on {}", request.job_label);
        }

        async fn probe(&self, _path: &Path) -> Result<MediaProbe, RenderError> {
            Ok(MediaProbe {
                duration_ms: None,
                has_video: true,
                has_audio: true,
            })
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    #[test]
    fn test_progress_bands() {
        assert_eq!(band(VALIDATED, DOWNLOADED, 0, 4), 10);
        assert_eq!(band(VALIDATED, DOWNLOADED, 2, 4), 25);
        assert_eq!(band(VALIDATED, DOWNLOADED, 4, 4), 40);
        assert_eq!(band(VALIDATED, DOWNLOADED, 0, 0), 40);
        assert_eq!(render_band(0.0), 45);
        assert_eq!(render_band(50.0), 67);
        assert_eq!(render_band(100.0), 90);
        assert_eq!(render_band(250.0), 90);
    }

    #[tokio::test]
    async fn test_invalid_request_creates_no_job() {
        let env = TestEnvironment::new();
        let orchestrator = env.orchestrator(SimulatedRenderer::new());

        let element = text_element("t", "captions", 1000, 1000, "Hello");
        let rejected = orchestrator
            .start_export(ExportRequest {
                clips: vec![element],
                tracks: vec![track("captions", 0, TrackKind::Text)],
                export_settings: ExportSettings::default(),
            })
            .await
            .unwrap_err();

        assert!(rejected.error.contains("not after start time"));
        assert!(orchestrator.jobs().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_text_only_export_completes() {
        let env = TestEnvironment::new();
        let orchestrator =
            env.orchestrator(SimulatedRenderer::new().with_step_delay(Duration::from_millis(1)));

        let accepted = orchestrator
            .start_export(ExportRequest {
                clips: vec![text_element("t", "captions", 0, 2000, "Hello")],
                tracks: vec![track("captions", 0, TrackKind::Text)],
                export_settings: ExportSettings::default(),
            })
            .await
            .unwrap();

        let job = orchestrator
            .wait_for_completion(&accepted.job_id, Duration::from_millis(5))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
        assert_eq!(job.progress, 100);

        let (_, body) = orchestrator.open_artifact(&accepted.job_id).await.unwrap();
        assert!(body.size > 0);
        assert!(!env.config.storage.work_dir.join(accepted.job_id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_panicking_task_marks_job_failed() {
        let env = TestEnvironment::new();
        let orchestrator = env.orchestrator(PanickingRenderer);

        let accepted = orchestrator
            .start_export(ExportRequest {
                clips: vec![text_element("t", "captions", 0, 2000, "Boom")],
                tracks: vec![track("captions", 0, TrackKind::Text)],
                export_settings: ExportSettings::default(),
            })
            .await
            .unwrap();

        let job = tokio::time::timeout(
            Duration::from_secs(5),
            orchestrator.wait_for_completion(&accepted.job_id, Duration::from_millis(5)),
        )
        .await
        .expect("job left in processing")
        .unwrap();

        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some(INTERNAL_FAILURE));
        assert!(job.download_url.is_none());
        assert!(!env.config.storage.work_dir.join(accepted.job_id.to_string()).exists());
    }

    #[tokio::test]
    async fn test_unknown_job_operations() {
        let env = TestEnvironment::new();
        let orchestrator = env.orchestrator(SimulatedRenderer::new());
        let id = JobId::new();

        assert!(matches!(
            orchestrator.status(&id).await,
            Err(JobError::NotFound { .. })
        ));
        assert!(matches!(
            orchestrator.cancel(&id).await,
            Err(JobError::NotFound { .. })
        ));
        assert!(matches!(
            orchestrator.open_artifact(&id).await,
            Err(CutroomError::Job(JobError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn test_eviction_removes_old_jobs_and_artifacts() {
        let env = TestEnvironment::new();
        let orchestrator =
            env.orchestrator(SimulatedRenderer::new().with_step_delay(Duration::ZERO));

        let accepted = orchestrator
            .start_export(ExportRequest {
                clips: vec![text_element("t", "captions", 0, 1500, "Bye")],
                tracks: vec![track("captions", 0, TrackKind::Text)],
                export_settings: ExportSettings::default(),
            })
            .await
            .unwrap();
        let job = orchestrator
            .wait_for_completion(&accepted.job_id, Duration::from_millis(5))
            .await
            .unwrap();
        let artifact_path = env
            .config
            .storage
            .output_dir
            .join(&job.artifact.as_ref().unwrap().key);
        assert!(artifact_path.exists());

        assert_eq!(orchestrator.evict_expired(Utc::now()).await.unwrap(), 0);

        let later = Utc::now() + chrono::Duration::hours(2);
        assert_eq!(orchestrator.evict_expired(later).await.unwrap(), 1);
        assert!(!artifact_path.exists());
        assert!(matches!(
            orchestrator.status(&accepted.job_id).await,
            Err(JobError::NotFound { .. })
        ));
    }
}
