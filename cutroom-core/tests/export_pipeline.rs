//! End-to-end export scenarios against a local asset server and the
//! simulated renderer.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use cutroom_core::assets::{AssetDownloader, AssetResolver, BaseUrlSigner, StaticAssetCatalog};
use cutroom_core::export::{
    ArtifactBody, ArtifactStore, CANCELLED_BY_USER, DeliveryError, ExportOrchestrator,
    ExportRequest, InMemoryJobStore, JobId, JobStatus, StoredArtifact,
};
use cutroom_core::render::{FailureClass, SimulatedRenderer};
use cutroom_core::{CutroomError, JobError};
use cutroom_core::settings::{ExportSettings, Resolution};
use cutroom_core::test_fixtures::{
    TestEnvironment, library_element, media_element, text_element, track,
};
use cutroom_core::timeline::{ElementKind, TrackKind};

const POLL: Duration = Duration::from_millis(10);

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

fn settings_720p() -> ExportSettings {
    ExportSettings {
        resolution: Resolution::Hd720,
        ..ExportSettings::default()
    }
}

fn fast_renderer() -> SimulatedRenderer {
    SimulatedRenderer::new().with_step_delay(Duration::from_millis(2))
}

#[tokio::test]
async fn test_single_video_export_completes() {
    let base = serve(Router::new().route("/clip.mp4", get(|| async { vec![0u8; 4096] }))).await;
    let env = TestEnvironment::new();
    let orchestrator = env.orchestrator(fast_renderer());

    let accepted = orchestrator
        .start_export(ExportRequest {
            clips: vec![media_element(
                "clip",
                ElementKind::Video,
                "main",
                0,
                5000,
                &format!("{base}/clip.mp4"),
            )],
            tracks: vec![track("main", 0, TrackKind::Video)],
            export_settings: settings_720p(),
        })
        .await
        .unwrap();

    let job = orchestrator
        .wait_for_completion(&accepted.job_id, POLL)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(job.progress, 100);
    let url = job.download_url.as_deref().unwrap();
    assert!(!url.is_empty());
    assert!(url.ends_with(&format!("/export/download/{}", accepted.job_id)));

    let artifact = env
        .config
        .storage
        .output_dir
        .join(&job.artifact.as_ref().unwrap().key);
    let manifest = SimulatedRenderer::read_manifest(&artifact).unwrap();
    assert_eq!(manifest.size, "1280x720");
    assert_eq!(manifest.duration_ms, 5000);
    assert_eq!(manifest.file_inputs.len(), 1);

    let scratch = env.config.storage.work_dir.join(accepted.job_id.to_string());
    assert!(!scratch.exists());
}

#[tokio::test]
async fn test_zero_length_element_is_rejected_without_job() {
    let env = TestEnvironment::new();
    let orchestrator = env.orchestrator(fast_renderer());

    let rejected = orchestrator
        .start_export(ExportRequest {
            clips: vec![media_element(
                "clip",
                ElementKind::Video,
                "main",
                2000,
                2000,
                "https://cdn.example.com/clip.mp4",
            )],
            tracks: vec![track("main", 0, TrackKind::Video)],
            export_settings: settings_720p(),
        })
        .await
        .unwrap_err();

    assert!(rejected.error.contains("not after start time"), "{}", rejected.error);
    assert!(orchestrator.jobs().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_failed_asset_is_dropped_and_job_completes() {
    let broken_hits = Arc::new(AtomicU32::new(0));
    let counter = broken_hits.clone();
    let base = serve(
        Router::new()
            .route("/good.mp4", get(|| async { vec![1u8; 2048] }))
            .route(
                "/broken.mp4",
                get(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                    async { StatusCode::INTERNAL_SERVER_ERROR }
                }),
            ),
    )
    .await;
    let env = TestEnvironment::new();
    let orchestrator = env.orchestrator(fast_renderer());

    let accepted = orchestrator
        .start_export(ExportRequest {
            clips: vec![
                media_element(
                    "good",
                    ElementKind::Video,
                    "main",
                    0,
                    3000,
                    &format!("{base}/good.mp4"),
                ),
                media_element(
                    "broken",
                    ElementKind::Video,
                    "main",
                    3000,
                    6000,
                    &format!("{base}/broken.mp4"),
                ),
            ],
            tracks: vec![track("main", 0, TrackKind::Video)],
            export_settings: settings_720p(),
        })
        .await
        .unwrap();

    let job = orchestrator
        .wait_for_completion(&accepted.job_id, POLL)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);
    assert_eq!(broken_hits.load(Ordering::SeqCst), 3);

    let artifact = env
        .config
        .storage
        .output_dir
        .join(&job.artifact.as_ref().unwrap().key);
    let manifest = SimulatedRenderer::read_manifest(&artifact).unwrap();
    assert_eq!(manifest.file_inputs.len(), 1);
    assert!(manifest.filter_complex.contains("[1:v]"));
    assert!(!manifest.filter_complex.contains("[2:v]"));
}

#[tokio::test]
async fn test_cancel_during_processing_reports_cancelled() {
    let env = TestEnvironment::new();
    let orchestrator =
        env.orchestrator(SimulatedRenderer::new().with_step_delay(Duration::from_millis(150)));

    let accepted = orchestrator
        .start_export(ExportRequest {
            clips: vec![text_element("title", "titles", 0, 4000, "Opening")],
            tracks: vec![track("titles", 0, TrackKind::Text)],
            export_settings: settings_720p(),
        })
        .await
        .unwrap();
    let job_id = accepted.job_id;

    loop {
        let job = orchestrator.status(&job_id).await.unwrap();
        if job.status == JobStatus::Processing {
            break;
        }
        assert_eq!(job.status, JobStatus::Queued);
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    orchestrator.cancel(&job_id).await.unwrap();

    let job = orchestrator.status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert_eq!(job.error.as_deref(), Some(CANCELLED_BY_USER));

    // The render finishes in the background without resurrecting the job.
    tokio::time::sleep(Duration::from_millis(900)).await;
    let job = orchestrator.status(&job_id).await.unwrap();
    assert_eq!(job.status, JobStatus::Cancelled);
    assert!(job.download_url.is_none());
    assert!(!env.config.storage.work_dir.join(job_id.to_string()).exists());

    let summary = serde_json::to_value(job.summary()).unwrap();
    assert_eq!(summary["error"], CANCELLED_BY_USER);
}

#[tokio::test]
async fn test_library_asset_is_signed_and_fetched() {
    let requested = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
    let log = requested.clone();
    let base = serve(Router::new().route(
        "/assets/library/intro.mp4",
        get(move |uri: axum::http::Uri| {
            log.lock().unwrap().push(uri.to_string());
            async { vec![2u8; 1024] }
        }),
    ))
    .await;

    let mut env = TestEnvironment::new();
    env.config.storage.asset_base_url = Some(format!("{base}/assets"));
    let catalog =
        StaticAssetCatalog::new().with_asset("64b7f0c2a1d3e4f5a6b7c8d9", "library/intro.mp4");
    let orchestrator = env.orchestrator_with(Arc::new(fast_renderer()), catalog);

    let accepted = orchestrator
        .start_export(ExportRequest {
            clips: vec![library_element(
                "intro",
                ElementKind::Video,
                "main",
                0,
                2000,
                "64b7f0c2a1d3e4f5a6b7c8d9",
            )],
            tracks: vec![track("main", 0, TrackKind::Video)],
            export_settings: settings_720p(),
        })
        .await
        .unwrap();

    let job = orchestrator
        .wait_for_completion(&accepted.job_id, POLL)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let requested = requested.lock().unwrap();
    assert_eq!(requested.len(), 1);
    assert!(requested[0].contains("expires="));
}

#[tokio::test]
async fn test_unknown_library_asset_degrades_to_canvas() {
    let env = TestEnvironment::new();
    let orchestrator = env.orchestrator_with(Arc::new(fast_renderer()), StaticAssetCatalog::new());

    let accepted = orchestrator
        .start_export(ExportRequest {
            clips: vec![library_element(
                "missing",
                ElementKind::Image,
                "main",
                0,
                2000,
                "aaaaaaaaaaaaaaaaaaaaaaaa",
            )],
            tracks: vec![track("main", 0, TrackKind::Video)],
            export_settings: settings_720p(),
        })
        .await
        .unwrap();

    let job = orchestrator
        .wait_for_completion(&accepted.job_id, POLL)
        .await
        .unwrap();
    assert_eq!(job.status, JobStatus::Completed, "{:?}", job.error);

    let artifact = env
        .config
        .storage
        .output_dir
        .join(&job.artifact.as_ref().unwrap().key);
    let manifest = SimulatedRenderer::read_manifest(&artifact).unwrap();
    assert!(manifest.file_inputs.is_empty());
}

fn title_request() -> ExportRequest {
    ExportRequest {
        clips: vec![text_element("title", "titles", 0, 3000, "Closing")],
        tracks: vec![track("titles", 0, TrackKind::Text)],
        export_settings: settings_720p(),
    }
}

#[tokio::test]
async fn test_render_failure_marks_job_failed() {
    let env = TestEnvironment::new();
    let orchestrator = env.orchestrator(fast_renderer().failing(FailureClass::StorageExhausted));

    let accepted = orchestrator.start_export(title_request()).await.unwrap();
    let job = orchestrator
        .wait_for_completion(&accepted.job_id, POLL)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some(FailureClass::StorageExhausted.user_message())
    );
    assert!(job.progress <= 90, "progress {}", job.progress);
    assert!(job.download_url.is_none());
    assert!(job.artifact.is_none());
    assert!(!env.config.storage.work_dir.join(accepted.job_id.to_string()).exists());

    assert!(matches!(
        orchestrator.open_artifact(&accepted.job_id).await,
        Err(CutroomError::Job(JobError::NotReady {
            status: JobStatus::Failed,
            ..
        }))
    ));
}

/// Artifact store whose uploads always fail.
struct BrokenBucket;

#[async_trait]
impl ArtifactStore for BrokenBucket {
    async fn upload(&self, job_id: &JobId, local: &Path) -> Result<StoredArtifact, DeliveryError> {
        assert!(local.exists(), "upload of missing render for {job_id}");
        Err(DeliveryError::Io {
            path: PathBuf::from(format!("bucket/{job_id}.mp4")),
            source: std::io::Error::other("connection reset by bucket"),
        })
    }

    async fn open(&self, artifact: &StoredArtifact) -> Result<ArtifactBody, DeliveryError> {
        Err(DeliveryError::NotFound {
            key: artifact.key.clone(),
        })
    }

    async fn delete(&self, _artifact: &StoredArtifact) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_upload_failure_marks_job_failed() {
    let env = TestEnvironment::new();
    let resolver = AssetResolver::new(
        Arc::new(StaticAssetCatalog::passthrough()),
        Arc::new(BaseUrlSigner::new("http://127.0.0.1:9/assets").unwrap()),
        env.config.export.signed_url_ttl,
    );
    let downloader = AssetDownloader::new(&env.config.download, resolver).unwrap();
    let orchestrator = ExportOrchestrator::new(
        env.config.clone(),
        Arc::new(InMemoryJobStore::new()),
        Arc::new(BrokenBucket),
        downloader,
        Arc::new(fast_renderer()),
    );

    let accepted = orchestrator.start_export(title_request()).await.unwrap();
    let job = orchestrator
        .wait_for_completion(&accepted.job_id, POLL)
        .await
        .unwrap();

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(
        job.error.as_deref(),
        Some("The rendered video could not be stored")
    );
    assert_eq!(job.progress, 90);
    assert!(job.download_url.is_none());
    assert!(!env.config.storage.work_dir.join(accepted.job_id.to_string()).exists());
}
