//! Transcode execution: one subprocess invocation per export.
//!
//! [`FfmpegRenderer`] drives the real encoder; [`SimulatedRenderer`] writes a
//! placeholder artifact and synthetic progress for development and tests.

pub mod failure;
pub mod ffmpeg;
pub mod progress;
pub mod simulated;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

pub use failure::FailureClass;
pub use ffmpeg::FfmpegRenderer;
pub use progress::{ProgressParser, ProgressUpdate, parse_ffmpeg_time};
pub use simulated::SimulatedRenderer;

use crate::config::FfmpegConfig;
use crate::graph::FilterGraph;
use crate::mode::RuntimeMode;
use crate::settings::OutputProfile;

/// Errors from the transcoding subprocess.
#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("Failed to start {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Render failed ({class}): {detail}")]
    Failed { class: FailureClass, detail: String },

    #[error("Render produced no output at {path}")]
    EmptyOutput { path: PathBuf },

    #[error("Probe of {path} failed: {reason}")]
    ProbeFailed { path: PathBuf, reason: String },
}

impl RenderError {
    pub fn user_message(&self) -> String {
        match self {
            RenderError::Failed { class, .. } => class.user_message().to_string(),
            RenderError::SpawnFailed { .. } => {
                "The render engine is not available on this server.".to_string()
            }
            RenderError::EmptyOutput { .. } => {
                "The render finished without producing a video.".to_string()
            }
            RenderError::ProbeFailed { .. } => {
                FailureClass::CorruptedInput.user_message().to_string()
            }
        }
    }

    pub fn class(&self) -> FailureClass {
        match self {
            RenderError::Failed { class, .. } => *class,
            RenderError::SpawnFailed { .. } => FailureClass::MissingFile,
            RenderError::ProbeFailed { .. } => FailureClass::CorruptedInput,
            RenderError::EmptyOutput { .. } => FailureClass::Unknown,
        }
    }
}

/// Everything the renderer needs for one export.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    /// Used only to tag log lines.
    pub job_label: String,
    pub graph: FilterGraph,
    pub profile: OutputProfile,
    pub output_path: PathBuf,
}

/// Lifecycle notifications pushed while a render runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RenderEvent {
    Started,
    Progress { percent: f64, out_time_ms: i64 },
    Finished { size: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedFile {
    pub path: PathBuf,
    pub size: u64,
    pub elapsed: Duration,
}

/// Stream layout of a media file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaProbe {
    pub duration_ms: Option<i64>,
    pub has_video: bool,
    pub has_audio: bool,
}

/// Converts a compiled graph into an output file.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Runs the render to completion. Progress is best-effort; a closed
    /// receiver never aborts the render.
    async fn render(
        &self,
        request: &RenderRequest,
        events: mpsc::UnboundedSender<RenderEvent>,
    ) -> Result<RenderedFile, RenderError>;

    /// Inspects a local media file.
    async fn probe(&self, path: &Path) -> Result<MediaProbe, RenderError>;

    fn name(&self) -> &'static str;
}

/// Picks the renderer implementation for a runtime mode.
pub fn renderer_for_mode(mode: RuntimeMode, config: &FfmpegConfig) -> Arc<dyn Renderer> {
    match mode {
        RuntimeMode::Production => Arc::new(FfmpegRenderer::new(config)),
        RuntimeMode::Development => Arc::new(SimulatedRenderer::new()),
    }
}
