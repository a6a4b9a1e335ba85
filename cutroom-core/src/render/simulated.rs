//! Renderer that never spawns a process.
//!
//! Writes a small MP4-shaped placeholder whose `free` box carries a JSON
//! manifest of what it was asked to render, and emits evenly spaced progress.

use std::path::Path;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{
    FailureClass, MediaProbe, RenderError, RenderEvent, RenderRequest, RenderedFile, Renderer,
};
use crate::graph::GraphInput;

const FTYP_BOX: [u8; 24] = [
    0x00, 0x00, 0x00, 0x18, b'f', b't', b'y', b'p', b'i', b's', b'o', b'm', 0x00, 0x00, 0x02,
    0x00, b'i', b's', b'o', b'm', b'm', b'p', b'4', b'1',
];

/// Contents of the placeholder's `free` box.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceholderManifest {
    pub job: String,
    pub file_inputs: Vec<String>,
    pub filter_complex: String,
    pub duration_ms: i64,
    pub size: String,
}

#[derive(Debug, Clone)]
pub struct SimulatedRenderer {
    /// Pause before each progress step
    step_delay: Duration,
    steps: u32,
    /// Class to fail with instead of producing output
    failure: Option<FailureClass>,
    probe: MediaProbe,
}

impl SimulatedRenderer {
    pub fn new() -> Self {
        Self {
            step_delay: Duration::from_millis(50),
            steps: 4,
            failure: None,
            probe: MediaProbe {
                duration_ms: None,
                has_video: true,
                has_audio: true,
            },
        }
    }

    pub fn with_step_delay(mut self, step_delay: Duration) -> Self {
        self.step_delay = step_delay;
        self
    }

    /// Every render fails with `class` after the progress steps.
    pub fn failing(mut self, class: FailureClass) -> Self {
        self.failure = Some(class);
        self
    }

    /// Result returned by [`Renderer::probe`] for any path.
    pub fn with_probe(mut self, probe: MediaProbe) -> Self {
        self.probe = probe;
        self
    }

    /// Reads back the manifest of a placeholder written by this renderer.
    pub fn read_manifest(path: &Path) -> Option<PlaceholderManifest> {
        let bytes = std::fs::read(path).ok()?;
        let payload = bytes.get(FTYP_BOX.len() + 8..)?;
        serde_json::from_slice(payload).ok()
    }

    fn placeholder(request: &RenderRequest) -> Result<Vec<u8>, serde_json::Error> {
        let manifest = PlaceholderManifest {
            job: request.job_label.clone(),
            file_inputs: request
                .graph
                .inputs
                .iter()
                .filter_map(|input| match input {
                    GraphInput::File { path, .. } => Some(path.display().to_string()),
                    GraphInput::Canvas { .. } => None,
                })
                .collect(),
            filter_complex: request.graph.to_filter_complex(),
            duration_ms: request.graph.duration_ms,
            size: request.profile.size_arg(),
        };
        let payload = serde_json::to_vec(&manifest)?;

        let mut bytes = Vec::with_capacity(FTYP_BOX.len() + 8 + payload.len());
        bytes.extend_from_slice(&FTYP_BOX);
        bytes.extend_from_slice(&((payload.len() + 8) as u32).to_be_bytes());
        bytes.extend_from_slice(b"free");
        bytes.extend_from_slice(&payload);
        Ok(bytes)
    }
}

impl Default for SimulatedRenderer {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Renderer for SimulatedRenderer {
    async fn render(
        &self,
        request: &RenderRequest,
        events: mpsc::UnboundedSender<RenderEvent>,
    ) -> Result<RenderedFile, RenderError> {
        let started = Instant::now();
        tracing::info!(
            job_id = %request.job_label,
            "Simulated render of {} nodes ({} ms)",
            request.graph.nodes.len(),
            request.graph.duration_ms
        );
        let _ = events.send(RenderEvent::Started);

        let steps = self.steps.max(1);
        for step in 1..=steps {
            tokio::time::sleep(self.step_delay).await;
            let fraction = f64::from(step) / f64::from(steps);
            let _ = events.send(RenderEvent::Progress {
                percent: fraction * 100.0,
                out_time_ms: (request.graph.duration_ms as f64 * fraction).round() as i64,
            });
        }

        if let Some(class) = self.failure {
            return Err(RenderError::Failed {
                class,
                detail: format!("simulated {class} failure"),
            });
        }

        let bytes = Self::placeholder(request).map_err(|e| RenderError::Failed {
            class: FailureClass::Unknown,
            detail: e.to_string(),
        })?;
        tokio::fs::write(&request.output_path, &bytes)
            .await
            .map_err(|e| RenderError::Failed {
                class: FailureClass::classify(&e.to_string(), None),
                detail: format!("{}: {e}", request.output_path.display()),
            })?;

        let size = bytes.len() as u64;
        let _ = events.send(RenderEvent::Finished { size });

        Ok(RenderedFile {
            path: request.output_path.clone(),
            size,
            elapsed: started.elapsed(),
        })
    }

    async fn probe(&self, _path: &Path) -> Result<MediaProbe, RenderError> {
        Ok(self.probe)
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}
