//! Real renderer backed by the ffmpeg and ffprobe executables.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;

use super::{
    FailureClass, MediaProbe, ProgressParser, RenderError, RenderEvent, RenderRequest,
    RenderedFile, Renderer,
};
use crate::config::FfmpegConfig;
use crate::graph::audio::SAMPLE_RATE;
use crate::graph::serialize::seconds;

#[derive(Debug, Clone)]
pub struct FfmpegRenderer {
    ffmpeg_path: PathBuf,
    ffprobe_path: PathBuf,
    stderr_tail_lines: usize,
}

impl FfmpegRenderer {
    pub fn new(config: &FfmpegConfig) -> Self {
        Self {
            ffmpeg_path: config.ffmpeg_path.clone(),
            ffprobe_path: config.ffprobe_path.clone(),
            stderr_tail_lines: config.stderr_tail_lines.max(1),
        }
    }

    /// Full argument list for one render, excluding the program name.
    pub fn build_args(request: &RenderRequest) -> Vec<String> {
        let profile = &request.profile;
        let graph = &request.graph;

        let mut args: Vec<String> = [
            "-y",
            "-hide_banner",
            "-nostats",
            "-loglevel",
            "warning",
            "-progress",
            "pipe:1",
        ]
        .iter()
        .map(ToString::to_string)
        .collect();

        for input in &graph.inputs {
            args.extend(input.to_args());
        }

        let video_map = format!("[{}]", graph.video_out);
        let audio_map = format!("[{}]", graph.audio_out);
        let maxrate = format!("{}k", profile.video_bitrate_kbps);
        let bufsize = format!("{}k", profile.video_bitrate_kbps * 2);
        let audio_bitrate = format!("{}k", profile.audio_bitrate_kbps);

        args.extend([
            "-filter_complex".to_string(),
            graph.to_filter_complex(),
            "-map".to_string(),
            video_map,
            "-map".to_string(),
            audio_map,
            "-c:v".to_string(),
            "libx264".to_string(),
            "-preset".to_string(),
            profile.preset.clone(),
            "-crf".to_string(),
            profile.crf.to_string(),
            "-maxrate".to_string(),
            maxrate,
            "-bufsize".to_string(),
            bufsize,
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-r".to_string(),
            profile.fps.to_string(),
            "-c:a".to_string(),
            "aac".to_string(),
            "-b:a".to_string(),
            audio_bitrate,
            "-ar".to_string(),
            SAMPLE_RATE.to_string(),
            "-movflags".to_string(),
            "+faststart".to_string(),
            "-t".to_string(),
            seconds(graph.duration_ms),
            request.output_path.to_string_lossy().into_owned(),
        ]);

        args
    }

    fn failure(&self, status: ExitStatus, tail: &[String]) -> RenderError {
        let detail = tail.join("\n");
        let class = FailureClass::classify(&detail, exit_signal(status));
        tracing::error!(
            "ffmpeg exited with {} ({}); last stderr lines:\n{}",
            status,
            class,
            detail
        );
        RenderError::Failed { class, detail }
    }
}

#[async_trait]
impl Renderer for FfmpegRenderer {
    async fn render(
        &self,
        request: &RenderRequest,
        events: mpsc::UnboundedSender<RenderEvent>,
    ) -> Result<RenderedFile, RenderError> {
        let args = Self::build_args(request);
        let started = Instant::now();

        tracing::info!(
            job_id = %request.job_label,
            "Starting ffmpeg: {} file inputs, {} graph nodes, {}",
            request.graph.file_inputs().count(),
            request.graph.nodes.len(),
            request.profile.size_arg()
        );
        tracing::debug!("ffmpeg args: {:?}", args);

        let mut child = Command::new(&self.ffmpeg_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| RenderError::SpawnFailed {
                program: self.ffmpeg_path.display().to_string(),
                reason: e.to_string(),
            })?;

        let (Some(stdout), Some(stderr)) = (child.stdout.take(), child.stderr.take()) else {
            return Err(RenderError::SpawnFailed {
                program: self.ffmpeg_path.display().to_string(),
                reason: "process pipes unavailable".to_string(),
            });
        };

        let _ = events.send(RenderEvent::Started);

        let total_ms = request.graph.duration_ms;
        let progress = async {
            let mut parser = ProgressParser::new(total_ms);
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if let Some(update) = parser.feed(&line) {
                    let _ = events.send(RenderEvent::Progress {
                        percent: update.percent,
                        out_time_ms: update.out_time_ms,
                    });
                }
            }
        };

        let tail_limit = self.stderr_tail_lines;
        let diagnostics = async move {
            let mut tail = VecDeque::with_capacity(tail_limit);
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tail.len() == tail_limit {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
            Vec::from(tail)
        };

        let ((), tail, status) = tokio::join!(progress, diagnostics, child.wait());
        let status = status.map_err(|e| RenderError::Failed {
            class: FailureClass::Unknown,
            detail: format!("waiting for ffmpeg failed: {e}"),
        })?;

        if !status.success() {
            return Err(self.failure(status, &tail));
        }

        for line in &tail {
            tracing::warn!(job_id = %request.job_label, "ffmpeg: {}", line);
        }

        let size = tokio::fs::metadata(&request.output_path)
            .await
            .map(|m| m.len())
            .unwrap_or(0);
        if size == 0 {
            return Err(RenderError::EmptyOutput {
                path: request.output_path.clone(),
            });
        }

        let _ = events.send(RenderEvent::Finished { size });
        let elapsed = started.elapsed();
        tracing::info!(
            job_id = %request.job_label,
            "ffmpeg finished in {:.1}s, output {} bytes",
            elapsed.as_secs_f64(),
            size
        );

        Ok(RenderedFile {
            path: request.output_path.clone(),
            size,
            elapsed,
        })
    }

    async fn probe(&self, path: &Path) -> Result<MediaProbe, RenderError> {
        let output = Command::new(&self.ffprobe_path)
            .args(["-v", "error", "-show_entries", "stream=codec_type:format=duration"])
            .args(["-of", "json"])
            .arg(path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RenderError::SpawnFailed {
                program: self.ffprobe_path.display().to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            return Err(RenderError::ProbeFailed {
                path: path.to_path_buf(),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        parse_probe_output(&output.stdout).map_err(|e| RenderError::ProbeFailed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    fn name(&self) -> &'static str {
        "ffmpeg"
    }
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
    format: Option<ProbeFormat>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    codec_type: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProbeFormat {
    duration: Option<String>,
}

fn parse_probe_output(raw: &[u8]) -> Result<MediaProbe, serde_json::Error> {
    let parsed: ProbeOutput = serde_json::from_slice(raw)?;
    let has_stream = |kind: &str| {
        parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some(kind))
    };

    let duration_ms = parsed
        .format
        .as_ref()
        .and_then(|f| f.duration.as_deref())
        .and_then(|d| d.parse::<f64>().ok())
        .map(|secs| (secs * 1000.0).round() as i64);

    Ok(MediaProbe {
        duration_ms,
        has_video: has_stream("video"),
        has_audio: has_stream("audio"),
    })
}

#[cfg(unix)]
fn exit_signal(status: ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: ExitStatus) -> Option<i32> {
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{Filter, FilterGraph, FilterNode, GraphInput, Pad, StreamKind};
    use crate::settings::{ExportSettings, resolve_output_profile};

    fn request(output_path: PathBuf) -> RenderRequest {
        let profile = resolve_output_profile(&ExportSettings::default()).unwrap();
        let graph = FilterGraph {
            inputs: vec![
                GraphInput::Canvas {
                    width: profile.width,
                    height: profile.height,
                    fps: profile.fps,
                    duration_ms: 2000,
                },
                GraphInput::File {
                    path: PathBuf::from("/tmp/job_0.mp4"),
                    asset_key: "internal:a".to_string(),
                },
            ],
            nodes: vec![
                FilterNode::new(
                    vec![Pad::Input {
                        index: 0,
                        stream: StreamKind::Video,
                    }],
                    vec![Filter::Null],
                    "vout",
                ),
                FilterNode::new(vec![], vec![Filter::Silence], "aout"),
            ],
            video_out: "vout".to_string(),
            audio_out: "aout".to_string(),
            duration_ms: 2000,
            dropped_elements: Vec::new(),
        };
        RenderRequest {
            job_label: "test".to_string(),
            graph,
            profile,
            output_path,
        }
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.iter()
            .position(|a| a == flag)
            .and_then(|i| args.get(i + 1))
            .map(String::as_str)
    }

    #[test]
    fn test_args_follow_delivery_profile() {
        let req = request(PathBuf::from("/tmp/out.mp4"));
        let args = FfmpegRenderer::build_args(&req);

        assert_eq!(&args[..3], ["-y", "-hide_banner", "-nostats"]);
        assert_eq!(value_after(&args, "-progress"), Some("pipe:1"));
        assert_eq!(value_after(&args, "-f"), Some("lavfi"));
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 2);
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-pix_fmt"), Some("yuv420p"));
        assert_eq!(value_after(&args, "-movflags"), Some("+faststart"));
        assert_eq!(value_after(&args, "-t"), Some("2.000"));
        assert_eq!(
            value_after(&args, "-crf"),
            Some(req.profile.crf.to_string().as_str())
        );
        assert_eq!(
            value_after(&args, "-filter_complex"),
            Some(req.graph.to_filter_complex().as_str())
        );

        let maps: Vec<&str> = args
            .iter()
            .enumerate()
            .filter(|(_, a)| *a == "-map")
            .map(|(i, _)| args[i + 1].as_str())
            .collect();
        assert_eq!(maps, ["[vout]", "[aout]"]);
        assert_eq!(args.last().map(String::as_str), Some("/tmp/out.mp4"));
    }

    #[test]
    fn test_parse_probe_output() {
        let raw = br#"{
            "programs": [],
            "streams": [{"codec_type": "video"}, {"codec_type": "audio"}],
            "format": {"duration": "5.005000"}
        }"#;
        let probe = parse_probe_output(raw).unwrap();
        assert_eq!(probe.duration_ms, Some(5005));
        assert!(probe.has_video);
        assert!(probe.has_audio);

        let silent = parse_probe_output(br#"{"streams": [{"codec_type": "video"}]}"#).unwrap();
        assert!(!silent.has_audio);
        assert_eq!(silent.duration_ms, None);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_failure() {
        let config = FfmpegConfig {
            ffmpeg_path: PathBuf::from("/nonexistent/cutroom-ffmpeg"),
            ffprobe_path: PathBuf::from("/nonexistent/cutroom-ffprobe"),
            stderr_tail_lines: 5,
        };
        let renderer = FfmpegRenderer::new(&config);
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = mpsc::unbounded_channel();

        let result = renderer
            .render(&request(dir.path().join("out.mp4")), tx)
            .await;
        assert!(matches!(result, Err(RenderError::SpawnFailed { .. })));

        let probe = renderer.probe(Path::new("/tmp/whatever.mp4")).await;
        assert!(matches!(probe, Err(RenderError::SpawnFailed { .. })));
    }

    #[cfg(unix)]
    fn fake_ffmpeg(dir: &Path, body: &str) -> PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-ffmpeg");
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_progress_is_streamed_and_output_checked() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ffmpeg(
            dir.path(),
            r#"for last; do :; done
printf 'out_time_us=1000000\nprogress=continue\n'
printf 'mp4' > "$last"
printf 'out_time_us=2000000\nprogress=end\n'"#,
        );
        let renderer = FfmpegRenderer::new(&FfmpegConfig {
            ffmpeg_path: script,
            ..FfmpegConfig::default()
        });
        let (tx, mut rx) = mpsc::unbounded_channel();

        let rendered = renderer
            .render(&request(dir.path().join("out.mp4")), tx)
            .await
            .unwrap();
        assert_eq!(rendered.size, 3);

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert_eq!(events.first(), Some(&RenderEvent::Started));
        assert!(events.contains(&RenderEvent::Progress {
            percent: 50.0,
            out_time_ms: 1000
        }));
        assert_eq!(events.last(), Some(&RenderEvent::Finished { size: 3 }));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_nonzero_exit_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let script = fake_ffmpeg(
            dir.path(),
            "echo 'av_interleaved_write_frame(): No space left on device' >&2\nexit 1",
        );
        let renderer = FfmpegRenderer::new(&FfmpegConfig {
            ffmpeg_path: script,
            ..FfmpegConfig::default()
        });
        let (tx, _rx) = mpsc::unbounded_channel();

        let err = renderer
            .render(&request(dir.path().join("out.mp4")), tx)
            .await
            .unwrap_err();
        assert_eq!(err.class(), FailureClass::StorageExhausted);
        match err {
            RenderError::Failed { detail, .. } => assert!(detail.contains("No space left")),
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
