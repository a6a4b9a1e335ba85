//! Typed filter graph and its compiler.
//!
//! The compiler produces a [`FilterGraph`]: ordered inputs, ordered nodes
//! (input pads, a filter chain, one output label) and the two terminal
//! labels. [`serialize`] turns it into ffmpeg `-filter_complex` syntax, so
//! everything up to that point can be inspected structurally.

pub mod audio;
pub mod compiler;
pub mod serialize;
pub mod text;
pub mod video;

use std::path::PathBuf;

pub use compiler::{MIN_TIMELINE_MS, compile_graph};
pub use text::DrawText;

/// Label of the composited video stream.
pub const VIDEO_OUT: &str = "vout";
/// Label of the mixed audio stream.
pub const AUDIO_OUT: &str = "aout";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("invalid output profile: {reason}")]
    InvalidProfile { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

/// A filter input: a stream of a numbered input, or another node's output.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Pad {
    Input { index: usize, stream: StreamKind },
    Label(String),
}

impl Pad {
    pub fn label(label: impl Into<String>) -> Self {
        Pad::Label(label.into())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FadeKind {
    In,
    Out,
}

/// One ffmpeg filter with its arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// `trim`, optionally skipping into the source
    Trim { start_ms: Option<i64>, duration_ms: i64 },
    ATrim { start_ms: Option<i64>, duration_ms: i64 },
    /// `setpts=PTS-STARTPTS`
    ResetPts,
    AResetPts,
    /// Playback speed change by rescaling timestamps.
    Retime { speed: f64 },
    /// Timestamps derived from the frame counter; used after looping stills.
    FramePts { fps: u32 },
    Loop { size: u32 },
    Fps { fps: u32 },
    Format { pix_fmt: &'static str },
    SetSar,
    /// Exact scale; `-2` keeps aspect for one side.
    Scale { width: i64, height: i64 },
    /// Scale so the frame covers `width`x`height`, for a following crop.
    ScaleCover { width: u32, height: u32 },
    /// Crop, centered when `x`/`y` are absent.
    Crop {
        width: i64,
        height: i64,
        x: Option<i64>,
        y: Option<i64>,
    },
    Opacity { alpha: f64 },
    Fade {
        kind: FadeKind,
        start_ms: i64,
        duration_ms: i64,
    },
    /// Shift a chain so it starts at `start_ms` on the output timeline.
    Delay { start_ms: i64 },
    Overlay {
        x: i64,
        y: i64,
        start_ms: i64,
        end_ms: i64,
    },
    DrawText(Box<DrawText>),
    /// Single `atempo` stage; factor within 0.5..=2.0.
    Tempo { factor: f64 },
    Volume { gain: f64 },
    Resample { rate: u32 },
    StereoFormat,
    ADelay { delay_ms: i64 },
    APad { whole_duration_ms: i64 },
    AMix { inputs: usize },
    Concat { segments: usize },
    Silence,
    Null,
    ANull,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterNode {
    pub inputs: Vec<Pad>,
    pub filters: Vec<Filter>,
    pub output: String,
}

impl FilterNode {
    pub fn new(inputs: Vec<Pad>, filters: Vec<Filter>, output: impl Into<String>) -> Self {
        Self {
            inputs,
            filters,
            output: output.into(),
        }
    }
}

/// Inputs handed to the transcoder, in `-i` order.
#[derive(Debug, Clone, PartialEq)]
pub enum GraphInput {
    /// Synthetic background generated by lavfi.
    Canvas {
        width: u32,
        height: u32,
        fps: u32,
        duration_ms: i64,
    },
    File { path: PathBuf, asset_key: String },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FilterGraph {
    pub inputs: Vec<GraphInput>,
    pub nodes: Vec<FilterNode>,
    pub video_out: String,
    pub audio_out: String,
    pub duration_ms: i64,
    /// Elements left out of the render, usually for lack of a local asset.
    pub dropped_elements: Vec<String>,
}

impl FilterGraph {
    /// Node producing `label`.
    pub fn node(&self, label: &str) -> Option<&FilterNode> {
        self.nodes.iter().find(|n| n.output == label)
    }

    pub fn filters(&self) -> impl Iterator<Item = &Filter> {
        self.nodes.iter().flat_map(|n| n.filters.iter())
    }

    pub fn count_filters(&self, predicate: impl Fn(&Filter) -> bool) -> usize {
        self.filters().filter(|f| predicate(f)).count()
    }

    pub fn file_inputs(&self) -> impl Iterator<Item = &PathBuf> {
        self.inputs.iter().filter_map(|input| match input {
            GraphInput::File { path, .. } => Some(path),
            GraphInput::Canvas { .. } => None,
        })
    }
}
