//! Timeline to filter graph compilation.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use super::audio::{self, AudioMix, AudioTrack};
use super::text::drawtext_for;
use super::video::{VisualLayer, visual_chain};
use super::{
    AUDIO_OUT, Filter, FilterGraph, FilterNode, GraphError, GraphInput, Pad, StreamKind, VIDEO_OUT,
};
use crate::assets::DownloadedAssetMap;
use crate::settings::OutputProfile;
use crate::timeline::{TimelineElement, Track};

/// Shortest output produced, even for an empty timeline.
pub const MIN_TIMELINE_MS: i64 = 1000;

const CANVAS_INPUT: usize = 0;
const BASE_LABEL: &str = "base";

struct GraphBuilder {
    inputs: Vec<GraphInput>,
    nodes: Vec<FilterNode>,
    input_by_path: HashMap<PathBuf, usize>,
}

impl GraphBuilder {
    fn new(canvas: GraphInput) -> Self {
        Self {
            inputs: vec![canvas],
            nodes: Vec::new(),
            input_by_path: HashMap::new(),
        }
    }

    /// Index of the input reading `path`, adding it on first use.
    fn file_input(&mut self, path: &Path, asset_key: &str) -> usize {
        if let Some(index) = self.input_by_path.get(path) {
            return *index;
        }
        let index = self.inputs.len();
        self.inputs.push(GraphInput::File {
            path: path.to_path_buf(),
            asset_key: asset_key.to_string(),
        });
        self.input_by_path.insert(path.to_path_buf(), index);
        index
    }

    fn push(&mut self, node: FilterNode) {
        self.nodes.push(node);
    }

    /// Renames the node producing `from` so it produces `to` instead.
    fn relabel(&mut self, from: &str, to: &str) {
        if let Some(node) = self.nodes.iter_mut().find(|n| n.output == from) {
            node.output = to.to_string();
        }
    }
}

/// Compiles validated elements into a filter graph.
///
/// Media elements whose asset has no local copy are left out and listed in
/// [`FilterGraph::dropped_elements`].
pub fn compile_graph(
    elements: &[TimelineElement],
    tracks: &[Track],
    profile: &OutputProfile,
    assets: &DownloadedAssetMap,
) -> Result<FilterGraph, GraphError> {
    if profile.width == 0 || profile.height == 0 || profile.fps == 0 {
        return Err(GraphError::InvalidProfile {
            reason: format!(
                "{}x{} at {} fps",
                profile.width, profile.height, profile.fps
            ),
        });
    }

    let total_ms = elements
        .iter()
        .map(|e| e.timeline_end_ms)
        .max()
        .unwrap_or(0)
        .max(MIN_TIMELINE_MS);

    let mut builder = GraphBuilder::new(GraphInput::Canvas {
        width: profile.width,
        height: profile.height,
        fps: profile.fps,
        duration_ms: total_ms,
    });
    builder.push(FilterNode::new(
        vec![Pad::Input {
            index: CANVAS_INPUT,
            stream: StreamKind::Video,
        }],
        vec![
            Filter::Trim {
                start_ms: None,
                duration_ms: total_ms,
            },
            Filter::Fps { fps: profile.fps },
            Filter::Format { pix_fmt: "yuv420p" },
            Filter::SetSar,
        ],
        BASE_LABEL,
    ));

    let track_index: HashMap<&str, i32> =
        tracks.iter().map(|t| (t.id.as_str(), t.index)).collect();
    let mut ordered: Vec<&TimelineElement> = elements.iter().collect();
    // Higher track indices go down first so lower indices end up on top.
    ordered.sort_by_key(|e| {
        (
            e.timeline_start_ms,
            Reverse(track_index.get(e.track_id.as_str()).copied().unwrap_or(i32::MAX)),
        )
    });

    let mut dropped = Vec::new();
    let mut layers: Vec<VisualLayer> = Vec::new();
    let mut audio_tracks: Vec<AudioTrack> = Vec::new();

    for element in ordered.iter().filter(|e| e.kind.is_media()) {
        let Some(asset) = element.asset_ref() else {
            dropped.push(element.id.clone());
            continue;
        };
        let key = asset.key();
        let Some(path) = assets.get(&key) else {
            tracing::debug!(element = %element.id, asset = %key, "No local copy, leaving element out");
            dropped.push(element.id.clone());
            continue;
        };
        let input = builder.file_input(path, &key);

        if element.kind.is_visual() {
            let label = format!("v{}", layers.len());
            if let Some((node, layer)) = visual_chain(element, input, profile, &label) {
                builder.push(node);
                layers.push(layer);
            }
        }

        if element.kind.has_audio() && assets.has_audio(&key) {
            let label = format!("a{}", audio_tracks.len());
            if let Some((node, track)) = audio::audio_chain(element, input, &label) {
                builder.push(node);
                audio_tracks.push(track);
            }
        }
    }

    let mut current = BASE_LABEL.to_string();
    for (i, layer) in layers.iter().enumerate() {
        let output = format!("ov{i}");
        builder.push(FilterNode::new(
            vec![Pad::label(current), Pad::label(layer.label.clone())],
            vec![Filter::Overlay {
                x: layer.x,
                y: layer.y,
                start_ms: layer.start_ms,
                end_ms: layer.end_ms,
            }],
            output.clone(),
        ));
        current = output;
    }

    let texts = ordered
        .iter()
        .filter(|e| e.kind.is_textual())
        .filter_map(|e| drawtext_for(e, profile));
    for (i, text) in texts.enumerate() {
        let output = format!("txt{i}");
        builder.push(FilterNode::new(
            vec![Pad::label(current)],
            vec![Filter::DrawText(Box::new(text))],
            output.clone(),
        ));
        current = output;
    }
    builder.relabel(&current, VIDEO_OUT);

    match audio::mix(audio_tracks, total_ms) {
        AudioMix::Nodes(nodes) => nodes.into_iter().for_each(|n| builder.push(n)),
        AudioMix::PassThrough(label) => builder.relabel(&label, AUDIO_OUT),
    }

    tracing::debug!(
        "Compiled graph: {} inputs, {} nodes, {} visual layers, {}ms",
        builder.inputs.len(),
        builder.nodes.len(),
        layers.len(),
        total_ms
    );

    Ok(FilterGraph {
        inputs: builder.inputs,
        nodes: builder.nodes,
        video_out: VIDEO_OUT.to_string(),
        audio_out: AUDIO_OUT.to_string(),
        duration_ms: total_ms,
        dropped_elements: dropped,
    })
}
