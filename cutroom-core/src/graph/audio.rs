//! Audio chains and the final mix.

use super::video::source_span_ms;
use super::{AUDIO_OUT, Filter, FilterNode, Pad, StreamKind};
use crate::timeline::TimelineElement;

pub const SAMPLE_RATE: u32 = 44100;

/// A prepared audio chain and its window on the output timeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioTrack {
    pub label: String,
    pub start_ms: i64,
    pub end_ms: i64,
}

/// How the compiler should finish the audio side of the graph.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioMix {
    /// Extra nodes, the last of which outputs the final audio label.
    Nodes(Vec<FilterNode>),
    /// The given chain already is the final audio; rename it.
    PassThrough(String),
}

/// Chain that trims, retimes, levels and normalizes one element's audio.
pub fn audio_chain(
    element: &TimelineElement,
    input: usize,
    label: &str,
) -> Option<(FilterNode, AudioTrack)> {
    let duration = element.duration_ms();
    if duration <= 0 || element.volume <= 0.0 {
        return None;
    }

    let mut filters = vec![
        Filter::ATrim {
            start_ms: Some(element.source_start_ms.unwrap_or(0).max(0)),
            duration_ms: source_span_ms(element),
        },
        Filter::AResetPts,
    ];

    filters.extend(
        tempo_stages(element.effective_speed())
            .into_iter()
            .map(|factor| Filter::Tempo { factor }),
    );

    if (element.volume - 1.0).abs() > f64::EPSILON {
        filters.push(Filter::Volume {
            gain: element.volume,
        });
    }

    filters.push(Filter::Resample { rate: SAMPLE_RATE });
    filters.push(Filter::StereoFormat);
    filters.push(Filter::ATrim {
        start_ms: None,
        duration_ms: duration,
    });
    filters.push(Filter::AResetPts);

    let start = element.timeline_start_ms.max(0);
    let node = FilterNode::new(
        vec![Pad::Input {
            index: input,
            stream: StreamKind::Audio,
        }],
        filters,
        label,
    );
    let track = AudioTrack {
        label: label.to_string(),
        start_ms: start,
        end_ms: start + duration,
    };
    Some((node, track))
}

/// Splits a speed factor into `atempo` stages, each within 0.5..=2.0.
pub fn tempo_stages(speed: f64) -> Vec<f64> {
    let mut stages = Vec::new();
    if !speed.is_finite() || speed <= 0.0 || (speed - 1.0).abs() <= f64::EPSILON {
        return stages;
    }

    let mut remaining = speed;
    while remaining > 2.0 {
        stages.push(2.0);
        remaining /= 2.0;
    }
    while remaining < 0.5 {
        stages.push(0.5);
        remaining /= 0.5;
    }
    if (remaining - 1.0).abs() > f64::EPSILON {
        stages.push(remaining);
    }
    stages
}

/// Combines prepared tracks into one stream of exactly `total_ms`.
///
/// - no tracks: generated silence;
/// - one track covering the whole timeline: passed through untouched;
/// - one partial track: silence segments concatenated around it;
/// - several: the earliest track becomes a full-length bed and every other
///   track is delayed to its start and mixed in pairwise.
pub fn mix(mut tracks: Vec<AudioTrack>, total_ms: i64) -> AudioMix {
    tracks.sort_by_key(|t| t.start_ms);

    match tracks.as_slice() {
        [] => AudioMix::Nodes(vec![silence(total_ms, AUDIO_OUT)]),
        [only] if only.start_ms <= 0 && only.end_ms >= total_ms => {
            AudioMix::PassThrough(only.label.clone())
        }
        [only] => AudioMix::Nodes(pad_single(only, total_ms)),
        [bed, rest @ ..] => AudioMix::Nodes(mix_many(bed, rest, total_ms)),
    }
}

fn silence(duration_ms: i64, label: &str) -> FilterNode {
    FilterNode::new(
        Vec::new(),
        vec![
            Filter::Silence,
            Filter::ATrim {
                start_ms: None,
                duration_ms,
            },
        ],
        label,
    )
}

fn pad_single(track: &AudioTrack, total_ms: i64) -> Vec<FilterNode> {
    let mut nodes = Vec::new();
    let mut segments = Vec::new();

    if track.start_ms > 0 {
        nodes.push(silence(track.start_ms, "asil_pre"));
        segments.push(Pad::label("asil_pre"));
    }
    segments.push(Pad::label(track.label.clone()));
    if track.end_ms < total_ms {
        nodes.push(silence(total_ms - track.end_ms, "asil_post"));
        segments.push(Pad::label("asil_post"));
    }

    let count = segments.len();
    nodes.push(FilterNode::new(
        segments,
        vec![Filter::Concat { segments: count }],
        AUDIO_OUT,
    ));
    nodes
}

fn mix_many(bed: &AudioTrack, rest: &[AudioTrack], total_ms: i64) -> Vec<FilterNode> {
    let mut nodes = Vec::new();

    let mut bed_filters = Vec::new();
    if bed.start_ms > 0 {
        bed_filters.push(Filter::ADelay {
            delay_ms: bed.start_ms,
        });
    }
    bed_filters.push(Filter::APad {
        whole_duration_ms: total_ms,
    });
    bed_filters.push(Filter::ATrim {
        start_ms: None,
        duration_ms: total_ms,
    });
    nodes.push(FilterNode::new(
        vec![Pad::label(bed.label.clone())],
        bed_filters,
        "abed",
    ));

    let mut current = "abed".to_string();
    for (i, track) in rest.iter().enumerate() {
        let mut source = track.label.clone();
        if track.start_ms > 0 {
            let delayed = format!("adl{i}");
            nodes.push(FilterNode::new(
                vec![Pad::label(source)],
                vec![Filter::ADelay {
                    delay_ms: track.start_ms,
                }],
                delayed.clone(),
            ));
            source = delayed;
        }

        let output = if i + 1 == rest.len() {
            AUDIO_OUT.to_string()
        } else {
            format!("amx{i}")
        };
        nodes.push(FilterNode::new(
            vec![Pad::label(current), Pad::label(source)],
            vec![Filter::AMix { inputs: 2 }],
            output.clone(),
        ));
        current = output;
    }

    nodes
}
