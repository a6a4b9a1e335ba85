//! Per-element picture chains.

use super::{FadeKind, Filter, FilterNode, Pad, StreamKind};
use crate::settings::OutputProfile;
use crate::timeline::{ElementKind, TimelineElement, Transition};
use crate::timeline::validator::MIN_DURATION_MS;

/// Frames kept in memory when looping an animated gif.
const GIF_LOOP_FRAMES: u32 = 32767;

/// A prepared picture layer and where it lands on the output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisualLayer {
    pub label: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub x: i64,
    pub y: i64,
}

/// Builds the chain turning input `input` into a timed layer.
///
/// Returns `None` when the element has no positive duration.
pub fn visual_chain(
    element: &TimelineElement,
    input: usize,
    profile: &OutputProfile,
    label: &str,
) -> Option<(FilterNode, VisualLayer)> {
    let duration = element.duration_ms();
    if duration <= 0 {
        tracing::debug!(element = %element.id, "Skipping visual chain with duration {}ms", duration);
        return None;
    }

    let mut filters = Vec::new();

    match element.kind {
        ElementKind::Video => {
            let speed = element.effective_speed();
            filters.push(Filter::Trim {
                start_ms: Some(element.source_start_ms.unwrap_or(0).max(0)),
                duration_ms: source_span_ms(element),
            });
            filters.push(Filter::ResetPts);
            if (speed - 1.0).abs() > f64::EPSILON {
                filters.push(Filter::Retime { speed });
            }
        }
        ElementKind::Image => {
            filters.push(Filter::Loop { size: 1 });
            filters.push(Filter::FramePts { fps: profile.fps });
        }
        ElementKind::Gif => {
            filters.push(Filter::Loop {
                size: GIF_LOOP_FRAMES,
            });
        }
        _ => return None,
    }

    filters.push(Filter::Fps { fps: profile.fps });
    push_geometry(element, profile, &mut filters);
    filters.push(Filter::Format { pix_fmt: "yuva420p" });

    let opacity = element.opacity.clamp(0.0, 1.0);
    if opacity < 1.0 {
        filters.push(Filter::Opacity { alpha: opacity });
    }

    if let Some(fade) = fade_length(element.transition_in.as_ref(), duration) {
        filters.push(Filter::Fade {
            kind: FadeKind::In,
            start_ms: 0,
            duration_ms: fade,
        });
    }
    if let Some(fade) = fade_length(element.transition_out.as_ref(), duration) {
        filters.push(Filter::Fade {
            kind: FadeKind::Out,
            start_ms: duration - fade,
            duration_ms: fade,
        });
    }

    filters.push(Filter::Trim {
        start_ms: None,
        duration_ms: duration,
    });

    let start = element.timeline_start_ms.max(0);
    if start > 0 {
        filters.push(Filter::Delay { start_ms: start });
    } else {
        filters.push(Filter::ResetPts);
    }

    let (x, y) = if element.properties.has_explicit_geometry() {
        (
            element.properties.x.unwrap_or(0),
            element.properties.y.unwrap_or(0),
        )
    } else {
        (0, 0)
    };

    let node = FilterNode::new(
        vec![Pad::Input {
            index: input,
            stream: StreamKind::Video,
        }],
        filters,
        label,
    );
    let layer = VisualLayer {
        label: label.to_string(),
        start_ms: start,
        end_ms: start + duration,
        x,
        y,
    };
    Some((node, layer))
}

/// Length of source media consumed by a timeline window.
pub(crate) fn source_span_ms(element: &TimelineElement) -> i64 {
    element
        .source_duration_ms()
        .unwrap_or_else(|| element.implied_source_span_ms())
        .max(MIN_DURATION_MS)
}

fn push_geometry(element: &TimelineElement, profile: &OutputProfile, filters: &mut Vec<Filter>) {
    let props = &element.properties;

    if !props.has_explicit_geometry() {
        filters.push(Filter::ScaleCover {
            width: profile.width,
            height: profile.height,
        });
        filters.push(Filter::Crop {
            width: i64::from(profile.width),
            height: i64::from(profile.height),
            x: None,
            y: None,
        });
        return;
    }

    if let Some(crop) = props.crop.filter(|c| c.width > 0 && c.height > 0) {
        filters.push(Filter::Crop {
            width: crop.width,
            height: crop.height,
            x: Some(crop.x.max(0)),
            y: Some(crop.y.max(0)),
        });
    }

    let width = props.width.filter(|w| *w > 0);
    let height = props.height.filter(|h| *h > 0);
    match (width, height) {
        (Some(width), Some(height)) => filters.push(Filter::Scale { width, height }),
        (Some(width), None) => filters.push(Filter::Scale { width, height: -2 }),
        (None, Some(height)) => filters.push(Filter::Scale { width: -2, height }),
        (None, None) => {}
    }
}

fn fade_length(transition: Option<&Transition>, duration: i64) -> Option<i64> {
    let requested = transition?.duration_ms;
    let clamped = requested.min(duration / 2);
    (clamped > 0).then_some(clamped)
}
