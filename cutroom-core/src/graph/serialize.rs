//! Rendering the typed graph into ffmpeg filtergraph syntax.
//!
//! Free text reaches ffmpeg through two parsers: the filter option parser
//! (`\`, `'` and `:` are special) and the filtergraph parser (`\`, `'`, `[`,
//! `]`, `,` and `;`). Values are escaped for both, in that order.

use std::fmt::{self, Display, Write};

use super::audio::SAMPLE_RATE;
use super::{FadeKind, Filter, FilterGraph, FilterNode, GraphInput, Pad, StreamKind};
use crate::graph::text::DrawText;

/// Escapes a value for use as a filter option inside a filtergraph.
pub fn escape_value(raw: &str) -> String {
    let option_level = escape_chars(raw, &['\\', '\'', ':']);
    escape_chars(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

fn escape_chars(raw: &str, special: &[char]) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if special.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Milliseconds as seconds with millisecond precision.
pub fn seconds(ms: i64) -> String {
    let sign = if ms < 0 { "-" } else { "" };
    let ms = ms.unsigned_abs();
    format!("{sign}{}.{:03}", ms / 1000, ms % 1000)
}

fn decimal(value: f64) -> String {
    let formatted = format!("{value:.4}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    if trimmed.is_empty() || trimmed == "-" {
        "0".to_string()
    } else {
        trimmed.to_string()
    }
}

impl Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pad::Input { index, stream } => {
                let kind = match stream {
                    StreamKind::Video => 'v',
                    StreamKind::Audio => 'a',
                };
                write!(f, "[{index}:{kind}]")
            }
            Pad::Label(label) => write!(f, "[{label}]"),
        }
    }
}

impl Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Trim {
                start_ms,
                duration_ms,
            } => write_trim(f, "trim", *start_ms, *duration_ms),
            Filter::ATrim {
                start_ms,
                duration_ms,
            } => write_trim(f, "atrim", *start_ms, *duration_ms),
            Filter::ResetPts => f.write_str("setpts=PTS-STARTPTS"),
            Filter::AResetPts => f.write_str("asetpts=PTS-STARTPTS"),
            Filter::Retime { speed } => write!(f, "setpts=(PTS-STARTPTS)/{}", decimal(*speed)),
            Filter::FramePts { fps } => write!(f, "setpts=N/({fps}*TB)"),
            Filter::Loop { size } => write!(f, "loop=loop=-1:size={size}:start=0"),
            Filter::Fps { fps } => write!(f, "fps={fps}"),
            Filter::Format { pix_fmt } => write!(f, "format={pix_fmt}"),
            Filter::SetSar => f.write_str("setsar=1"),
            Filter::Scale { width, height } => write!(f, "scale={width}:{height}"),
            Filter::ScaleCover { width, height } => write!(
                f,
                "scale={width}:{height}:force_original_aspect_ratio=increase"
            ),
            Filter::Crop {
                width,
                height,
                x: Some(x),
                y: Some(y),
            } => write!(f, "crop={width}:{height}:{x}:{y}"),
            Filter::Crop {
                width,
                height,
                x,
                y,
            } => {
                write!(f, "crop={width}:{height}")?;
                if let Some(x) = x {
                    write!(f, ":x={x}")?;
                }
                if let Some(y) = y {
                    write!(f, ":y={y}")?;
                }
                Ok(())
            }
            Filter::Opacity { alpha } => write!(f, "colorchannelmixer=aa={}", decimal(*alpha)),
            Filter::Fade {
                kind,
                start_ms,
                duration_ms,
            } => {
                let direction = match kind {
                    FadeKind::In => "in",
                    FadeKind::Out => "out",
                };
                write!(
                    f,
                    "fade=t={direction}:st={}:d={}:alpha=1",
                    seconds(*start_ms),
                    seconds(*duration_ms)
                )
            }
            Filter::Delay { start_ms } => {
                write!(f, "setpts=PTS-STARTPTS+{}/TB", seconds(*start_ms))
            }
            Filter::Overlay {
                x,
                y,
                start_ms,
                end_ms,
            } => write!(
                f,
                "overlay=x={x}:y={y}:eof_action=pass:enable={}",
                escape_value(&format!(
                    "between(t,{},{})",
                    seconds(*start_ms),
                    seconds(*end_ms)
                ))
            ),
            Filter::DrawText(text) => write_drawtext(f, text),
            Filter::Tempo { factor } => write!(f, "atempo={}", decimal(*factor)),
            Filter::Volume { gain } => write!(f, "volume={}", decimal(*gain)),
            Filter::Resample { rate } => write!(f, "aresample={rate}"),
            Filter::StereoFormat => {
                f.write_str("aformat=sample_fmts=fltp:channel_layouts=stereo")
            }
            Filter::ADelay { delay_ms } => write!(f, "adelay=delays={delay_ms}:all=1"),
            Filter::APad { whole_duration_ms } => {
                write!(f, "apad=whole_dur={}", seconds(*whole_duration_ms))
            }
            Filter::AMix { inputs } => write!(
                f,
                "amix=inputs={inputs}:duration=first:dropout_transition=0:normalize=0"
            ),
            Filter::Concat { segments } => write!(f, "concat=n={segments}:v=0:a=1"),
            Filter::Silence => write!(f, "anullsrc=r={SAMPLE_RATE}:cl=stereo"),
            Filter::Null => f.write_str("null"),
            Filter::ANull => f.write_str("anull"),
        }
    }
}

fn write_trim(
    f: &mut fmt::Formatter<'_>,
    name: &str,
    start_ms: Option<i64>,
    duration_ms: i64,
) -> fmt::Result {
    match start_ms {
        Some(start) => write!(
            f,
            "{name}=start={}:duration={}",
            seconds(start),
            seconds(duration_ms)
        ),
        None => write!(f, "{name}=duration={}", seconds(duration_ms)),
    }
}

fn write_drawtext(f: &mut fmt::Formatter<'_>, text: &DrawText) -> fmt::Result {
    write!(
        f,
        "drawtext=text={}:expansion=none:font={}:fontsize={}:fontcolor={}:x={}:y={}",
        escape_value(&text.text),
        escape_value(&text.font),
        text.font_size,
        escape_value(&text.font_color),
        escape_value(&text.x),
        escape_value(&text.y),
    )?;

    if let Some(text_box) = &text.text_box {
        write!(
            f,
            ":box=1:boxcolor={}:boxborderw={}",
            escape_value(&text_box.color),
            text_box.padding
        )?;
    }
    if let Some(border) = &text.border {
        write!(
            f,
            ":borderw={}:bordercolor={}",
            border.width,
            escape_value(&border.color)
        )?;
    }
    if let Some(shadow) = &text.shadow {
        write!(
            f,
            ":shadowx={offset}:shadowy={offset}:shadowcolor={}",
            escape_value(&shadow.color),
            offset = shadow.offset
        )?;
    }

    write!(
        f,
        ":enable={}",
        escape_value(&format!(
            "between(t,{},{})",
            seconds(text.start_ms),
            seconds(text.end_ms)
        ))
    )
}

impl Display for FilterNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for pad in &self.inputs {
            write!(f, "{pad}")?;
        }
        for (i, filter) in self.filters.iter().enumerate() {
            if i > 0 {
                f.write_char(',')?;
            }
            write!(f, "{filter}")?;
        }
        write!(f, "[{}]", self.output)
    }
}

impl FilterGraph {
    /// The `-filter_complex` argument.
    pub fn to_filter_complex(&self) -> String {
        self.nodes
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(";")
    }
}

impl GraphInput {
    /// Arguments declaring this input on the ffmpeg command line.
    pub fn to_args(&self) -> Vec<String> {
        match self {
            GraphInput::Canvas {
                width,
                height,
                fps,
                duration_ms,
            } => vec![
                "-f".to_string(),
                "lavfi".to_string(),
                "-i".to_string(),
                format!(
                    "color=c=black:s={width}x{height}:r={fps}:d={}",
                    seconds(*duration_ms)
                ),
            ],
            GraphInput::File { path, .. } => {
                vec!["-i".to_string(), path.to_string_lossy().into_owned()]
            }
        }
    }
}
