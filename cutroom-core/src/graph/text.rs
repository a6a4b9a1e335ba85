//! Text and caption overlays rendered with drawtext.

use crate::settings::OutputProfile;
use crate::timeline::{ElementKind, ElementProperties, TimelineElement};

/// Height the editor's font sizes are authored against.
const REFERENCE_HEIGHT: f64 = 1080.0;
const DEFAULT_TEXT_SIZE: f64 = 48.0;
const DEFAULT_CAPTION_SIZE: f64 = 36.0;
const DEFAULT_FONT_FAMILY: &str = "Sans";
const DEFAULT_CAPTION_PADDING: i64 = 12;

#[derive(Debug, Clone, PartialEq)]
pub struct TextBox {
    pub color: String,
    pub padding: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextBorder {
    pub width: u32,
    pub color: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TextShadow {
    pub offset: i32,
    pub color: String,
}

/// Arguments of one drawtext filter, unescaped.
#[derive(Debug, Clone, PartialEq)]
pub struct DrawText {
    pub text: String,
    /// Fontconfig pattern such as `Sans:weight=bold`
    pub font: String,
    pub font_size: u32,
    pub font_color: String,
    pub x: String,
    pub y: String,
    pub start_ms: i64,
    pub end_ms: i64,
    pub text_box: Option<TextBox>,
    pub border: Option<TextBorder>,
    pub shadow: Option<TextShadow>,
}

/// Builds the drawtext arguments for a text or caption element.
///
/// Returns `None` for non-text elements and for empty bodies.
pub fn drawtext_for(element: &TimelineElement, profile: &OutputProfile) -> Option<DrawText> {
    if !element.kind.is_textual() {
        return None;
    }
    let text = element.text.as_deref().map(str::trim).filter(|t| !t.is_empty())?;
    let props = &element.properties;
    let is_caption = element.kind == ElementKind::Caption;
    let scale = f64::from(profile.height) / REFERENCE_HEIGHT;

    let base_size = props.font_size.filter(|s| s.is_finite() && *s > 0.0).unwrap_or(
        if is_caption {
            DEFAULT_CAPTION_SIZE
        } else {
            DEFAULT_TEXT_SIZE
        },
    );

    let text_box = if is_caption || props.background_color.is_some() {
        let padding = props.padding.unwrap_or(DEFAULT_CAPTION_PADDING).max(0) as f64;
        Some(TextBox {
            color: color_or(props.background_color.as_deref(), "black@0.6"),
            padding: scaled(padding, scale),
        })
    } else {
        None
    };

    let border = props
        .border_width
        .filter(|w| *w > 0)
        .map(|width| TextBorder {
            width: scaled(width as f64, scale).max(1),
            color: color_or(props.border_color.as_deref(), "black"),
        });

    let shadow = if props.shadow.unwrap_or(is_caption) {
        Some(TextShadow {
            offset: scaled(2.0, scale).max(1) as i32,
            color: "black@0.7".to_string(),
        })
    } else {
        None
    };

    Some(DrawText {
        text: text.to_string(),
        font: font_pattern(props),
        font_size: scaled(base_size, scale).max(1),
        font_color: color_or(props.color.as_deref(), "white"),
        x: horizontal_position(props),
        y: vertical_position(props, is_caption),
        start_ms: element.timeline_start_ms,
        end_ms: element.timeline_end_ms,
        text_box,
        border,
        shadow,
    })
}

fn scaled(value: f64, scale: f64) -> u32 {
    (value * scale).round().max(0.0) as u32
}

fn horizontal_position(props: &ElementProperties) -> String {
    if let Some(x) = props.x {
        return x.to_string();
    }
    match props.text_align.as_deref() {
        Some("left") => "w*0.05".to_string(),
        Some("right") => "w-text_w-w*0.05".to_string(),
        _ => "(w-text_w)/2".to_string(),
    }
}

fn vertical_position(props: &ElementProperties, is_caption: bool) -> String {
    match props.y {
        Some(y) => y.to_string(),
        None if is_caption => "h-text_h-h*0.08".to_string(),
        None => "(h-text_h)/2".to_string(),
    }
}

fn font_pattern(props: &ElementProperties) -> String {
    let family: String = props
        .font_family
        .as_deref()
        .unwrap_or(DEFAULT_FONT_FAMILY)
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, ' ' | '-' | '_'))
        .collect();
    let family = match family.trim() {
        "" => DEFAULT_FONT_FAMILY,
        trimmed => trimmed,
    };

    let mut pattern = family.to_string();
    let bold = props.font_weight.as_deref().is_some_and(|w| {
        w.eq_ignore_ascii_case("bold") || w.parse::<u32>().is_ok_and(|n| n >= 600)
    });
    if bold {
        pattern.push_str(":weight=bold");
    }
    if props
        .font_style
        .as_deref()
        .is_some_and(|s| s.eq_ignore_ascii_case("italic"))
    {
        pattern.push_str(":slant=italic");
    }
    pattern
}

/// Normalizes a CSS-ish color into ffmpeg color syntax.
///
/// Accepts `#rgb`, `#rrggbb`, `#rrggbbaa` and plain color names with an
/// optional `@alpha`. Anything else falls back.
pub(crate) fn color_or(input: Option<&str>, fallback: &str) -> String {
    let Some(raw) = input.map(str::trim).filter(|c| !c.is_empty()) else {
        return fallback.to_string();
    };

    if let Some(hex) = raw.strip_prefix('#') {
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return fallback.to_string();
        }
        return match hex.len() {
            3 => {
                let expanded: String = hex.chars().flat_map(|c| [c, c]).collect();
                format!("0x{expanded}")
            }
            6 | 8 => format!("0x{hex}"),
            _ => fallback.to_string(),
        };
    }

    let valid_name = raw
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '@' || c == '.');
    if valid_name && raw.chars().next().is_some_and(|c| c.is_ascii_alphabetic()) {
        raw.to_string()
    } else {
        fallback.to_string()
    }
}
