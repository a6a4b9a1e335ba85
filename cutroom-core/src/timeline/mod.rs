//! Timeline data model as produced by the editor.
//!
//! Elements are kept close to the editor's JSON (camelCase, optional fields)
//! so requests round-trip unchanged. Times are integer milliseconds with an
//! exclusive end.

pub mod validator;

use serde::{Deserialize, Serialize};

pub use validator::{
    IssueCode, MAX_ELEMENT_DURATION_MS, MAX_ELEMENTS, MAX_TIMELINE_POSITION_MS, MAX_TRACKS,
    MIN_DURATION_MS, ValidationIssue, ValidationOptions, ValidationReport, validate_timeline,
    validate_timeline_with,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElementKind {
    Video,
    Audio,
    Image,
    Gif,
    Text,
    Caption,
    #[serde(other)]
    Unknown,
}

impl ElementKind {
    /// Kinds backed by a downloaded media file.
    pub fn is_media(self) -> bool {
        matches!(
            self,
            ElementKind::Video | ElementKind::Audio | ElementKind::Image | ElementKind::Gif
        )
    }

    /// Kinds composited onto the canvas as picture layers.
    pub fn is_visual(self) -> bool {
        matches!(
            self,
            ElementKind::Video | ElementKind::Image | ElementKind::Gif
        )
    }

    /// Kinds rendered with drawtext.
    pub fn is_textual(self) -> bool {
        matches!(self, ElementKind::Text | ElementKind::Caption)
    }

    /// Kinds that contribute to the audio mix.
    pub fn has_audio(self) -> bool {
        matches!(self, ElementKind::Video | ElementKind::Audio)
    }

    /// Extension used for the scratch copy when the URL doesn't carry one.
    pub fn default_extension(self) -> &'static str {
        match self {
            ElementKind::Audio => "mp3",
            ElementKind::Image => "png",
            ElementKind::Gif => "gif",
            _ => "mp4",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrackKind {
    Video,
    Audio,
    Text,
    Caption,
    Overlay,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: String,
    /// Lower index sits on top visually and is mixed first.
    pub index: i32,
    #[serde(rename = "type")]
    pub kind: TrackKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

/// Media hosted outside the asset library.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalAsset {
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
}

/// Where an element's media comes from.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AssetRef {
    Internal { asset_id: String },
    External { url: String },
}

impl AssetRef {
    /// Stable key used to dedupe downloads and look up local copies.
    pub fn key(&self) -> String {
        match self {
            AssetRef::Internal { asset_id } => format!("internal:{asset_id}"),
            AssetRef::External { url } => format!("external:{url}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Transition {
    #[serde(rename = "type", default = "default_transition_kind")]
    pub kind: String,
    pub duration_ms: i64,
}

fn default_transition_kind() -> String {
    "fade".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropRect {
    pub x: i64,
    pub y: i64,
    pub width: i64,
    pub height: i64,
}

/// Position, size, crop and text style.
///
/// Unknown keys are preserved in `extra` so the editor can add properties
/// without breaking older exporters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ElementProperties {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub x: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub y: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub height: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropRect>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_size: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_family: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_weight: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub font_style: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text_align: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub border_width: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shadow: Option<bool>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ElementProperties {
    /// True when the editor placed or sized the element explicitly.
    pub fn has_explicit_geometry(&self) -> bool {
        self.x.is_some()
            || self.y.is_some()
            || self.width.is_some()
            || self.height.is_some()
            || self.crop.is_some()
    }
}

/// One timed unit on the timeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimelineElement {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ElementKind,
    pub track_id: String,
    pub timeline_start_ms: i64,
    pub timeline_end_ms: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_start_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_end_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_asset: Option<ExternalAsset>,
    #[serde(default = "unit")]
    pub speed: f64,
    #[serde(default = "unit")]
    pub volume: f64,
    #[serde(default = "unit")]
    pub opacity: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub properties: ElementProperties,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_in: Option<Transition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transition_out: Option<Transition>,
}

fn unit() -> f64 {
    1.0
}

impl TimelineElement {
    pub fn duration_ms(&self) -> i64 {
        self.timeline_end_ms.saturating_sub(self.timeline_start_ms)
    }

    /// Asset reference, preferring the internal library id.
    pub fn asset_ref(&self) -> Option<AssetRef> {
        if let Some(asset_id) = self.asset_id.as_ref().filter(|id| !id.trim().is_empty()) {
            return Some(AssetRef::Internal {
                asset_id: asset_id.trim().to_string(),
            });
        }
        self.external_asset
            .as_ref()
            .filter(|external| !external.url.trim().is_empty())
            .map(|external| AssetRef::External {
                url: external.url.trim().to_string(),
            })
    }

    /// Playback rate, with non-finite or non-positive values treated as 1.
    pub fn effective_speed(&self) -> f64 {
        if self.speed.is_finite() && self.speed > 0.0 {
            self.speed
        } else {
            1.0
        }
    }

    /// Source range length, when both trim points are set.
    pub fn source_duration_ms(&self) -> Option<i64> {
        match (self.source_start_ms, self.source_end_ms) {
            (Some(start), Some(end)) => Some(end.saturating_sub(start)),
            _ => None,
        }
    }

    /// Source media consumed when no trim end is given: the timeline window
    /// scaled by playback speed.
    pub fn implied_source_span_ms(&self) -> i64 {
        (self.duration_ms() as f64 * self.effective_speed()).round() as i64
    }
}
