//! Export settings and their resolution into a concrete encode profile.

use serde::{Deserialize, Serialize};

/// Lowest frame rate accepted for an export.
pub const MIN_FPS: u32 = 10;
/// Highest frame rate accepted for an export.
pub const MAX_FPS: u32 = 60;

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum SettingsError {
    #[error("resolution must be one of 480p, 720p, 1080p")]
    UnsupportedResolution,

    #[error("quality must be one of low, medium, high")]
    UnsupportedQuality,

    #[error("fps {fps} is outside the supported range {MIN_FPS}-{MAX_FPS}")]
    FpsOutOfRange { fps: u32 },
}

/// Resolution tier requested by the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Resolution {
    #[serde(rename = "480p")]
    Sd480,
    #[serde(rename = "720p")]
    #[default]
    Hd720,
    #[serde(rename = "1080p")]
    FullHd1080,
    #[serde(other)]
    Unsupported,
}

impl Resolution {
    /// Landscape dimensions for the tier.
    pub fn dimensions(self) -> Option<(u32, u32)> {
        match self {
            Resolution::Sd480 => Some((854, 480)),
            Resolution::Hd720 => Some((1280, 720)),
            Resolution::FullHd1080 => Some((1920, 1080)),
            Resolution::Unsupported => None,
        }
    }

    /// Video bitrate for medium quality at this tier.
    fn base_bitrate_kbps(self) -> u32 {
        match self {
            Resolution::Sd480 => 1500,
            Resolution::Hd720 | Resolution::Unsupported => 3000,
            Resolution::FullHd1080 => 6000,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Low,
    #[default]
    Medium,
    High,
    #[serde(other)]
    Unsupported,
}

impl Quality {
    /// Constant rate factor handed to libx264; lower is better.
    pub fn crf(self) -> Option<u8> {
        match self {
            Quality::Low => Some(28),
            Quality::Medium => Some(23),
            Quality::High => Some(18),
            Quality::Unsupported => None,
        }
    }

    fn preset(self) -> &'static str {
        match self {
            Quality::Low => "veryfast",
            Quality::Medium | Quality::Unsupported => "medium",
            Quality::High => "slow",
        }
    }

    fn bitrate_percent(self) -> u32 {
        match self {
            Quality::Low => 60,
            Quality::Medium | Quality::Unsupported => 100,
            Quality::High => 150,
        }
    }

    fn audio_bitrate_kbps(self) -> u32 {
        match self {
            Quality::Low => 96,
            Quality::Medium | Quality::Unsupported => 128,
            Quality::High => 192,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AspectRatio {
    #[default]
    Horizontal,
    Vertical,
}

/// Settings block of an export request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ExportSettings {
    pub resolution: Resolution,
    pub fps: u32,
    pub quality: Quality,
    /// Trade compression efficiency for encode speed
    pub quick: bool,
    pub aspect_ratio: AspectRatio,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            resolution: Resolution::default(),
            fps: 30,
            quality: Quality::default(),
            quick: false,
            aspect_ratio: AspectRatio::default(),
        }
    }
}

/// Concrete encoder parameters for one export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputProfile {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub video_bitrate_kbps: u32,
    pub audio_bitrate_kbps: u32,
    pub preset: String,
    pub crf: u8,
}

impl OutputProfile {
    /// Dimensions formatted as `WxH` for ffmpeg size arguments.
    pub fn size_arg(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Checks settings against the supported ranges without resolving them.
pub fn check_settings(settings: &ExportSettings) -> Vec<SettingsError> {
    let mut problems = Vec::new();
    if settings.resolution == Resolution::Unsupported {
        problems.push(SettingsError::UnsupportedResolution);
    }
    if settings.quality == Quality::Unsupported {
        problems.push(SettingsError::UnsupportedQuality);
    }
    if !(MIN_FPS..=MAX_FPS).contains(&settings.fps) {
        problems.push(SettingsError::FpsOutOfRange { fps: settings.fps });
    }
    problems
}

/// Maps user-facing settings onto encoder parameters.
///
/// Vertical exports swap the tier's width and height. Quick exports keep the
/// quality tier's CRF but drop to the `ultrafast` preset.
pub fn resolve_output_profile(settings: &ExportSettings) -> Result<OutputProfile, SettingsError> {
    if let Some(problem) = check_settings(settings).into_iter().next() {
        return Err(problem);
    }

    let (width, height) = settings
        .resolution
        .dimensions()
        .ok_or(SettingsError::UnsupportedResolution)?;
    let crf = settings
        .quality
        .crf()
        .ok_or(SettingsError::UnsupportedQuality)?;

    let (width, height) = match settings.aspect_ratio {
        AspectRatio::Horizontal => (width, height),
        AspectRatio::Vertical => (height, width),
    };

    let preset = if settings.quick {
        "ultrafast"
    } else {
        settings.quality.preset()
    };

    Ok(OutputProfile {
        width: even(width),
        height: even(height),
        fps: settings.fps,
        video_bitrate_kbps: settings.resolution.base_bitrate_kbps()
            * settings.quality.bitrate_percent()
            / 100,
        audio_bitrate_kbps: settings.quality.audio_bitrate_kbps(),
        preset: preset.to_string(),
        crf,
    })
}

// libx264 with yuv420p rejects odd dimensions.
fn even(value: u32) -> u32 {
    value - value % 2
}
