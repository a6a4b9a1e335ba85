//! Timeline validation and auto-correction.
//!
//! Problems fall into two buckets. Errors reject the export before any work
//! starts. Warnings are either informational or describe a correction that
//! was applied to the returned copy of the elements; later stages only ever
//! see the corrected copy.

use std::collections::{HashMap, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use super::{AssetRef, ElementKind, TimelineElement, Track, TrackKind};
use crate::settings::{ExportSettings, check_settings};

/// Shortest element (and source range) the exporter will render.
pub const MIN_DURATION_MS: i64 = 100;
/// Longest element accepted on the timeline (4 hours).
pub const MAX_ELEMENT_DURATION_MS: i64 = 4 * 60 * 60 * 1000;
/// Timeline and source positions must lie within this many ms of zero (24 hours).
pub const MAX_TIMELINE_POSITION_MS: i64 = 24 * 60 * 60 * 1000;
pub const MAX_TRACKS: usize = 50;
pub const MAX_ELEMENTS: usize = 500;

const REMOTE_URL_SCHEMES: &[&str] = &["http", "https"];

static ASSET_ID_PATTERN: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-fA-F0-9]{24}$").ok());

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    InvalidSettings,
    NoTracks,
    TooManyTracks,
    DuplicateTrackId,
    DuplicateTrackIndex,
    UnknownTrackKind,
    MissingTrackName,
    UnknownTrack,
    UnknownElementKind,
    MissingAsset,
    InvalidAssetId,
    InvalidAssetUrl,
    EmptyText,
    TooManyElements,
    TimeOutOfRange,
    EndNotAfterStart,
    StartClamped,
    DurationExtended,
    DurationTooLong,
    SourceEndNotAfterStart,
    SourceStartClamped,
    SourceRangeExtended,
    Overlap,
}

impl IssueCode {
    /// Warnings that describe a change made to the element.
    pub fn is_correction(self) -> bool {
        matches!(
            self,
            IssueCode::StartClamped
                | IssueCode::DurationExtended
                | IssueCode::SourceStartClamped
                | IssueCode::SourceRangeExtended
        )
    }
}

/// Switches that depend on who submitted the timeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationOptions {
    /// Accept `file://` asset URLs. Only local tooling turns this on; a
    /// server must never read its own disk on a client's behalf.
    pub allow_local_files: bool,
}

impl ValidationOptions {
    pub fn local() -> Self {
        Self {
            allow_local_files: true,
        }
    }

    fn accepts_scheme(self, scheme: &str) -> bool {
        REMOTE_URL_SCHEMES.contains(&scheme) || (self.allow_local_files && scheme == "file")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationIssue {
    pub code: IssueCode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub element_id: Option<String>,
    pub message: String,
}

impl std::fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub corrected_elements: Vec<TimelineElement>,
}

impl ValidationReport {
    /// All error messages joined into one line for API responses.
    pub fn error_summary(&self) -> String {
        let messages: Vec<&str> = self.errors.iter().map(|e| e.message.as_str()).collect();
        format!("Timeline validation failed: {}", messages.join("; "))
    }

    pub fn warning_messages(&self) -> Vec<String> {
        self.warnings.iter().map(|w| w.message.clone()).collect()
    }

    pub fn corrections(&self) -> impl Iterator<Item = &ValidationIssue> {
        self.warnings.iter().filter(|w| w.code.is_correction())
    }
}

#[derive(Default)]
struct Issues {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationIssue>,
}

impl Issues {
    fn error(&mut self, code: IssueCode, element_id: Option<&str>, message: String) {
        self.errors.push(ValidationIssue {
            code,
            element_id: element_id.map(str::to_string),
            message,
        });
    }

    fn warn(&mut self, code: IssueCode, element_id: Option<&str>, message: String) {
        self.warnings.push(ValidationIssue {
            code,
            element_id: element_id.map(str::to_string),
            message,
        });
    }
}

/// Validates a timeline and returns corrected copies of its elements.
///
/// Running the validator over its own `corrected_elements` yields no further
/// corrections. Local `file://` assets are rejected; see
/// [`validate_timeline_with`].
pub fn validate_timeline(
    tracks: &[Track],
    elements: &[TimelineElement],
    settings: &ExportSettings,
) -> ValidationReport {
    validate_timeline_with(tracks, elements, settings, ValidationOptions::default())
}

pub fn validate_timeline_with(
    tracks: &[Track],
    elements: &[TimelineElement],
    settings: &ExportSettings,
    options: ValidationOptions,
) -> ValidationReport {
    let mut issues = Issues::default();

    for problem in check_settings(settings) {
        issues.error(
            IssueCode::InvalidSettings,
            None,
            format!("Invalid export settings: {problem}"),
        );
    }

    check_tracks(tracks, &mut issues);

    if elements.len() > MAX_ELEMENTS {
        issues.error(
            IssueCode::TooManyElements,
            None,
            format!(
                "Timeline has {} elements, the maximum is {MAX_ELEMENTS}",
                elements.len()
            ),
        );
    }

    let track_ids: HashSet<&str> = tracks.iter().map(|t| t.id.as_str()).collect();
    let mut corrected = Vec::with_capacity(elements.len());
    let mut rejected: HashSet<String> = HashSet::new();

    for element in elements {
        let errors_before = issues.errors.len();
        let mut element = element.clone();

        if element.kind == ElementKind::Unknown {
            issues.error(
                IssueCode::UnknownElementKind,
                Some(&element.id),
                format!("Element {} has an unsupported type", element.id),
            );
        }

        if !tracks.is_empty() && !track_ids.contains(element.track_id.as_str()) {
            issues.warn(
                IssueCode::UnknownTrack,
                Some(&element.id),
                format!(
                    "Element {} references unknown track {}",
                    element.id, element.track_id
                ),
            );
        }

        check_asset(&element, options, &mut issues);
        correct_timeline_range(&mut element, &mut issues);
        correct_source_range(&mut element, &mut issues);

        if issues.errors.len() > errors_before {
            rejected.insert(element.id.clone());
        }
        corrected.push(element);
    }

    warn_overlaps(&corrected, &rejected, &mut issues);

    let report = ValidationReport {
        valid: issues.errors.is_empty(),
        errors: issues.errors,
        warnings: issues.warnings,
        corrected_elements: corrected,
    };

    for warning in &report.warnings {
        tracing::debug!("Timeline warning: {}", warning.message);
    }
    if !report.valid {
        tracing::info!(
            "Timeline rejected with {} errors and {} warnings",
            report.errors.len(),
            report.warnings.len()
        );
    }

    report
}

fn check_tracks(tracks: &[Track], issues: &mut Issues) {
    if tracks.is_empty() {
        issues.error(
            IssueCode::NoTracks,
            None,
            "Timeline has no tracks".to_string(),
        );
        return;
    }

    if tracks.len() > MAX_TRACKS {
        issues.error(
            IssueCode::TooManyTracks,
            None,
            format!(
                "Timeline has {} tracks, the maximum is {MAX_TRACKS}",
                tracks.len()
            ),
        );
    }

    let mut seen_ids = HashSet::new();
    let mut seen_indices: HashMap<i32, &str> = HashMap::new();

    for track in tracks {
        if !seen_ids.insert(track.id.as_str()) {
            issues.error(
                IssueCode::DuplicateTrackId,
                None,
                format!("Duplicate track id {}", track.id),
            );
        }

        if let Some(other) = seen_indices.insert(track.index, track.id.as_str()) {
            issues.warn(
                IssueCode::DuplicateTrackIndex,
                None,
                format!(
                    "Tracks {} and {} share index {}",
                    other, track.id, track.index
                ),
            );
        }

        if track.kind == TrackKind::Unknown {
            issues.error(
                IssueCode::UnknownTrackKind,
                None,
                format!("Track {} has an unknown type", track.id),
            );
        }

        if track.name.as_deref().is_none_or(|name| name.trim().is_empty()) {
            issues.warn(
                IssueCode::MissingTrackName,
                None,
                format!("Track {} has no name", track.id),
            );
        }
    }
}

fn check_asset(element: &TimelineElement, options: ValidationOptions, issues: &mut Issues) {
    if element.kind.is_textual() {
        if element.text.as_deref().is_none_or(|t| t.trim().is_empty()) {
            issues.warn(
                IssueCode::EmptyText,
                Some(&element.id),
                format!("Text element {} is empty", element.id),
            );
        }
        return;
    }

    if !element.kind.is_media() {
        return;
    }

    match element.asset_ref() {
        None => issues.error(
            IssueCode::MissingAsset,
            Some(&element.id),
            format!("Element {} has no asset reference", element.id),
        ),
        Some(AssetRef::Internal { asset_id }) => {
            if !is_valid_asset_id(&asset_id) {
                issues.error(
                    IssueCode::InvalidAssetId,
                    Some(&element.id),
                    format!(
                        "Element {} has malformed asset id '{}'",
                        element.id, asset_id
                    ),
                );
            }
        }
        Some(AssetRef::External { url }) => match url::Url::parse(&url) {
            Ok(parsed) if options.accepts_scheme(parsed.scheme()) => {}
            Ok(parsed) if parsed.scheme() == "file" => issues.error(
                IssueCode::InvalidAssetUrl,
                Some(&element.id),
                format!(
                    "Element {} references local file '{}', which is not accepted here",
                    element.id, url
                ),
            ),
            _ => issues.error(
                IssueCode::InvalidAssetUrl,
                Some(&element.id),
                format!("Element {} has invalid asset URL '{}'", element.id, url),
            ),
        },
    }
}

pub(crate) fn is_valid_asset_id(asset_id: &str) -> bool {
    ASSET_ID_PATTERN
        .as_ref()
        .is_some_and(|pattern| pattern.is_match(asset_id))
}

fn is_within_bounds(ms: i64) -> bool {
    (-MAX_TIMELINE_POSITION_MS..=MAX_TIMELINE_POSITION_MS).contains(&ms)
}

fn out_of_range(issues: &mut Issues, id: &str, what: &str, ms: i64) {
    issues.error(
        IssueCode::TimeOutOfRange,
        Some(id),
        format!(
            "Element {id} {what} ({ms}ms) is outside -{MAX_TIMELINE_POSITION_MS}ms..{MAX_TIMELINE_POSITION_MS}ms"
        ),
    );
}

fn correct_timeline_range(element: &mut TimelineElement, issues: &mut Issues) {
    let id = element.id.clone();
    let (start, end) = (element.timeline_start_ms, element.timeline_end_ms);

    if let Some((what, ms)) = [("start time", start), ("end time", end)]
        .into_iter()
        .find(|(_, ms)| !is_within_bounds(*ms))
    {
        out_of_range(issues, &id, what, ms);
        return;
    }

    if end <= start {
        issues.error(
            IssueCode::EndNotAfterStart,
            Some(&id),
            format!("Element {id} end time ({end}ms) is not after start time ({start}ms)"),
        );
        return;
    }

    if start < 0 {
        issues.warn(
            IssueCode::StartClamped,
            Some(&id),
            format!("Element {id} starts at {start}ms, moved to 0ms"),
        );
        element.timeline_start_ms = 0;
    }

    if element.duration_ms() < MIN_DURATION_MS {
        let extended = element.timeline_start_ms.saturating_add(MIN_DURATION_MS);
        issues.warn(
            IssueCode::DurationExtended,
            Some(&id),
            format!(
                "Element {id} is shorter than {MIN_DURATION_MS}ms, end extended to {extended}ms"
            ),
        );
        element.timeline_end_ms = extended;
        if !is_within_bounds(extended) {
            out_of_range(issues, &id, "extended end time", extended);
            return;
        }
    }

    if element.duration_ms() > MAX_ELEMENT_DURATION_MS {
        issues.error(
            IssueCode::DurationTooLong,
            Some(&id),
            format!(
                "Element {id} lasts {}ms, the maximum is {MAX_ELEMENT_DURATION_MS}ms",
                element.duration_ms()
            ),
        );
    }
}

/// Normalizes the source trim. A one-sided trim gets its missing bound
/// first (start 0, or an end implied by the timeline window and speed) so the
/// floor applies to the range that is actually played.
fn correct_source_range(element: &mut TimelineElement, issues: &mut Issues) {
    let id = element.id.clone();
    let (start, end) = match (element.source_start_ms, element.source_end_ms) {
        (None, None) => return,
        bounds => bounds,
    };

    if let Some((what, ms)) = [("source start", start), ("source end", end)]
        .into_iter()
        .find_map(|(what, ms)| ms.filter(|ms| !is_within_bounds(*ms)).map(|ms| (what, ms)))
    {
        out_of_range(issues, &id, what, ms);
        return;
    }

    if let (Some(start), Some(end)) = (start, end)
        && end <= start
    {
        issues.error(
            IssueCode::SourceEndNotAfterStart,
            Some(&id),
            format!("Element {id} source end ({end}ms) is not after source start time ({start}ms)"),
        );
        return;
    }

    let mut start = start.unwrap_or(0);
    if start < 0 {
        issues.warn(
            IssueCode::SourceStartClamped,
            Some(&id),
            format!("Element {id} source start {start}ms moved to 0ms"),
        );
        start = 0;
    }

    let mut end = end.unwrap_or_else(|| start.saturating_add(element.implied_source_span_ms()));
    if end.saturating_sub(start) < MIN_DURATION_MS {
        let extended = start.saturating_add(MIN_DURATION_MS);
        issues.warn(
            IssueCode::SourceRangeExtended,
            Some(&id),
            format!(
                "Element {id} source range is shorter than {MIN_DURATION_MS}ms, source end extended to {extended}ms"
            ),
        );
        end = extended;
    }

    if !is_within_bounds(end) {
        out_of_range(issues, &id, "resolved source end", end);
        return;
    }

    element.source_start_ms = Some(start);
    element.source_end_ms = Some(end);
}

/// Same-track overlap stacks rather than rejects; it is reported only.
fn warn_overlaps(elements: &[TimelineElement], rejected: &HashSet<String>, issues: &mut Issues) {
    let mut by_track: HashMap<&str, Vec<&TimelineElement>> = HashMap::new();
    for element in elements.iter().filter(|e| !rejected.contains(&e.id)) {
        by_track
            .entry(element.track_id.as_str())
            .or_default()
            .push(element);
    }

    let mut track_ids: Vec<&str> = by_track.keys().copied().collect();
    track_ids.sort_unstable();

    for track_id in track_ids {
        let Some(lane) = by_track.get_mut(track_id) else {
            continue;
        };
        lane.sort_by_key(|e| (e.timeline_start_ms, e.timeline_end_ms));

        let mut furthest: Option<&TimelineElement> = None;
        for &element in lane.iter() {
            if let Some(previous) = furthest
                && element.timeline_start_ms < previous.timeline_end_ms
            {
                issues.warn(
                    IssueCode::Overlap,
                    Some(&element.id),
                    format!(
                        "Elements {} and {} overlap on track {}",
                        previous.id, element.id, track_id
                    ),
                );
            }
            if furthest.is_none_or(|p| element.timeline_end_ms > p.timeline_end_ms) {
                furthest = Some(element);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::settings::{Quality, Resolution};
    use crate::timeline::{ElementProperties, ExternalAsset};

    const ASSET_ID: &str = "64b7f0c2a1b2c3d4e5f60718";

    fn track(id: &str, index: i32) -> Track {
        Track {
            id: id.to_string(),
            index,
            kind: TrackKind::Video,
            name: Some(format!("Track {id}")),
        }
    }

    fn video(id: &str, track_id: &str, start: i64, end: i64) -> TimelineElement {
        TimelineElement {
            id: id.to_string(),
            kind: ElementKind::Video,
            track_id: track_id.to_string(),
            timeline_start_ms: start,
            timeline_end_ms: end,
            source_start_ms: None,
            source_end_ms: None,
            asset_id: Some(ASSET_ID.to_string()),
            external_asset: None,
            speed: 1.0,
            volume: 1.0,
            opacity: 1.0,
            text: None,
            properties: ElementProperties::default(),
            transition_in: None,
            transition_out: None,
        }
    }

    fn codes(issues: &[ValidationIssue]) -> Vec<IssueCode> {
        issues.iter().map(|i| i.code).collect()
    }

    #[test]
    fn test_valid_timeline_passes() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("v1", "t1", 0, 5000)],
            &ExportSettings::default(),
        );
        assert!(report.valid, "{:?}", report.errors);
        assert!(report.warnings.is_empty());
        assert_eq!(report.corrected_elements.len(), 1);
    }

    #[test]
    fn test_end_equal_to_start_is_rejected() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("v1", "t1", 1000, 1000)],
            &ExportSettings::default(),
        );
        assert!(!report.valid);
        assert_eq!(codes(&report.errors), vec![IssueCode::EndNotAfterStart]);
        assert!(report.error_summary().contains("not after start time"));
    }

    #[test]
    fn test_short_duration_is_extended() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("v1", "t1", 200, 230)],
            &ExportSettings::default(),
        );
        assert!(report.valid);
        assert_eq!(codes(&report.warnings), vec![IssueCode::DurationExtended]);
        let element = &report.corrected_elements[0];
        assert_eq!(element.timeline_end_ms, 200 + MIN_DURATION_MS);
    }

    #[test]
    fn test_negative_start_is_clamped() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("v1", "t1", -500, 2000)],
            &ExportSettings::default(),
        );
        assert!(report.valid);
        assert_eq!(report.corrected_elements[0].timeline_start_ms, 0);
        assert_eq!(report.corrections().count(), 1);
    }

    #[test]
    fn test_overlong_element_is_rejected() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("v1", "t1", 0, MAX_ELEMENT_DURATION_MS + 1)],
            &ExportSettings::default(),
        );
        assert_eq!(codes(&report.errors), vec![IssueCode::DurationTooLong]);
    }

    #[test]
    fn test_source_range_checks() {
        let mut clip = video("v1", "t1", 0, 1000);
        clip.source_start_ms = Some(-40);
        clip.source_end_ms = Some(20);

        let report = validate_timeline(&[track("t1", 0)], &[clip], &ExportSettings::default());
        assert!(report.valid);
        let element = &report.corrected_elements[0];
        assert_eq!(element.source_start_ms, Some(0));
        assert_eq!(element.source_end_ms, Some(MIN_DURATION_MS));

        let mut inverted = video("v2", "t1", 0, 1000);
        inverted.source_start_ms = Some(3000);
        inverted.source_end_ms = Some(1000);
        let report =
            validate_timeline(&[track("t1", 0)], &[inverted], &ExportSettings::default());
        assert_eq!(codes(&report.errors), vec![IssueCode::SourceEndNotAfterStart]);
    }

    #[test]
    fn test_one_sided_source_range_is_resolved() {
        let mut end_only = video("e", "t1", 0, 1000);
        end_only.source_end_ms = Some(40);

        let mut start_only = video("s", "t1", 1000, 3000);
        start_only.source_start_ms = Some(500);
        start_only.speed = 2.0;

        let report = validate_timeline(
            &[track("t1", 0)],
            &[end_only, start_only],
            &ExportSettings::default(),
        );
        assert!(report.valid, "{:?}", report.errors);
        assert_eq!(codes(&report.warnings), vec![IssueCode::SourceRangeExtended]);

        let end_only = &report.corrected_elements[0];
        assert_eq!(end_only.source_start_ms, Some(0));
        assert_eq!(end_only.source_end_ms, Some(MIN_DURATION_MS));

        let start_only = &report.corrected_elements[1];
        assert_eq!(start_only.source_start_ms, Some(500));
        assert_eq!(start_only.source_end_ms, Some(4500));

        let again = validate_timeline(
            &[track("t1", 0)],
            &report.corrected_elements,
            &ExportSettings::default(),
        );
        assert_eq!(again.corrections().count(), 0);
        assert_eq!(again.corrected_elements, report.corrected_elements);
    }

    #[test]
    fn test_extreme_positions_are_rejected() {
        let cases = [
            video("max", "t1", i64::MAX - 50, i64::MAX),
            video("min", "t1", i64::MIN, 0),
            video("edge", "t1", MAX_TIMELINE_POSITION_MS - 20, MAX_TIMELINE_POSITION_MS),
        ];
        for clip in cases {
            let id = clip.id.clone();
            let report = validate_timeline(&[track("t1", 0)], &[clip], &ExportSettings::default());
            assert!(!report.valid, "{id}");
            assert_eq!(codes(&report.errors), vec![IssueCode::TimeOutOfRange], "{id}");
            assert!(report.error_summary().contains("outside"));
        }

        let mut trimmed = video("src", "t1", 0, 1000);
        trimmed.source_start_ms = Some(i64::MAX - 10);
        trimmed.source_end_ms = Some(i64::MAX);
        let report = validate_timeline(&[track("t1", 0)], &[trimmed], &ExportSettings::default());
        assert_eq!(codes(&report.errors), vec![IssueCode::TimeOutOfRange]);

        let mut runaway = video("fast", "t1", 0, 60_000);
        runaway.source_start_ms = Some(0);
        runaway.speed = 1e12;
        let report = validate_timeline(&[track("t1", 0)], &[runaway], &ExportSettings::default());
        assert_eq!(codes(&report.errors), vec![IssueCode::TimeOutOfRange]);
    }

    #[test]
    fn test_local_files_need_opt_in() {
        let mut local = video("l", "t1", 0, 1000);
        local.asset_id = None;
        local.external_asset = Some(ExternalAsset {
            url: "file:///etc/passwd".to_string(),
            platform: None,
        });
        let elements = [local];

        let report = validate_timeline(&[track("t1", 0)], &elements, &ExportSettings::default());
        assert_eq!(codes(&report.errors), vec![IssueCode::InvalidAssetUrl]);
        assert!(report.errors[0].message.contains("local file"));

        let report = validate_timeline_with(
            &[track("t1", 0)],
            &elements,
            &ExportSettings::default(),
            ValidationOptions::local(),
        );
        assert!(report.valid, "{:?}", report.errors);
    }

    #[test]
    fn test_overlap_is_a_warning() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("a", "t1", 0, 3000), video("b", "t1", 2000, 4000)],
            &ExportSettings::default(),
        );
        assert!(report.valid);
        assert_eq!(codes(&report.warnings), vec![IssueCode::Overlap]);
    }

    #[test]
    fn test_adjacent_elements_do_not_overlap() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("a", "t1", 0, 3000), video("b", "t1", 3000, 4000)],
            &ExportSettings::default(),
        );
        assert!(report.warnings.is_empty());
    }

    #[test]
    fn test_track_rules() {
        let report = validate_timeline(&[], &[], &ExportSettings::default());
        assert_eq!(codes(&report.errors), vec![IssueCode::NoTracks]);

        let mut unnamed = track("t2", 0);
        unnamed.name = None;
        let mut strange = track("t3", 1);
        strange.kind = TrackKind::Unknown;
        let report = validate_timeline(
            &[track("t1", 0), unnamed, strange, track("t1", 2)],
            &[],
            &ExportSettings::default(),
        );
        let errors = codes(&report.errors);
        assert!(errors.contains(&IssueCode::DuplicateTrackId));
        assert!(errors.contains(&IssueCode::UnknownTrackKind));
        let warnings = codes(&report.warnings);
        assert!(warnings.contains(&IssueCode::DuplicateTrackIndex));
        assert!(warnings.contains(&IssueCode::MissingTrackName));

        let many: Vec<Track> = (0..=MAX_TRACKS as i32)
            .map(|i| track(&format!("t{i}"), i))
            .collect();
        let report = validate_timeline(&many, &[], &ExportSettings::default());
        assert_eq!(codes(&report.errors), vec![IssueCode::TooManyTracks]);
    }

    #[test]
    fn test_asset_reference_rules() {
        let mut missing = video("m", "t1", 0, 1000);
        missing.asset_id = None;

        let mut malformed = video("x", "t1", 1000, 2000);
        malformed.asset_id = Some("not-an-object-id".to_string());

        let mut bad_url = video("u", "t1", 2000, 3000);
        bad_url.asset_id = None;
        bad_url.external_asset = Some(ExternalAsset {
            url: "ftp://example.com/clip.mp4".to_string(),
            platform: None,
        });

        let mut good_url = video("g", "t1", 3000, 4000);
        good_url.asset_id = None;
        good_url.external_asset = Some(ExternalAsset {
            url: "https://cdn.example.com/clip.mp4".to_string(),
            platform: Some("pexels".to_string()),
        });

        let report = validate_timeline(
            &[track("t1", 0)],
            &[missing, malformed, bad_url, good_url],
            &ExportSettings::default(),
        );
        assert_eq!(
            codes(&report.errors),
            vec![
                IssueCode::MissingAsset,
                IssueCode::InvalidAssetId,
                IssueCode::InvalidAssetUrl
            ]
        );
    }

    #[test]
    fn test_text_elements_need_no_asset() {
        let mut text = video("title", "t1", 0, 1000);
        text.kind = ElementKind::Text;
        text.asset_id = None;
        text.text = Some("   ".to_string());

        let report = validate_timeline(&[track("t1", 0)], &[text], &ExportSettings::default());
        assert!(report.valid);
        assert_eq!(codes(&report.warnings), vec![IssueCode::EmptyText]);
    }

    #[test]
    fn test_settings_errors_are_reported() {
        let settings = ExportSettings {
            resolution: Resolution::Unsupported,
            quality: Quality::High,
            fps: 5,
            ..Default::default()
        };
        let report = validate_timeline(&[track("t1", 0)], &[], &settings);
        assert_eq!(report.errors.len(), 2);
        assert!(
            report
                .errors
                .iter()
                .all(|e| e.code == IssueCode::InvalidSettings)
        );
    }

    #[test]
    fn test_unknown_track_reference_warns() {
        let report = validate_timeline(
            &[track("t1", 0)],
            &[video("v1", "missing", 0, 1000)],
            &ExportSettings::default(),
        );
        assert!(report.valid);
        assert_eq!(codes(&report.warnings), vec![IssueCode::UnknownTrack]);
    }

    #[test]
    fn test_too_many_elements() {
        let elements: Vec<TimelineElement> = (0..=MAX_ELEMENTS as i64)
            .map(|i| video(&format!("v{i}"), "t1", i * 1000, i * 1000 + 500))
            .collect();
        let report = validate_timeline(&[track("t1", 0)], &elements, &ExportSettings::default());
        assert_eq!(codes(&report.errors), vec![IssueCode::TooManyElements]);
    }

    proptest! {
        #[test]
        fn prop_corrected_durations_respect_floor(
            start in -10_000i64..100_000,
            length in 1i64..5_000,
            source_start in proptest::option::of(-2_000i64..10_000),
            source_length in 1i64..3_000,
        ) {
            let mut clip = video("p", "t1", start, start + length);
            if let Some(s) = source_start {
                clip.source_start_ms = Some(s);
                clip.source_end_ms = Some(s + source_length);
            }

            let report = validate_timeline(&[track("t1", 0)], &[clip], &ExportSettings::default());
            prop_assert!(report.valid);

            let corrected = &report.corrected_elements[0];
            prop_assert!(corrected.timeline_start_ms >= 0);
            prop_assert!(corrected.duration_ms() >= MIN_DURATION_MS);
            if let (Some(s), Some(e)) = (corrected.source_start_ms, corrected.source_end_ms) {
                prop_assert!(s >= 0);
                prop_assert!(e - s >= MIN_DURATION_MS);
            }
        }

        #[test]
        fn prop_arbitrary_times_never_panic(
            start in any::<i64>(),
            end in any::<i64>(),
            source_start in proptest::option::of(any::<i64>()),
            source_end in proptest::option::of(any::<i64>()),
        ) {
            let mut clip = video("x", "t1", start, end);
            clip.source_start_ms = source_start;
            clip.source_end_ms = source_end;

            let report = validate_timeline(&[track("t1", 0)], &[clip], &ExportSettings::default());
            if report.valid {
                let corrected = &report.corrected_elements[0];
                prop_assert!(corrected.timeline_end_ms <= MAX_TIMELINE_POSITION_MS);
                prop_assert!(corrected.duration_ms() >= MIN_DURATION_MS);
                prop_assert!(corrected.duration_ms() <= MAX_ELEMENT_DURATION_MS);
                if let Some(span) = corrected.source_duration_ms() {
                    prop_assert!(span >= MIN_DURATION_MS);
                }

                let again = validate_timeline(
                    &[track("t1", 0)],
                    &report.corrected_elements,
                    &ExportSettings::default(),
                );
                prop_assert!(again.valid);
                prop_assert_eq!(again.corrections().count(), 0);
            }
        }

        #[test]
        fn prop_validation_is_idempotent(
            starts in proptest::collection::vec(-5_000i64..50_000, 1..8),
            length in 1i64..4_000,
        ) {
            let elements: Vec<TimelineElement> = starts
                .iter()
                .enumerate()
                .map(|(i, s)| video(&format!("e{i}"), "t1", *s, *s + length))
                .collect();

            let first = validate_timeline(&[track("t1", 0)], &elements, &ExportSettings::default());
            let second = validate_timeline(
                &[track("t1", 0)],
                &first.corrected_elements,
                &ExportSettings::default(),
            );

            prop_assert_eq!(second.corrections().count(), 0);
            prop_assert_eq!(&second.corrected_elements, &first.corrected_elements);
        }
    }
}
