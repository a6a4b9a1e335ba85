//! Builders shared by unit, integration and web tests.

use std::sync::Arc;

use tempfile::TempDir;

use crate::assets::StaticAssetCatalog;
use crate::config::CutroomConfig;
use crate::export::ExportOrchestrator;
use crate::render::Renderer;
use crate::timeline::{
    ElementKind, ElementProperties, ExternalAsset, TimelineElement, Track, TrackKind,
};

pub fn track(id: &str, index: i32, kind: TrackKind) -> Track {
    Track {
        id: id.to_string(),
        index,
        kind,
        name: Some(format!("Track {index}")),
    }
}

fn element(id: &str, kind: ElementKind, track_id: &str, start: i64, end: i64) -> TimelineElement {
    TimelineElement {
        id: id.to_string(),
        kind,
        track_id: track_id.to_string(),
        timeline_start_ms: start,
        timeline_end_ms: end,
        source_start_ms: None,
        source_end_ms: None,
        asset_id: None,
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

/// Media element fetched from `url`.
pub fn media_element(
    id: &str,
    kind: ElementKind,
    track_id: &str,
    start: i64,
    end: i64,
    url: &str,
) -> TimelineElement {
    let mut element = element(id, kind, track_id, start, end);
    element.external_asset = Some(ExternalAsset {
        url: url.to_string(),
        platform: None,
    });
    element
}

/// Media element referencing the asset library.
pub fn library_element(
    id: &str,
    kind: ElementKind,
    track_id: &str,
    start: i64,
    end: i64,
    asset_id: &str,
) -> TimelineElement {
    let mut element = element(id, kind, track_id, start, end);
    element.asset_id = Some(asset_id.to_string());
    element
}

pub fn text_element(id: &str, track_id: &str, start: i64, end: i64, body: &str) -> TimelineElement {
    let mut element = element(id, ElementKind::Text, track_id, start, end);
    element.text = Some(body.to_string());
    element
}

/// Temporary work and output directories with a matching configuration.
pub struct TestEnvironment {
    pub dir: TempDir,
    pub config: CutroomConfig,
}

impl TestEnvironment {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let mut config = CutroomConfig::for_testing();
        config.storage.work_dir = dir.path().join("work");
        config.storage.output_dir = dir.path().join("exports");
        config.storage.public_base_url = "http://cutroom.test".to_string();
        config.storage.asset_base_url = Some("http://127.0.0.1:9/assets".to_string());
        Self { dir, config }
    }

    /// Orchestrator with a passthrough catalog over this environment's config.
    pub fn orchestrator(&self, renderer: impl Renderer + 'static) -> ExportOrchestrator {
        self.orchestrator_with(Arc::new(renderer), StaticAssetCatalog::passthrough())
    }

    pub fn orchestrator_with(
        &self,
        renderer: Arc<dyn Renderer>,
        catalog: StaticAssetCatalog,
    ) -> ExportOrchestrator {
        ExportOrchestrator::from_config(self.config.clone(), renderer, Arc::new(catalog))
            .expect("build orchestrator")
    }
}
