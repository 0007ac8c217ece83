//! Construction-time configuration for the world map engine.
//!
//! Loaded from `worldmap_config.json` with support for a `WORLDMAP_CONFIG_PATH`
//! override. Every section falls back to its defaults when omitted.

use std::{
    env, fs, io,
    ops::RangeInclusive,
    path::{Path, PathBuf},
    sync::Arc,
};

use bevy::prelude::Resource;
use serde::Deserialize;
use thiserror::Error;

use crate::{
    camera::{CameraView, ShadowBounds},
    chunk::{ChunkGrid, RenderChunkSize},
    cluster::ClusterStrategy,
    hex::HexLayout,
    records::{EntityKind, OwnerId},
};

pub const BUILTIN_WORLDMAP_CONFIG: &str = include_str!("data/worldmap_config.json");
pub const CONFIG_PATH_ENV: &str = "WORLDMAP_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorldmapConfig {
    pub chunk: ChunkConfig,
    pub prefetch: PrefetchConfig,
    pub cluster: ClusterConfig,
    pub zoom: ZoomConfig,
    pub camera: CameraConfig,
    pub render: RenderConfig,
    /// Owner id of the local player; clusters owned by it are flagged `is_mine`.
    pub local_player: Option<u64>,
}

impl WorldmapConfig {
    pub fn builtin() -> Arc<Self> {
        Arc::new(
            serde_json::from_str(BUILTIN_WORLDMAP_CONFIG)
                .expect("builtin worldmap config should parse"),
        )
    }

    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: WorldmapConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        WorldmapConfig::from_json_str(&contents)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk.chunk_size == 0 {
            return Err(ConfigError::Invalid("chunk.chunk_size must be positive".into()));
        }
        if !(self.chunk.hex_size > 0.0) {
            return Err(ConfigError::Invalid("chunk.hex_size must be positive".into()));
        }
        if self.cluster.min_radius > self.cluster.max_radius {
            return Err(ConfigError::Invalid(
                "cluster.min_radius exceeds cluster.max_radius".into(),
            ));
        }
        if !(self.zoom.max_range > self.zoom.min_range) {
            return Err(ConfigError::Invalid(
                "zoom.max_range must exceed zoom.min_range".into(),
            ));
        }
        if !(0.0..=1.0).contains(&self.cluster.sample_probability) {
            return Err(ConfigError::Invalid(
                "cluster.sample_probability must be within [0, 1]".into(),
            ));
        }
        if self.prefetch.row_min > self.prefetch.row_max
            || self.prefetch.col_min > self.prefetch.col_max
        {
            return Err(ConfigError::Invalid("prefetch ranges are empty".into()));
        }
        Ok(())
    }

    pub fn local_owner(&self) -> Option<OwnerId> {
        self.local_player.map(OwnerId)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChunkConfig {
    pub chunk_size: u32,
    pub render_chunk_size: RenderChunkSize,
    pub hex_size: f32,
    pub camera_lead_x: f32,
    pub camera_lead_z: f32,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8,
            render_chunk_size: RenderChunkSize::default(),
            hex_size: 1.0,
            camera_lead_x: 0.5,
            camera_lead_z: 0.5,
        }
    }
}

impl ChunkConfig {
    pub fn grid(&self) -> ChunkGrid {
        ChunkGrid::new(
            self.chunk_size,
            self.render_chunk_size,
            HexLayout::new(self.hex_size),
        )
        .with_camera_lead(self.camera_lead_x, self.camera_lead_z)
    }
}

/// Chunk-step offsets fetched around the active chunk.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PrefetchConfig {
    pub row_min: i32,
    pub row_max: i32,
    pub col_min: i32,
    pub col_max: i32,
    pub include_covering: bool,
}

impl Default for PrefetchConfig {
    fn default() -> Self {
        Self {
            row_min: -2,
            row_max: 1,
            col_min: -1,
            col_max: 1,
            include_covering: true,
        }
    }
}

impl PrefetchConfig {
    pub fn rows(&self) -> RangeInclusive<i32> {
        self.row_min..=self.row_max
    }

    pub fn cols(&self) -> RangeInclusive<i32> {
        self.col_min..=self.col_max
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub min_radius: u32,
    pub max_radius: u32,
    pub hysteresis: f32,
    pub sample_probability: f64,
    pub seed: u64,
    pub strategies: ClusterStrategies,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_radius: 1,
            max_radius: 8,
            hysteresis: 0.1,
            sample_probability: 0.1,
            seed: 0x5EED_CAFE,
            strategies: ClusterStrategies::default(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ClusterStrategies {
    pub army: ClusterStrategy,
    pub structure: ClusterStrategy,
    pub quest: ClusterStrategy,
    pub chest: ClusterStrategy,
}

impl ClusterStrategies {
    pub fn for_kind(&self, kind: EntityKind) -> ClusterStrategy {
        match kind {
            EntityKind::Army => self.army,
            EntityKind::Structure => self.structure,
            EntityKind::Quest => self.quest,
            EntityKind::Chest | EntityKind::Tile => self.chest,
        }
    }
}

/// Minimap view span bounds, in world units across.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ZoomConfig {
    pub min_range: f32,
    pub max_range: f32,
    pub default_range: f32,
}

impl Default for ZoomConfig {
    fn default() -> Self {
        Self {
            min_range: 75.0,
            max_range: 900.0,
            default_range: 200.0,
        }
    }
}

impl ZoomConfig {
    /// 0 when fully zoomed in, 1 when fully zoomed out.
    pub fn zoom_ratio(&self, span: f32) -> f32 {
        ((span - self.min_range) / (self.max_range - self.min_range)).clamp(0.0, 1.0)
    }

    pub fn clamp_span(&self, span: f32) -> f32 {
        span.clamp(self.min_range, self.max_range)
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct ViewPreset {
    pub distance: f32,
    pub angle_degrees: f32,
    pub shadows: bool,
}

impl Default for ViewPreset {
    fn default() -> Self {
        Self {
            distance: 20.0,
            angle_degrees: 60.0,
            shadows: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    pub initial_view: CameraView,
    pub close: ViewPreset,
    pub medium: ViewPreset,
    pub far: ViewPreset,
    pub transition_base_secs: f32,
    pub transition_step_secs: f32,
    pub move_duration_secs: f32,
    pub outline_opacity_near: f32,
    pub outline_opacity_far: f32,
    /// Shadow frustum at `shadow_reference_distance`; scaled linearly with distance.
    pub shadow: ShadowBounds,
    pub shadow_reference_distance: f32,
    pub near_clip: f32,
    pub far_clip_factor: f32,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            initial_view: CameraView::Medium,
            close: ViewPreset {
                distance: 10.0,
                angle_degrees: 30.0,
                shadows: true,
            },
            medium: ViewPreset::default(),
            far: ViewPreset {
                distance: 40.0,
                angle_degrees: 50.0,
                shadows: false,
            },
            transition_base_secs: 0.6,
            transition_step_secs: 0.4,
            move_duration_secs: 2.0,
            outline_opacity_near: 1.0,
            outline_opacity_far: 0.3,
            shadow: ShadowBounds::default(),
            shadow_reference_distance: 20.0,
            near_clip: 0.1,
            far_clip_factor: 30.0,
        }
    }
}

impl CameraConfig {
    pub fn preset(&self, view: CameraView) -> ViewPreset {
        match view {
            CameraView::Close => self.close,
            CameraView::Medium => self.medium,
            CameraView::Far => self.far,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RenderConfig {
    pub tile_batch_size: usize,
    pub flat: bool,
    pub explored_lift: f32,
    pub outline_height: f32,
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            tile_batch_size: 600,
            flat: true,
            explored_lift: 0.05,
            outline_height: 0.01,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse worldmap config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read worldmap config from {path:?}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid worldmap config: {0}")]
    Invalid(String),
}

#[derive(Resource, Debug, Clone)]
pub struct WorldmapConfigHandle(pub Arc<WorldmapConfig>);

impl WorldmapConfigHandle {
    pub fn new(config: Arc<WorldmapConfig>) -> Self {
        Self(config)
    }

    pub fn get(&self) -> Arc<WorldmapConfig> {
        Arc::clone(&self.0)
    }
}

/// Where the active configuration came from; `None` means the built-in copy.
#[derive(Resource, Debug, Clone, Default)]
pub struct WorldmapConfigMetadata {
    path: Option<PathBuf>,
}

impl WorldmapConfigMetadata {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    pub fn path(&self) -> Option<&PathBuf> {
        self.path.as_ref()
    }
}

/// Load the worldmap configuration from the environment override or the default path.
pub fn load_worldmap_config_from_env() -> (Arc<WorldmapConfig>, WorldmapConfigMetadata) {
    let override_path = env::var(CONFIG_PATH_ENV).ok().map(PathBuf::from);
    let default_path =
        PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("src/data/worldmap_config.json");

    let candidates: Vec<PathBuf> = match override_path {
        Some(ref path) => vec![path.clone()],
        None => vec![default_path],
    };

    for path in candidates {
        match WorldmapConfig::from_file(&path) {
            Ok(config) => {
                tracing::info!(
                    target: "worldmap::config",
                    path = %path.display(),
                    "worldmap_config.loaded=file"
                );
                return (Arc::new(config), WorldmapConfigMetadata::new(Some(path)));
            }
            Err(err) => {
                tracing::warn!(
                    target: "worldmap::config",
                    path = %path.display(),
                    error = %err,
                    "worldmap_config.load_failed"
                );
            }
        }
    }

    let config = WorldmapConfig::builtin();
    tracing::info!(target: "worldmap::config", "worldmap_config.loaded=builtin");
    (config, WorldmapConfigMetadata::new(None))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_config_parses() {
        let config = WorldmapConfig::builtin();
        config.validate().unwrap();
        assert_eq!(config.chunk.chunk_size, 8);
        assert_eq!(config.chunk.render_chunk_size.width, 60);
        assert_eq!(config.cluster.max_radius, 8);
        assert_eq!(config.render.tile_batch_size, 600);
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config = WorldmapConfig::from_json_str(r#"{"chunk": {"chunk_size": 10}}"#).unwrap();
        assert_eq!(config.chunk.chunk_size, 10);
        assert_eq!(config.chunk.render_chunk_size.height, 44);
        assert_eq!(config.prefetch.rows(), -2..=1);
        assert_eq!(config.camera.initial_view, CameraView::Medium);
        assert!(config.local_player.is_none());
    }

    #[test]
    fn strategies_parse_per_kind() {
        let config = WorldmapConfig::from_json_str(
            r#"{"cluster": {"strategies": {"structure": "brute_force"}}}"#,
        )
        .unwrap();
        assert_eq!(
            config.cluster.strategies.for_kind(EntityKind::Structure),
            ClusterStrategy::BruteForce
        );
        assert_eq!(
            config.cluster.strategies.for_kind(EntityKind::Army),
            ClusterStrategy::Bucketed
        );
    }

    #[test]
    fn inverted_radius_bounds_are_rejected() {
        let err = WorldmapConfig::from_json_str(
            r#"{"cluster": {"min_radius": 9, "max_radius": 2}}"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn zoom_ratio_is_clamped() {
        let zoom = ZoomConfig::default();
        assert_eq!(zoom.zoom_ratio(75.0), 0.0);
        assert_eq!(zoom.zoom_ratio(10.0), 0.0);
        assert_eq!(zoom.zoom_ratio(900.0), 1.0);
        assert_eq!(zoom.zoom_ratio(5000.0), 1.0);
        assert!((zoom.zoom_ratio(487.5) - 0.5).abs() < 1e-6);
    }
}
