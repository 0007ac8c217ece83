//! Hex world map engine for a live strategy game client.
//!
//! Tracks live entity positions on an unbounded hex grid, streams the visible
//! chunk window around the camera, caches per-chunk instance buffers, and
//! clusters entities for the minimap. [`build_headless_app`] wires everything
//! into a Bevy [`App`] that is advanced one frame per [`run_frame`].

pub mod assets;
pub mod cache;
pub mod camera;
pub mod chunk;
pub mod cluster;
pub mod config;
pub mod engine;
pub mod feed;
pub mod hex;
pub mod observer;
pub mod records;
pub mod registry;
pub mod stream;
mod systems;
pub mod visible_set;
pub mod world;

use bevy::prelude::*;

pub use assets::{AssetSlot, AssetState, AssetTracker};
pub use cache::{CachedBatch, ChunkBatches, RenderCategory, VisibilityCache};
pub use camera::{CameraAnimation, CameraView, CameraViewController, ListenerId, ViewParameters};
pub use chunk::{ChunkGrid, ChunkKey, ChunkKeyParseError, RenderChunkSize};
pub use cluster::{ClusterEngine, ClusterInput, ClusterRecord, ClusterStrategy, ReclusterReason};
pub use config::{
    load_worldmap_config_from_env, ConfigError, WorldmapConfig, WorldmapConfigHandle,
    WorldmapConfigMetadata,
};
pub use engine::{DirtyLayers, WorldmapEngine};
pub use feed::{read_feed, FeedChange, FeedEffect, FeedError, FeedStats};
pub use hex::{CoordinateRangeError, HexCoord, HexLayout, WORLD_CENTER};
pub use observer::{EngineObserver, NoopObserver, RecordingObserver, TracingObserver};
pub use records::{EntityId, EntityKind, OwnerId};
pub use registry::{EntityRecord, EntityRegistry, UpsertOutcome};
pub use stream::{
    ChunkRenderPass, ChunkStreamCoordinator, PrefetchTracker, StreamError, StreamEvent,
    SwitchOutcome, SwitchState,
};
pub use systems::{
    CameraTarget, FeedInbox, FeedMessage, FeedSender, MinimapClusters, MinimapZoom,
    StreamEvents, SwitchDriver, VisibleSummary, WorldmapHandle, WorldmapPlugin,
};
pub use visible_set::{VisibleFrame, VisibleInstance};
pub use world::WorldState;

/// Construct a headless Bevy [`App`] running the world map pipeline.
///
/// Configuration comes from `WORLDMAP_CONFIG_PATH` when set, otherwise the
/// bundled defaults.
pub fn build_headless_app() -> App {
    let (config, metadata) = load_worldmap_config_from_env();
    let mut app = App::new();
    app.insert_resource(metadata)
        .add_plugins(MinimalPlugins)
        .add_plugins(WorldmapPlugin::new(config));
    app
}

/// Advance one frame: drain the feed, drive the chunk stream, then recluster.
pub fn run_frame(app: &mut App) {
    app.update();
}
