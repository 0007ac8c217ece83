use std::{future::Future, pin::Pin, rc::Rc, sync::Arc};

use bevy::prelude::*;
use crossbeam_channel::{unbounded, Receiver, Sender};
use futures_lite::future::{block_on, poll_once};
use worldmap_schema::{FeedEvent, MinimapMarker};

use crate::{
    assets::AssetTracker,
    chunk::ChunkKey,
    config::{WorldmapConfig, WorldmapConfigHandle},
    engine::{DirtyLayers, WorldmapEngine},
    stream::{StreamEvent, SwitchOutcome},
};

/// Messages accepted from the live feed connection.
#[derive(Debug, Clone)]
pub enum FeedMessage {
    Event(FeedEvent),
    /// The connection was re-established; everything known so far is stale.
    Reset,
}

/// Main-thread handle to the engine. Inserted as a non-send resource.
pub struct WorldmapHandle(pub Rc<WorldmapEngine>);

type SwitchFuture = Pin<Box<dyn Future<Output = SwitchOutcome>>>;

/// Chunk switch futures that are still waiting on a render pass.
#[derive(Default)]
pub struct SwitchDriver {
    in_flight: Vec<SwitchFuture>,
    last_requested: Option<ChunkKey>,
    last_outcome: Option<SwitchOutcome>,
}

impl SwitchDriver {
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    pub fn last_outcome(&self) -> Option<SwitchOutcome> {
        self.last_outcome
    }
}

#[derive(Resource)]
pub struct FeedInbox(pub Receiver<FeedMessage>);

/// Cloneable producer side of [`FeedInbox`].
#[derive(Resource, Clone)]
pub struct FeedSender(pub Sender<FeedMessage>);

#[derive(Resource)]
pub struct StreamEvents(pub Receiver<StreamEvent>);

/// World-space point the main camera looks at.
#[derive(Resource, Debug, Clone, Copy, Default)]
pub struct CameraTarget(pub Vec3);

/// Visible span of the minimap in world units.
#[derive(Resource, Debug, Clone, Copy)]
pub struct MinimapZoom(pub f32);

#[derive(Resource, Debug, Clone, Default)]
pub struct MinimapClusters {
    pub radius: u32,
    pub markers: Vec<MinimapMarker>,
}

#[derive(Resource, Debug, Clone, Default, PartialEq, Eq)]
pub struct VisibleSummary {
    pub chunk: Option<ChunkKey>,
    pub tiles: usize,
    pub armies: usize,
    pub structures: usize,
    pub quests: usize,
    pub chests: usize,
    pub from_cache: bool,
    pub commits: u64,
    pub prefetch_requests: u64,
}

pub struct WorldmapPlugin {
    pub config: Arc<WorldmapConfig>,
    pub assets: AssetTracker,
}

impl WorldmapPlugin {
    pub fn new(config: Arc<WorldmapConfig>) -> Self {
        Self {
            config,
            assets: AssetTracker::all_ready(),
        }
    }
}

impl Plugin for WorldmapPlugin {
    fn build(&self, app: &mut App) {
        let engine = WorldmapEngine::new(Arc::clone(&self.config)).with_assets(self.assets.clone());
        let stream_events = engine.subscribe();
        let zoom = engine.zoom_span();
        let (tx, rx) = unbounded();

        app.insert_resource(WorldmapConfigHandle::new(Arc::clone(&self.config)))
            .insert_resource(FeedInbox(rx))
            .insert_resource(FeedSender(tx))
            .insert_resource(StreamEvents(stream_events))
            .insert_resource(CameraTarget::default())
            .insert_resource(MinimapZoom(zoom))
            .insert_resource(MinimapClusters::default())
            .insert_resource(VisibleSummary::default())
            .insert_non_send_resource(WorldmapHandle(Rc::new(engine)))
            .insert_non_send_resource(SwitchDriver::default())
            .add_systems(
                Update,
                (
                    ingest_feed,
                    animate_camera,
                    drive_chunk_stream,
                    track_stream_events,
                    update_minimap,
                    publish_visible_summary,
                )
                    .chain(),
            );
    }
}

pub fn ingest_feed(handle: NonSend<WorldmapHandle>, inbox: Res<FeedInbox>) {
    let engine = &handle.0;
    let mut applied = 0usize;
    let mut rejected = 0usize;
    for message in inbox.0.try_iter() {
        match message {
            FeedMessage::Event(event) => match engine.apply_event(&event) {
                Ok(_) => applied += 1,
                Err(_) => rejected += 1,
            },
            FeedMessage::Reset => {
                tracing::info!(target: "worldmap::feed", "feed.reset");
                engine.reset_map();
            }
        }
    }
    if applied + rejected > 0 {
        tracing::debug!(
            target: "worldmap::feed",
            applied,
            rejected,
            "feed.drained"
        );
    }
}

pub fn animate_camera(
    handle: NonSend<WorldmapHandle>,
    time: Res<Time>,
    mut target: ResMut<CameraTarget>,
) {
    let engine = &handle.0;
    if !engine.camera_animating() {
        return;
    }
    engine.advance_camera(time.delta_seconds());
    target.0 = engine.camera_position().1;
}

/// Starts a switch for the camera's chunk and polls every pending switch once.
pub fn drive_chunk_stream(
    handle: NonSend<WorldmapHandle>,
    mut driver: NonSendMut<SwitchDriver>,
    target: Res<CameraTarget>,
) {
    let engine = &handle.0;
    let key = engine.grid().key_for_camera(target.0);
    if driver.in_flight.is_empty() || driver.last_requested != Some(key) {
        let engine = Rc::clone(engine);
        let camera_target = target.0;
        driver.in_flight.push(Box::pin(async move {
            engine.update_visible_chunks(camera_target).await
        }));
        driver.last_requested = Some(key);
    }

    let mut settled = Vec::new();
    driver
        .in_flight
        .retain_mut(|switch| match block_on(poll_once(switch.as_mut())) {
            Some(outcome) => {
                settled.push(outcome);
                false
            }
            None => true,
        });
    for outcome in settled {
        if let SwitchOutcome::Committed { key, passes } = outcome {
            tracing::debug!(
                target: "worldmap::stream",
                chunk = %key,
                passes,
                "chunk_switch.settled"
            );
        }
        driver.last_outcome = Some(outcome);
    }
}

/// Counts commits and acknowledges prefetch requests. The headless app has every
/// chunk locally, so each request completes immediately.
pub fn track_stream_events(
    handle: NonSend<WorldmapHandle>,
    events: Res<StreamEvents>,
    mut summary: ResMut<VisibleSummary>,
) {
    for event in events.0.try_iter() {
        match event {
            StreamEvent::Committed { .. } => summary.commits += 1,
            StreamEvent::PrefetchRequested { keys, .. } => {
                summary.prefetch_requests += keys.len() as u64;
                for key in keys {
                    handle.0.complete_prefetch(key, true);
                }
            }
            StreamEvent::Reset => {}
        }
    }
}

pub fn update_minimap(
    handle: NonSend<WorldmapHandle>,
    zoom: Res<MinimapZoom>,
    mut clusters: ResMut<MinimapClusters>,
) {
    let engine = &handle.0;
    if zoom.is_changed() {
        engine.set_zoom_span(zoom.0);
    }
    if engine.tick_clusters().is_some() {
        clusters.radius = engine.cluster_radius();
        clusters.markers = engine.minimap_markers();
    }
}

pub fn publish_visible_summary(
    handle: NonSend<WorldmapHandle>,
    mut summary: ResMut<VisibleSummary>,
) {
    let engine = &handle.0;
    let dirty = engine.take_dirty();
    if dirty.contains(DirtyLayers::FRAME) || summary.chunk != engine.current_chunk() {
        match engine.frame() {
            Some(frame) => {
                summary.chunk = Some(frame.chunk);
                summary.tiles = frame.tile_count();
                summary.armies = frame.armies.len();
                summary.structures = frame.structures.len();
                summary.quests = frame.quests.len();
                summary.chests = frame.chests.len();
                summary.from_cache = frame.from_cache;
            }
            None => {
                let commits = summary.commits;
                let prefetch_requests = summary.prefetch_requests;
                *summary = VisibleSummary {
                    commits,
                    prefetch_requests,
                    ..VisibleSummary::default()
                };
            }
        }
    }
}
