//! The world map engine service.
//!
//! One [`WorldmapEngine`] owns the registries, the visibility cache, the camera
//! controller, the clustering state and the chunk stream. It lives on a single
//! thread; asynchronous chunk passes interleave with feed updates only at their
//! explicit yield points, and never hold a registry borrow across one.

use std::{
    cell::{Cell, Ref, RefCell},
    rc::Rc,
    sync::Arc,
};

use bevy::math::Vec3;
use crossbeam_channel::Receiver;
use futures_lite::future::yield_now;
use worldmap_schema::{FeedEvent, MinimapMarker};

use crate::{
    assets::{AssetSlot, AssetState, AssetTracker},
    cache::{ChunkBatches, RenderCategory, VisibilityCache},
    camera::{CameraAnimation, CameraView, CameraViewController, ListenerId, ViewParameters},
    chunk::{ChunkGrid, ChunkKey},
    cluster::{ClusterEngine, ClusterRecord, ReclusterReason},
    config::WorldmapConfig,
    feed::{self, FeedEffect, FeedError, FeedStats},
    hex::{HexCoord, HexLayout},
    observer::{EngineObserver, TracingObserver},
    records::EntityKind,
    stream::{
        ChunkRenderPass, ChunkStreamCoordinator, PrefetchTracker, StreamError, StreamEvent,
        SwitchOutcome,
    },
    visible_set::{entity_instances, TileBatchBuilder, VisibleFrame},
    world::WorldState,
};

bitflags::bitflags! {
    /// Output layers that changed since the last [`WorldmapEngine::take_dirty`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DirtyLayers: u8 {
        const FRAME = 1 << 0;
        const ENTITIES = 1 << 1;
        const CLUSTERS = 1 << 2;
        const LABELS = 1 << 3;
    }
}

pub struct WorldmapEngine {
    config: Arc<WorldmapConfig>,
    grid: ChunkGrid,
    observer: Rc<dyn EngineObserver>,
    world: RefCell<WorldState>,
    cache: RefCell<VisibilityCache>,
    assets: RefCell<AssetTracker>,
    prefetch: RefCell<PrefetchTracker>,
    camera: RefCell<CameraViewController>,
    clusters: RefCell<ClusterEngine>,
    frame: RefCell<Option<Rc<VisibleFrame>>>,
    stats: RefCell<FeedStats>,
    stream: ChunkStreamCoordinator,
    dirty: Cell<DirtyLayers>,
    terrain_revision: Cell<u64>,
    reset_epoch: Cell<u64>,
    refresh_pending: Cell<bool>,
    zoom_span: Cell<f32>,
}

impl WorldmapEngine {
    pub fn new(config: Arc<WorldmapConfig>) -> Self {
        Self::with_observer(config, Rc::new(TracingObserver))
    }

    pub fn with_observer(config: Arc<WorldmapConfig>, observer: Rc<dyn EngineObserver>) -> Self {
        let grid = config.chunk.grid();
        let camera = CameraViewController::new(
            config.camera.clone(),
            HexLayout::new(config.chunk.hex_size),
        );
        let clusters = ClusterEngine::new(&config.cluster, config.local_owner());
        Self {
            grid,
            world: RefCell::new(WorldState::default()),
            cache: RefCell::new(VisibilityCache::new()),
            assets: RefCell::new(AssetTracker::all_ready()),
            prefetch: RefCell::new(PrefetchTracker::new()),
            camera: RefCell::new(camera),
            clusters: RefCell::new(clusters),
            frame: RefCell::new(None),
            stats: RefCell::new(FeedStats::default()),
            stream: ChunkStreamCoordinator::new(Rc::clone(&observer)),
            dirty: Cell::new(DirtyLayers::empty()),
            terrain_revision: Cell::new(0),
            reset_epoch: Cell::new(0),
            refresh_pending: Cell::new(false),
            zoom_span: Cell::new(config.zoom.clamp_span(config.zoom.default_range)),
            observer,
            config,
        }
    }

    /// Replaces the asset readiness table (all assets start ready).
    pub fn with_assets(self, assets: AssetTracker) -> Self {
        *self.assets.borrow_mut() = assets;
        self
    }

    pub fn config(&self) -> &WorldmapConfig {
        &self.config
    }

    pub fn grid(&self) -> &ChunkGrid {
        &self.grid
    }

    pub fn world(&self) -> Ref<'_, WorldState> {
        self.world.borrow()
    }

    pub fn stream(&self) -> &ChunkStreamCoordinator {
        &self.stream
    }

    pub fn current_chunk(&self) -> Option<ChunkKey> {
        self.stream.current()
    }

    pub fn frame(&self) -> Option<Rc<VisibleFrame>> {
        self.frame.borrow().clone()
    }

    pub fn stats(&self) -> FeedStats {
        self.stats.borrow().clone()
    }

    pub fn cached_chunks(&self) -> usize {
        self.cache.borrow().len()
    }

    pub fn is_cached(&self, key: ChunkKey) -> bool {
        self.cache.borrow().contains(key)
    }

    pub fn subscribe(&self) -> Receiver<StreamEvent> {
        self.stream.subscribe()
    }

    pub fn take_dirty(&self) -> DirtyLayers {
        self.dirty.replace(DirtyLayers::empty())
    }

    fn mark_dirty(&self, layers: DirtyLayers) {
        self.dirty.set(self.dirty.get() | layers);
    }

    // ---- feed -------------------------------------------------------------

    /// Applies one feed event and invalidates whatever it made stale.
    pub fn apply_event(&self, event: &FeedEvent) -> Result<FeedEffect, FeedError> {
        let applied = feed::apply_event(&mut self.world.borrow_mut(), event);
        let effect = match applied {
            Ok(effect) => effect,
            Err(err) => {
                self.observer.feed_rejected(&err);
                self.stats.borrow_mut().record_rejected(&err);
                return Err(err);
            }
        };
        self.stats.borrow_mut().record_applied(effect.kind);
        self.observer.feed_applied(effect.kind, &effect);

        if !effect.terrain_dirty.is_empty() {
            self.bump_terrain_revision();
            for hex in &effect.terrain_dirty {
                self.invalidate_around(self.grid.key_for_hex(*hex));
            }
        }

        if effect.kind == EntityKind::Structure && effect.count_changed {
            self.bump_terrain_revision();
            self.cache.borrow_mut().clear();
            self.observer.cache_cleared();
            self.refresh_pending.set(true);
        }

        if effect.force_refresh {
            if let Some(current) = self.stream.current() {
                self.invalidate_around(current);
            }
            self.refresh_pending.set(true);
        }

        if effect.kind != EntityKind::Tile && effect.changed() {
            self.mark_dirty(DirtyLayers::ENTITIES);
        }
        Ok(effect)
    }

    /// Applies a batch in arrival order. Rejected events do not stop the batch.
    pub fn apply_events<'a>(&self, events: impl IntoIterator<Item = &'a FeedEvent>) -> usize {
        events
            .into_iter()
            .filter(|event| self.apply_event(event).is_ok())
            .count()
    }

    fn bump_terrain_revision(&self) {
        self.terrain_revision.set(self.terrain_revision.get() + 1);
    }

    /// Drops the 3x3 neighbourhood of `center`; a stale current chunk is rebuilt on the next update.
    fn invalidate_around(&self, center: ChunkKey) {
        let removed = self.cache.borrow_mut().invalidate_neighbors(center, &self.grid);
        self.observer.cache_invalidated(center, removed);
        if let Some(current) = self.stream.current() {
            if self.grid.neighborhood(center).contains(&current) {
                self.refresh_pending.set(true);
            }
        }
    }

    /// Drops all world knowledge, e.g. after the feed reconnects.
    pub fn reset_map(&self) {
        self.world.borrow_mut().clear();
        self.cache.borrow_mut().clear();
        self.prefetch.borrow_mut().reset();
        self.clusters.borrow_mut().reset();
        *self.frame.borrow_mut() = None;
        self.reset_epoch.set(self.reset_epoch.get() + 1);
        self.bump_terrain_revision();
        self.refresh_pending.set(true);
        self.stream.reset();
        self.observer.cache_cleared();
        self.mark_dirty(DirtyLayers::all());
    }

    // ---- chunk streaming --------------------------------------------------

    /// Resolves the active chunk for `camera_target` and switches to it if needed.
    pub async fn update_visible_chunks(&self, camera_target: Vec3) -> SwitchOutcome {
        let key = self.grid.key_for_camera(camera_target);
        let force = self.refresh_pending.replace(false);
        let outcome = self.stream.request(self, key, force).await;
        if outcome == SwitchOutcome::Unchanged && self.dirty.get().contains(DirtyLayers::ENTITIES) {
            self.sync_entities();
        }
        outcome
    }

    /// Rebuilds the current chunk through the serialized queue.
    pub async fn refresh(&self) -> SwitchOutcome {
        self.refresh_pending.set(false);
        self.stream.request_refresh(self).await
    }

    /// Re-reads entity positions into the current frame without touching tiles.
    pub fn sync_entities(&self) {
        let Some(previous) = self.frame() else {
            return;
        };
        let frame = self.build_frame(previous.chunk, previous.tiles.clone(), previous.from_cache);
        *self.frame.borrow_mut() = Some(Rc::new(frame));
        self.dirty
            .set(self.dirty.get().difference(DirtyLayers::ENTITIES) | DirtyLayers::FRAME);
    }

    pub fn complete_prefetch(&self, key: ChunkKey, ok: bool) {
        self.prefetch.borrow_mut().complete(key, ok);
    }

    pub fn set_asset_state(&self, slot: AssetSlot, state: AssetState) {
        let was_ready = self.assets.borrow().is_ready(slot);
        self.assets.borrow_mut().set(slot, state);
        if state == AssetState::Ready && !was_ready {
            self.refresh_pending.set(true);
        }
    }

    fn plan_prefetch(&self, key: ChunkKey) {
        let prefetch = &self.config.prefetch;
        let mut wanted = self
            .grid
            .surrounding_keys(key, prefetch.rows(), prefetch.cols());
        if prefetch.include_covering {
            wanted.extend(self.grid.covering_chunks(key));
        }
        let planned = self.prefetch.borrow_mut().plan(wanted);
        self.observer.prefetch_planned(key, &planned);
        if !planned.is_empty() {
            self.stream.publish(StreamEvent::PrefetchRequested {
                center: key,
                keys: planned,
            });
        }
    }

    fn tile_assets_ready(&self) -> Result<(), StreamError> {
        let slot = AssetSlot::Tiles(RenderCategory::Outline);
        match self.assets.borrow().state(slot) {
            AssetState::Ready => Ok(()),
            AssetState::Loading => Err(StreamError::AssetsPending(slot)),
            AssetState::Failed => Err(StreamError::AssetsFailed(slot)),
        }
    }

    async fn build_tiles(&self, key: ChunkKey, epoch: u64) -> Result<ChunkBatches, StreamError> {
        self.tile_assets_ready()?;
        let revision = self.terrain_revision.get();
        let hexes: Vec<HexCoord> = self.grid.window_hexes(key).collect();
        let mut builder = TileBatchBuilder::new();
        for batch in hexes.chunks(self.config.render.tile_batch_size.max(1)) {
            {
                let world = self.world.borrow();
                for &hex in batch {
                    builder.push_hex(&world, &self.grid, &self.config.render, hex);
                }
            }
            yield_now().await;
            if self.reset_epoch.get() != epoch {
                return Err(StreamError::Interrupted(key));
            }
        }
        if self.terrain_revision.get() != revision {
            // terrain changed while building; show it but rebuild on the next update
            self.refresh_pending.set(true);
            return Ok(builder.finish());
        }
        let mut cache = self.cache.borrow_mut();
        cache.invalidate(key);
        let batches = builder
            .into_matrices()
            .into_iter()
            .map(|(category, matrices)| (category, cache.put(key, category, matrices)))
            .collect();
        Ok(batches)
    }

    fn cached_tiles(&self, key: ChunkKey) -> Option<ChunkBatches> {
        let cache = self.cache.borrow();
        if !cache.contains(key) {
            return None;
        }
        let batches = RenderCategory::all()
            .filter_map(|category| Some((category, cache.get(key, category)?)))
            .collect();
        Some(batches)
    }

    fn visible_tiles(&self, tiles: ChunkBatches) -> ChunkBatches {
        let assets = self.assets.borrow();
        tiles
            .into_iter()
            .filter(|(category, _)| {
                let slot = AssetSlot::Tiles(*category);
                let state = assets.state(slot);
                if state != AssetState::Ready {
                    self.observer.asset_unavailable(slot, state);
                }
                state == AssetState::Ready
            })
            .collect()
    }

    fn build_frame(&self, key: ChunkKey, tiles: ChunkBatches, from_cache: bool) -> VisibleFrame {
        let world = self.world.borrow();
        let assets = self.assets.borrow();
        let flat = self.config.render.flat;
        let visible = |kind: EntityKind| {
            let slot = AssetSlot::Entities(kind);
            let state = assets.state(slot);
            if state != AssetState::Ready {
                self.observer.asset_unavailable(slot, state);
            }
            state == AssetState::Ready
        };
        let mut frame = VisibleFrame {
            chunk: key,
            tiles,
            from_cache,
            ..VisibleFrame::default()
        };
        if visible(EntityKind::Army) {
            frame.armies = entity_instances(&world.armies, &self.grid, key, flat);
        }
        if visible(EntityKind::Structure) {
            frame.structures = entity_instances(&world.structures, &self.grid, key, flat);
        }
        if visible(EntityKind::Quest) {
            frame.quests = entity_instances(&world.quests, &self.grid, key, flat);
        }
        if visible(EntityKind::Chest) {
            frame.chests = entity_instances(&world.chests, &self.grid, key, flat);
        }
        frame
    }

    // ---- camera -----------------------------------------------------------

    pub fn camera_view(&self) -> CameraView {
        self.camera.borrow().view()
    }

    pub fn view_parameters(&self) -> ViewParameters {
        *self.camera.borrow().parameters()
    }

    pub fn camera_position(&self) -> (Vec3, Vec3) {
        let camera = self.camera.borrow();
        (camera.position(), camera.target())
    }

    pub fn change_view(&self, view: CameraView) -> ViewParameters {
        let mut camera = self.camera.borrow_mut();
        let from = camera.view();
        let params = camera.transition(view);
        drop(camera);
        self.observer.view_changed(from, view);
        self.mark_dirty(DirtyLayers::LABELS);
        params
    }

    pub fn move_center(&self, hex: HexCoord) -> CameraAnimation {
        self.camera
            .borrow_mut()
            .move_center(hex, self.config.render.flat)
    }

    pub fn camera_animating(&self) -> bool {
        self.camera.borrow().animation().is_some()
    }

    pub fn advance_camera(&self, dt: f32) -> bool {
        self.camera.borrow_mut().advance(dt)
    }

    /// Listeners must not call back into the engine's camera methods.
    pub fn add_view_listener(&self, listener: impl FnMut(CameraView) + 'static) -> ListenerId {
        self.camera.borrow_mut().add_listener(listener)
    }

    pub fn remove_view_listener(&self, id: ListenerId) -> bool {
        self.camera.borrow_mut().remove_listener(id)
    }

    pub fn expand_labels_temporarily(&self) -> bool {
        self.camera.borrow_mut().expand_labels_temporarily()
    }

    // ---- minimap ----------------------------------------------------------

    pub fn zoom_span(&self) -> f32 {
        self.zoom_span.get()
    }

    pub fn set_zoom_span(&self, span: f32) {
        self.zoom_span.set(self.config.zoom.clamp_span(span));
    }

    pub fn zoom_ratio(&self) -> f32 {
        self.config.zoom.zoom_ratio(self.zoom_span.get())
    }

    pub fn cluster_radius(&self) -> u32 {
        self.clusters.borrow().radius()
    }

    /// Reclusters when the zoom moved enough, after a chunk commit, or on a random sample.
    pub fn tick_clusters(&self) -> Option<ReclusterReason> {
        let world = self.world.borrow();
        let mut clusters = self.clusters.borrow_mut();
        let reason = clusters.tick(&world, self.zoom_ratio())?;
        self.observer
            .reclustered(reason, clusters.radius(), clusters.clusters().len());
        self.mark_dirty(DirtyLayers::CLUSTERS);
        Some(reason)
    }

    pub fn clusters(&self) -> Vec<ClusterRecord> {
        self.clusters.borrow().clusters().to_vec()
    }

    pub fn minimap_markers(&self) -> Vec<MinimapMarker> {
        self.clusters.borrow().markers()
    }
}

impl ChunkRenderPass for WorldmapEngine {
    async fn render_chunk(&self, key: ChunkKey) -> Result<(), StreamError> {
        let epoch = self.reset_epoch.get();
        self.plan_prefetch(key);

        let cached = self.cached_tiles(key);
        self.observer.cache_lookup(key, cached.is_some());
        let built = match cached {
            Some(batches) => Ok((batches, true)),
            None => self.build_tiles(key, epoch).await.map(|batches| (batches, false)),
        };

        let (tiles, from_cache, result) = match built {
            Ok((batches, from_cache)) => (self.visible_tiles(batches), from_cache, Ok(())),
            Err(StreamError::Interrupted(key)) => return Err(StreamError::Interrupted(key)),
            Err(err) => (ChunkBatches::new(), false, Err(err)),
        };

        let frame = self.build_frame(key, tiles, from_cache);
        *self.frame.borrow_mut() = Some(Rc::new(frame));
        self.clusters.borrow_mut().mark_dirty();
        self.dirty.set(
            self.dirty.get().difference(DirtyLayers::ENTITIES)
                | DirtyLayers::FRAME
                | DirtyLayers::LABELS,
        );
        result
    }
}
