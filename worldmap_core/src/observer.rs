//! Observability hooks for the engine.
//!
//! The spatial code never logs on its own; it reports through an injected
//! [`EngineObserver`]. [`TracingObserver`] forwards to `tracing`, and
//! [`RecordingObserver`] keeps a plain event log for tests.

use std::cell::RefCell;

use crate::{
    assets::{AssetSlot, AssetState},
    camera::CameraView,
    chunk::ChunkKey,
    cluster::ReclusterReason,
    feed::{FeedEffect, FeedError},
    records::EntityKind,
    stream::StreamError,
};

pub trait EngineObserver {
    fn chunk_switch_queued(&self, _key: ChunkKey) {}
    fn chunk_switch_committed(&self, _key: ChunkKey, _ok: bool) {}
    fn chunk_render_failed(&self, _key: ChunkKey, _error: &StreamError) {}
    fn cache_lookup(&self, _key: ChunkKey, _hit: bool) {}
    fn cache_invalidated(&self, _center: ChunkKey, _removed: usize) {}
    fn cache_cleared(&self) {}
    fn asset_unavailable(&self, _slot: AssetSlot, _state: AssetState) {}
    fn prefetch_planned(&self, _center: ChunkKey, _keys: &[ChunkKey]) {}
    fn feed_applied(&self, _kind: EntityKind, _effect: &FeedEffect) {}
    fn feed_rejected(&self, _error: &FeedError) {}
    fn view_changed(&self, _from: CameraView, _to: CameraView) {}
    fn reclustered(&self, _reason: ReclusterReason, _radius: u32, _clusters: usize) {}
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

impl EngineObserver for NoopObserver {}

#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl EngineObserver for TracingObserver {
    fn chunk_switch_queued(&self, key: ChunkKey) {
        tracing::debug!(target: "worldmap::stream", chunk = %key, "chunk_switch.queued");
    }

    fn chunk_switch_committed(&self, key: ChunkKey, ok: bool) {
        tracing::debug!(target: "worldmap::stream", chunk = %key, ok, "chunk_switch.committed");
    }

    fn chunk_render_failed(&self, key: ChunkKey, error: &StreamError) {
        tracing::warn!(
            target: "worldmap::stream",
            chunk = %key,
            error = %error,
            "chunk_switch.render_failed"
        );
    }

    fn cache_lookup(&self, key: ChunkKey, hit: bool) {
        tracing::trace!(target: "worldmap::cache", chunk = %key, hit, "cache.lookup");
    }

    fn cache_invalidated(&self, center: ChunkKey, removed: usize) {
        tracing::debug!(
            target: "worldmap::cache",
            center = %center,
            removed,
            "cache.invalidate_neighbors"
        );
    }

    fn cache_cleared(&self) {
        tracing::debug!(target: "worldmap::cache", "cache.cleared");
    }

    fn asset_unavailable(&self, slot: AssetSlot, state: AssetState) {
        tracing::debug!(
            target: "worldmap::stream",
            slot = ?slot,
            state = ?state,
            "assets.unavailable"
        );
    }

    fn prefetch_planned(&self, center: ChunkKey, keys: &[ChunkKey]) {
        if keys.is_empty() {
            return;
        }
        tracing::debug!(
            target: "worldmap::stream",
            center = %center,
            count = keys.len(),
            "prefetch.planned"
        );
    }

    fn feed_applied(&self, kind: EntityKind, effect: &FeedEffect) {
        tracing::trace!(target: "worldmap::feed", kind = %kind, effect = ?effect, "feed.applied");
    }

    fn feed_rejected(&self, error: &FeedError) {
        tracing::warn!(target: "worldmap::feed", error = %error, "feed.rejected");
    }

    fn view_changed(&self, from: CameraView, to: CameraView) {
        tracing::info!(target: "worldmap::camera", from = ?from, to = ?to, "camera.view_changed");
    }

    fn reclustered(&self, reason: ReclusterReason, radius: u32, clusters: usize) {
        tracing::debug!(
            target: "worldmap::cluster",
            reason = ?reason,
            radius,
            clusters,
            "cluster.recomputed"
        );
    }
}

/// Keeps a one-line description of every callback.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<String>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.events
            .borrow()
            .iter()
            .filter(|event| event.starts_with(prefix))
            .count()
    }

    fn push(&self, event: String) {
        self.events.borrow_mut().push(event);
    }
}

impl EngineObserver for RecordingObserver {
    fn chunk_switch_queued(&self, key: ChunkKey) {
        self.push(format!("chunk_switch.queued {key}"));
    }

    fn chunk_switch_committed(&self, key: ChunkKey, ok: bool) {
        self.push(format!("chunk_switch.committed {key} ok={ok}"));
    }

    fn chunk_render_failed(&self, key: ChunkKey, error: &StreamError) {
        self.push(format!("chunk_switch.render_failed {key} {error}"));
    }

    fn cache_lookup(&self, key: ChunkKey, hit: bool) {
        self.push(format!("cache.lookup {key} hit={hit}"));
    }

    fn cache_invalidated(&self, center: ChunkKey, removed: usize) {
        self.push(format!("cache.invalidate_neighbors {center} removed={removed}"));
    }

    fn cache_cleared(&self) {
        self.push("cache.cleared".to_string());
    }

    fn asset_unavailable(&self, slot: AssetSlot, state: AssetState) {
        self.push(format!("assets.unavailable {slot:?} {state:?}"));
    }

    fn prefetch_planned(&self, center: ChunkKey, keys: &[ChunkKey]) {
        self.push(format!("prefetch.planned {center} count={}", keys.len()));
    }

    fn feed_applied(&self, kind: EntityKind, effect: &FeedEffect) {
        self.push(format!("feed.applied {kind} {effect:?}"));
    }

    fn feed_rejected(&self, error: &FeedError) {
        self.push(format!("feed.rejected {error}"));
    }

    fn view_changed(&self, from: CameraView, to: CameraView) {
        self.push(format!("camera.view_changed {from:?}->{to:?}"));
    }

    fn reclustered(&self, reason: ReclusterReason, radius: u32, clusters: usize) {
        self.push(format!(
            "cluster.recomputed {reason:?} radius={radius} clusters={clusters}"
        ));
    }
}
