//! Per-chunk snapshots of built tile instance buffers.
//!
//! Buffers are handed out as shared `Arc<[Mat4]>` slices; the cache is the only
//! writer and replaces whole buffers through [`VisibilityCache::put`].

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use bevy::math::Mat4;
use worldmap_schema::Biome;

use crate::chunk::{ChunkGrid, ChunkKey};

/// Instanced-mesh bucket a tile is drawn in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum RenderCategory {
    Biome(Biome),
    Outline,
}

impl RenderCategory {
    pub fn all() -> impl Iterator<Item = RenderCategory> {
        Biome::ALL
            .into_iter()
            .map(RenderCategory::Biome)
            .chain([RenderCategory::Outline])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CachedBatch {
    pub matrices: Arc<[Mat4]>,
    pub count: usize,
}

impl CachedBatch {
    pub fn new(matrices: Vec<Mat4>) -> Self {
        let count = matrices.len();
        Self {
            matrices: matrices.into(),
            count,
        }
    }
}

pub type ChunkBatches = BTreeMap<RenderCategory, CachedBatch>;

#[derive(Debug, Default)]
pub struct VisibilityCache {
    chunks: HashMap<ChunkKey, ChunkBatches>,
}

impl VisibilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: ChunkKey, category: RenderCategory) -> Option<CachedBatch> {
        self.chunks.get(&key)?.get(&category).cloned()
    }

    pub fn contains(&self, key: ChunkKey) -> bool {
        self.chunks.contains_key(&key)
    }

    pub fn put(
        &mut self,
        key: ChunkKey,
        category: RenderCategory,
        matrices: Vec<Mat4>,
    ) -> CachedBatch {
        let batch = CachedBatch::new(matrices);
        self.chunks
            .entry(key)
            .or_default()
            .insert(category, batch.clone());
        batch
    }

    pub fn invalidate(&mut self, key: ChunkKey) -> bool {
        self.chunks.remove(&key).is_some()
    }

    /// Drops `center` and its eight neighbours. Returns how many entries were removed.
    pub fn invalidate_neighbors(&mut self, center: ChunkKey, grid: &ChunkGrid) -> usize {
        grid.neighborhood(center)
            .into_iter()
            .filter(|key| self.invalidate(*key))
            .count()
    }

    pub fn clear(&mut self) {
        self.chunks.clear();
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
