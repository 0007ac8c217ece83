//! Per-frame renderable output of the active window.

use std::collections::BTreeMap;

use bevy::math::{Mat4, Quat, Vec3};

use crate::{
    cache::{CachedBatch, ChunkBatches, RenderCategory},
    chunk::{ChunkGrid, ChunkKey},
    config::RenderConfig,
    hex::{instance_yaw, HexCoord},
    records::{EntityId, EntityKind},
    registry::EntityRegistry,
    world::WorldState,
};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InstanceTransform {
    pub position: Vec3,
    pub yaw: f32,
    pub scale: f32,
}

impl InstanceTransform {
    pub fn matrix(&self) -> Mat4 {
        Mat4::from_scale_rotation_translation(
            Vec3::splat(self.scale),
            Quat::from_rotation_y(self.yaw),
            self.position,
        )
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisibleInstance {
    pub id: EntityId,
    /// Consecutive per kind, starting at 0 for each frame.
    pub slot: u32,
    pub hex: HexCoord,
    pub transform: InstanceTransform,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct VisibleFrame {
    pub chunk: ChunkKey,
    pub tiles: ChunkBatches,
    pub armies: Vec<VisibleInstance>,
    pub structures: Vec<VisibleInstance>,
    pub quests: Vec<VisibleInstance>,
    pub chests: Vec<VisibleInstance>,
    pub from_cache: bool,
}

impl VisibleFrame {
    pub fn entities(&self, kind: EntityKind) -> &[VisibleInstance] {
        match kind {
            EntityKind::Army => &self.armies,
            EntityKind::Structure => &self.structures,
            EntityKind::Quest => &self.quests,
            EntityKind::Chest => &self.chests,
            EntityKind::Tile => &[],
        }
    }

    pub fn tile_batch(&self, category: RenderCategory) -> Option<&CachedBatch> {
        self.tiles.get(&category)
    }

    pub fn tile_count(&self) -> usize {
        self.tiles.values().map(|batch| batch.count).sum()
    }
}

/// Accumulates tile matrices per render category.
#[derive(Debug, Default)]
pub struct TileBatchBuilder {
    matrices: BTreeMap<RenderCategory, Vec<Mat4>>,
}

impl TileBatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Places `hex` in its biome bucket, or the outline bucket if unexplored.
    /// Hexes under a structure or quest are kept but scaled to zero.
    pub fn push_hex(
        &mut self,
        world: &WorldState,
        grid: &ChunkGrid,
        render: &RenderConfig,
        hex: HexCoord,
    ) -> RenderCategory {
        let mut position = grid.layout().to_world(hex, render.flat);
        let category = match world.explored(hex) {
            Some(tile) => {
                position.y += render.explored_lift;
                RenderCategory::Biome(tile.biome)
            }
            None => {
                position.y = render.outline_height;
                RenderCategory::Outline
            }
        };
        let scale = if world.hides_terrain(hex) { 0.0 } else { 1.0 };
        let transform = InstanceTransform {
            position,
            yaw: instance_yaw(hex),
            scale,
        };
        self.matrices
            .entry(category)
            .or_default()
            .push(transform.matrix());
        category
    }

    pub fn into_matrices(self) -> BTreeMap<RenderCategory, Vec<Mat4>> {
        self.matrices
    }

    pub fn finish(self) -> ChunkBatches {
        self.into_matrices()
            .into_iter()
            .map(|(category, matrices)| (category, CachedBatch::new(matrices)))
            .collect()
    }
}

/// Visible records of one registry with consecutive slots, in spatial index order.
pub fn entity_instances<T>(
    registry: &EntityRegistry<T>,
    grid: &ChunkGrid,
    key: ChunkKey,
    flat: bool,
) -> Vec<VisibleInstance> {
    let (half_width, half_height) = grid.render_size().half_extents();
    registry
        .query_visible(key.origin(), half_width, half_height)
        .into_iter()
        .enumerate()
        .map(|(slot, record)| VisibleInstance {
            id: record.id,
            slot: u32::try_from(slot).unwrap_or(u32::MAX),
            hex: record.hex,
            transform: InstanceTransform {
                position: grid.layout().to_world(record.hex, flat),
                yaw: instance_yaw(record.hex),
                scale: 1.0,
            },
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chunk::RenderChunkSize,
        hex::HexLayout,
        records::{ArmyInfo, OwnerId, StructureInfo, TileInfo},
    };
    use worldmap_schema::{Biome, StructureKind};

    fn grid() -> ChunkGrid {
        ChunkGrid::new(
            8,
            RenderChunkSize {
                width: 4,
                height: 2,
            },
            HexLayout::default(),
        )
    }

    #[test]
    fn tiles_split_into_biome_and_outline() {
        let grid = grid();
        let render = RenderConfig::default();
        let mut world = WorldState::default();
        let explored = HexCoord::new(1, 0);
        world.tiles.upsert(
            EntityId::for_hex(explored),
            explored,
            TileInfo {
                biome: Biome::Beach,
            },
        );
        world.structures.upsert(
            EntityId(1),
            HexCoord::new(0, 0),
            StructureInfo {
                owner: OwnerId(1),
                kind: StructureKind::Realm,
            },
        );

        let mut builder = TileBatchBuilder::new();
        for hex in grid.window_hexes(ChunkKey::new(0, 0)) {
            builder.push_hex(&world, &grid, &render, hex);
        }
        let batches = builder.finish();
        assert_eq!(batches[&RenderCategory::Biome(Biome::Beach)].count, 1);
        assert_eq!(batches[&RenderCategory::Outline].count, 5 * 3 - 1);

        let beach = batches[&RenderCategory::Biome(Biome::Beach)].matrices[0];
        assert!((beach.w_axis.y - 0.05).abs() < 1e-6);
        let hidden = batches[&RenderCategory::Outline]
            .matrices
            .iter()
            .filter(|m| m.x_axis.length() == 0.0)
            .count();
        assert_eq!(hidden, 1);
    }

    #[test]
    fn entity_slots_are_consecutive() {
        let grid = grid();
        let mut armies = EntityRegistry::new();
        armies.upsert(EntityId(30), HexCoord::new(2, 1), ArmyInfo { owner: OwnerId(1) });
        armies.upsert(EntityId(10), HexCoord::new(-2, 0), ArmyInfo { owner: OwnerId(1) });
        armies.upsert(EntityId(20), HexCoord::new(9, 0), ArmyInfo { owner: OwnerId(1) });
        let visible = entity_instances(&armies, &grid, ChunkKey::new(0, 0), true);
        let ids: Vec<_> = visible.iter().map(|v| (v.slot, v.id)).collect();
        assert_eq!(ids, vec![(0, EntityId(10)), (1, EntityId(30))]);
    }
}
